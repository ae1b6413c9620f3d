use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a global (saga-level) transaction.
///
/// Wraps an opaque string to provide type safety and prevent mixing up
/// global transaction ids with branch ids. New ids are minted from UUIDv4,
/// but anything unique and collision-resistant would do; the coordinator
/// never interprets the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Xid(String);

impl Xid {
    /// Mints a new random xid.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Xid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Xid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Xid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one branch (sub-step) of a global transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchTxId(String);

impl BranchTxId {
    /// Mints a new random branch transaction id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for BranchTxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for BranchTxId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BranchTxId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity of a participant node: which deployment group and service it
/// belongs to and which instance of that service it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub instance_id: String,
}

impl NodeInfo {
    pub fn new(
        group: impl Into<String>,
        service: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            service: service.into(),
            instance_id: instance_id.into(),
        }
    }
}
