//! Transaction state vocabulary shared by global and branch transactions.

use serde::{Deserialize, Serialize};

/// The state of a global or branch transaction.
///
/// Global transitions:
/// ```text
/// PROCESSING ──┬──► COMMITTED
///              └──► COMPENSATION_DOING ──┬──► COMPENSATION_DONE
///                                        └──► COMPENSATION_FAIL
/// ```
///
/// Branch transitions additionally pass through `COMPENSATION_ERROR`,
/// which is repeatable: every distinct failed compensation attempt is
/// reported, not just the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxState {
    /// Work in flight, the initial state.
    Processing,
    /// All work finished successfully (terminal).
    Committed,
    /// Compensation (rollback) is being attempted.
    CompensationDoing,
    /// One compensation attempt failed; more may follow.
    CompensationError,
    /// Compensation finished (terminal).
    CompensationDone,
    /// Compensation given up on (terminal).
    CompensationFail,
}

impl TxState {
    /// Stable integer code used for the storage `state` column.
    pub fn as_i32(self) -> i32 {
        match self {
            TxState::Processing => 1,
            TxState::Committed => 2,
            TxState::CompensationDoing => 3,
            TxState::CompensationError => 4,
            TxState::CompensationDone => 5,
            TxState::CompensationFail => 6,
        }
    }

    /// Inverse of [`as_i32`](Self::as_i32). Returns `None` for unknown codes.
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            1 => Some(TxState::Processing),
            2 => Some(TxState::Committed),
            3 => Some(TxState::CompensationDoing),
            4 => Some(TxState::CompensationError),
            5 => Some(TxState::CompensationDone),
            6 => Some(TxState::CompensationFail),
            _ => None,
        }
    }

    /// Returns true for states with no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TxState::Committed | TxState::CompensationDone | TxState::CompensationFail
        )
    }

    /// Returns the state name as used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            TxState::Processing => "PROCESSING",
            TxState::Committed => "COMMITTED",
            TxState::CompensationDoing => "COMPENSATION_DOING",
            TxState::CompensationError => "COMPENSATION_ERROR",
            TxState::CompensationDone => "COMPENSATION_DONE",
            TxState::CompensationFail => "COMPENSATION_FAIL",
        }
    }
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TxState {
    type Err = UnknownStateName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(TxState::Processing),
            "COMMITTED" => Ok(TxState::Committed),
            "COMPENSATION_DOING" => Ok(TxState::CompensationDoing),
            "COMPENSATION_ERROR" => Ok(TxState::CompensationError),
            "COMPENSATION_DONE" => Ok(TxState::CompensationDone),
            "COMPENSATION_FAIL" => Ok(TxState::CompensationFail),
            _ => Err(UnknownStateName(s.to_string())),
        }
    }
}

/// Error returned when parsing an unrecognized state name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStateName(pub String);

impl std::fmt::Display for UnknownStateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown transaction state name: {}", self.0)
    }
}

impl std::error::Error for UnknownStateName {}
