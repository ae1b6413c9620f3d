pub mod state;
pub mod types;

pub use state::{TxState, UnknownStateName};
pub use types::{BranchTxId, NodeInfo, Xid};
