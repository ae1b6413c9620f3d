//! Persistence layer for the saga coordinator.
//!
//! Exposes atomic CRUD and compare-and-swap updates over the four
//! row-oriented collections (global transactions, branch transactions,
//! saga payloads, compensation-failure logs). Every mutation is a single
//! conditional statement keyed by identity plus expected version/state;
//! business rules live one layer up, in the coordinator crate.

pub mod entity;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{BranchTxId, NodeInfo, TxState, Xid};
pub use entity::{
    BranchTxRecord, CompensationFailLogRecord, GlobalTxRecord, SagaPayloadRecord, Version,
};
pub use error::{Result, StoreError};
pub use memory::InMemoryTxStore;
pub use postgres::PostgresTxStore;
pub use store::{Precondition, StoreSession, TxStore};
