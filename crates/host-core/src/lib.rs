//! The storage host core: obligation data model, persistence, sector
//! storage, locking, consensus application, scheduling and the
//! obligation state machine itself.

pub mod consensus_listener;
pub mod context;
pub mod db;
pub mod entropy;
pub mod financial;
pub mod identity;
pub mod lock_table;
pub mod obligation;
pub mod scheduler;
pub mod sector_store;
pub mod state_machine;

pub use context::HostState;
pub use obligation::{ActionItem, ObligationStatus, SectorUsage, StorageFolder, StorageObligation};
