//! Replica control plane
//!
//! - [`ReplicaCoordinator`]: owns the engine handle, derives state, serializes
//!   administrative calls against I/O
//! - [`Engine`] / [`EngineFactory`]: the disk-chain engine seam
//! - [`MetadataReader`]: persisted `volume.meta` access
//! - [`ProcessContext`] / [`ActionMonitor`]: startup context and the bounded
//!   lifecycle action queue
//! - [`MemEngine`]: in-process engine used by the binary and tests

pub mod coordinator;
pub mod engine;
pub mod memory;
pub mod metadata;
pub mod notify;
pub mod state;
pub mod types;

pub use coordinator::ReplicaCoordinator;
pub use engine::{Engine, EngineFactory, EngineParams, EngineSlot};
pub use memory::{DiskInfo, MemEngine, MemEngineFactory};
pub use metadata::{FileMetadataReader, MetadataReader, META_FILE};
pub use notify::{ActionMonitor, ProcessContext, ACTION_QUEUE_CAPACITY};
pub use state::State;
pub use types::{
    BackingFile, Info, PeerDetails, PrepareRemoveAction, RemoveActionKind, Stats, VolUsage,
};
