//! Replica engine abstraction
//!
//! The engine owns the disk chain and performs sector I/O. The coordinator
//! only ever talks to it through these traits.

use crate::common::Result;
use crate::replica::{BackingFile, Info, PeerDetails, PrepareRemoveAction, VolUsage};
use std::path::PathBuf;

/// Everything needed to construct an engine for a replica directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineParams {
    pub size: u64,
    pub sector_size: u64,
    pub dir: PathBuf,
    pub backing: Option<BackingFile>,
    pub server_type: String,
}

/// Builds engine handles. Creating a handle materializes the on-disk
/// structures if they don't exist yet.
pub trait EngineFactory: Send + Sync {
    fn create(&self, params: &EngineParams) -> Result<Box<dyn Engine>>;
}

/// A live engine handle
///
/// `read_at`/`write_at` take `&self` and may run concurrently. Everything
/// else is only called while the coordinator holds its exclusive lock.
pub trait Engine: Send + Sync {
    /// Current metadata as seen by the live chain
    fn info(&self) -> Info;

    fn close(&mut self) -> Result<()>;

    /// Re-read the chain and return a fresh handle. `self` stays usable until
    /// the caller closes it.
    fn reload(&self) -> Result<Box<dyn Engine>>;

    /// Return a handle on the chain reverted to snapshot `name`.
    ///
    /// On `Ok`, the prior chain has been released: the caller drops `self`
    /// without closing it. On `Err`, `self` is unchanged.
    fn revert(&mut self, name: &str, created: &str) -> Result<Box<dyn Engine>>;

    fn snapshot(&mut self, name: &str, user_created: bool, created: &str) -> Result<()>;

    fn remove_diff_disk(&mut self, name: &str) -> Result<()>;

    fn replace_disk(&mut self, target: &str, source: &str) -> Result<()>;

    /// Ordered steps to take `name` out of the chain
    fn prepare_remove_disk(&mut self, name: &str) -> Result<Vec<PrepareRemoveAction>>;

    /// Remove the replica's storage. Only called after a successful `close`.
    fn delete(&mut self) -> Result<()>;

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize>;

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    fn resize(&mut self, size: &str) -> Result<()>;

    fn set_rebuilding(&mut self, rebuilding: bool) -> Result<()>;

    fn set_revision_counter(&mut self, counter: i64) -> Result<()>;

    fn update_peer_details(&mut self, details: PeerDetails) -> Result<()>;

    fn get_usage(&self) -> Result<VolUsage>;
}

/// The coordinator's engine handle: either nothing is loaded or exactly one
/// engine is.
#[derive(Default)]
pub enum EngineSlot {
    #[default]
    Closed,
    Open(Box<dyn Engine>),
}

impl EngineSlot {
    pub fn is_open(&self) -> bool {
        matches!(self, EngineSlot::Open(_))
    }

    pub fn get(&self) -> Option<&dyn Engine> {
        match self {
            EngineSlot::Open(engine) => Some(engine.as_ref()),
            EngineSlot::Closed => None,
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut (dyn Engine + 'static)> {
        match self {
            EngineSlot::Open(engine) => Some(engine.as_mut()),
            EngineSlot::Closed => None,
        }
    }

    /// Put `engine` in the slot, returning whatever was there
    pub fn replace(&mut self, engine: Box<dyn Engine>) -> EngineSlot {
        std::mem::replace(self, EngineSlot::Open(engine))
    }

    /// Empty the slot, returning the engine it held
    pub fn take(&mut self) -> Option<Box<dyn Engine>> {
        match std::mem::take(self) {
            EngineSlot::Open(engine) => Some(engine),
            EngineSlot::Closed => None,
        }
    }
}

impl std::fmt::Debug for EngineSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineSlot::Closed => f.write_str("Closed"),
            EngineSlot::Open(engine) => f.debug_tuple("Open").field(&engine.info()).finish(),
        }
    }
}
