//! # minivol
//!
//! Per-node control plane for one replica of a replicated block volume:
//! - Derived lifecycle state (initial, closed, open, dirty, rebuilding, error)
//! - Administrative disk-chain changes (snapshot, revert, disk removal and
//!   replacement, resize, rebuild toggling) serialized against live I/O
//! - Health probe and statistics for orchestration
//! - Bounded lifecycle action queue for an external monitor
//!
//! ## Architecture
//!
//! ```text
//!   transport (RPC / HTTP, not part of this crate)
//!              │
//! ┌────────────▼──────────────────────────────┐
//! │          ReplicaCoordinator               │
//! │  RwLock<EngineSlot>                       │
//! │   - exclusive: lifecycle / admin calls    │
//! │   - shared:    read_at / write_at / stats │
//! └─────┬──────────────────┬──────────────────┘
//!       │                  │
//! ┌─────▼──────┐    ┌──────▼─────────┐   ┌──────────────┐
//! │ Engine     │    │ MetadataReader │   │ ActionMonitor│
//! │ (chain+IO) │    │ (volume.meta)  │   │ (capacity 5) │
//! └────────────┘    └────────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! minivol-replica --dir ./data/r1 create --size 10Gi
//! minivol-replica --dir ./data/r1 status
//! ```

pub mod common;
pub mod replica;

// Re-export commonly used types
pub use common::{Error, ReplicaConfig, Result};
pub use replica::{ProcessContext, ReplicaCoordinator, State};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
