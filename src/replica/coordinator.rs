//! Replica coordinator
//!
//! Owns at most one engine handle for a replica directory and serializes
//! every administrative change to it against data-plane I/O:
//! - administrative/lifecycle calls take the exclusive lock for their whole body
//! - `read_at`/`write_at`, `stats`, `get_usage`, `ping_response` and `status`
//!   take the shared lock
//!
//! The replica state is never stored. It is derived on every query from the
//! engine slot plus persisted metadata (see [`crate::replica::state`]).

use crate::common::{format_bytes, Error, ReplicaConfig, ReplicaMetrics, Result};
use crate::replica::state::{closed_state, committed_state, live_state};
use crate::replica::{
    BackingFile, EngineFactory, EngineParams, EngineSlot, Info, MetadataReader, PeerDetails,
    PrepareRemoveAction, ProcessContext, State, Stats, VolUsage,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Control plane for a single local replica
pub struct ReplicaCoordinator {
    slot: RwLock<EngineSlot>,
    dir: PathBuf,
    default_sector_size: u64,
    backing: Option<BackingFile>,
    server_type: String,
    factory: Arc<dyn EngineFactory>,
    metadata: Arc<dyn MetadataReader>,
    context: ProcessContext,
    metrics: ReplicaMetrics,
}

impl ReplicaCoordinator {
    pub fn new(
        context: ProcessContext,
        backing: Option<BackingFile>,
        sector_size: u64,
        server_type: impl Into<String>,
        factory: Arc<dyn EngineFactory>,
        metadata: Arc<dyn MetadataReader>,
    ) -> Self {
        Self {
            slot: RwLock::new(EngineSlot::Closed),
            dir: context.dir().to_path_buf(),
            default_sector_size: sector_size,
            backing,
            server_type: server_type.into(),
            factory,
            metadata,
            context,
            metrics: ReplicaMetrics::new(),
        }
    }

    /// Build from loaded configuration. `context` should have been created
    /// for `config.dir`.
    pub fn from_config(
        config: &ReplicaConfig,
        context: ProcessContext,
        factory: Arc<dyn EngineFactory>,
        metadata: Arc<dyn MetadataReader>,
    ) -> Self {
        Self::new(
            context,
            config.backing.clone(),
            config.sector_size,
            config.server_type.clone(),
            factory,
            metadata,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn server_type(&self) -> &str {
        &self.server_type
    }

    pub fn context(&self) -> &ProcessContext {
        &self.context
    }

    pub fn metrics(&self) -> &ReplicaMetrics {
        &self.metrics
    }

    // A panicking engine call must not wedge the replica: the slot is still
    // either Closed or holds exactly one engine.
    fn read_slot(&self) -> RwLockReadGuard<'_, EngineSlot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, EngineSlot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn sector_size(&self) -> u64 {
        match &self.backing {
            Some(b) if b.sector_size > 0 => b.sector_size,
            _ => self.default_sector_size,
        }
    }

    fn size(&self, size: u64) -> u64 {
        match &self.backing {
            Some(b) if b.size > 0 => b.size,
            _ => size,
        }
    }

    fn params(&self, size: u64) -> EngineParams {
        EngineParams {
            size: self.size(size),
            sector_size: self.sector_size(),
            dir: self.dir.clone(),
            backing: self.backing.clone(),
            server_type: self.server_type.clone(),
        }
    }

    fn derive(&self, slot: &EngineSlot) -> (State, Info) {
        match slot.get() {
            Some(engine) => live_state(engine.info()),
            None => closed_state(self.metadata.read(&self.dir)),
        }
    }

    fn record<T>(&self, op: &'static str, started: Instant, result: Result<T>) -> Result<T> {
        self.metrics
            .record_operation(op, started.elapsed(), result.is_ok());
        result
    }

    /// Current state and metadata
    pub fn status(&self) -> (State, Info) {
        let slot = self.read_slot();
        self.derive(&slot)
    }

    /// Last committed state, from persisted metadata only
    pub fn prev_status(&self) -> (State, Info) {
        committed_state(self.metadata.read(&self.dir))
    }

    /// Publish a lifecycle action to the monitor.
    ///
    /// Blocks while the action queue is full, holding the exclusive lock.
    pub fn start(&self, action: &str) -> Result<()> {
        let _slot = self.write_slot();
        self.context.publish(action)
    }

    /// Materialize the replica on disk. A no-op once past `Initial`.
    pub fn create(&self, size: u64) -> Result<()> {
        let started = Instant::now();
        let slot = self.write_slot();

        let (state, _) = self.derive(&slot);
        if state != State::Initial {
            return Ok(());
        }

        let params = self.params(size);
        tracing::info!(
            "Creating volume {}, size {} ({})/{}",
            self.dir.display(),
            params.size,
            format_bytes(params.size),
            params.sector_size
        );
        let result = self
            .factory
            .create(&params)
            .and_then(|mut engine| engine.close());
        self.record("create", started, result)
    }

    /// Load the engine and keep it
    pub fn open(&self) -> Result<()> {
        let started = Instant::now();
        let mut slot = self.write_slot();

        if slot.is_open() {
            return self.record("open", started, Err(Error::AlreadyOpen));
        }

        let (_, info) = self.derive(&slot);
        let params = self.params(info.size);
        tracing::info!(
            "Opening volume {}, size {}/{}",
            self.dir.display(),
            params.size,
            params.sector_size
        );
        let result = self.factory.create(&params).map(|engine| {
            slot.replace(engine);
        });
        self.record("open", started, result)
    }

    /// Swap in a handle on the re-read chain. The old handle survives a failure.
    pub fn reload(&self) -> Result<()> {
        let started = Instant::now();
        let mut slot = self.write_slot();

        let Some(engine) = slot.get() else {
            return Ok(());
        };

        tracing::info!("Reloading volume");
        let result = engine.reload().map(|fresh| {
            if let EngineSlot::Open(mut old) = slot.replace(fresh) {
                if let Err(e) = old.close() {
                    tracing::warn!("Failed to close replaced engine: {}", e);
                }
            }
        });
        self.record("reload", started, result)
    }

    /// Revert the chain to snapshot `name`
    pub fn revert(&self, name: &str, created: &str) -> Result<()> {
        let started = Instant::now();
        let mut slot = self.write_slot();

        let Some(engine) = slot.get_mut() else {
            return Ok(());
        };

        tracing::info!("Reverting to snapshot [{}] on volume at {}", name, created);
        // The engine released the prior chain; the old handle is just dropped
        let result = engine.revert(name, created).map(|reverted| {
            slot.replace(reverted);
        });
        self.record("revert", started, result)
    }

    pub fn snapshot(&self, name: &str, user_created: bool, created: &str) -> Result<()> {
        let started = Instant::now();
        let mut slot = self.write_slot();

        let Some(engine) = slot.get_mut() else {
            return Ok(());
        };

        tracing::info!(
            "Snapshotting [{}] volume, user created {}, created time {}",
            name,
            user_created,
            created
        );
        let result = engine.snapshot(name, user_created, created);
        self.record("snapshot", started, result)
    }

    pub fn remove_diff_disk(&self, name: &str) -> Result<()> {
        let started = Instant::now();
        let mut slot = self.write_slot();

        let Some(engine) = slot.get_mut() else {
            return Ok(());
        };

        tracing::info!("Removing disk: {}", name);
        let result = engine.remove_diff_disk(name);
        self.record("remove_diff_disk", started, result)
    }

    pub fn replace_disk(&self, target: &str, source: &str) -> Result<()> {
        let started = Instant::now();
        let mut slot = self.write_slot();

        let Some(engine) = slot.get_mut() else {
            return Ok(());
        };

        tracing::info!("Replacing disk {} with {}", target, source);
        let result = engine.replace_disk(target, source);
        self.record("replace_disk", started, result)
    }

    /// Ordered steps to take `name` out of the chain; empty with no engine
    pub fn prepare_remove_disk(&self, name: &str) -> Result<Vec<PrepareRemoveAction>> {
        let started = Instant::now();
        let mut slot = self.write_slot();

        let Some(engine) = slot.get_mut() else {
            return Ok(Vec::new());
        };

        tracing::info!("Prepare removing disk: {}", name);
        let result = engine.prepare_remove_disk(name);
        self.record("prepare_remove_disk", started, result)
    }

    /// Grow the volume. Needs a loaded engine.
    pub fn resize(&self, size: &str) -> Result<()> {
        let started = Instant::now();
        let mut slot = self.write_slot();

        let result = match slot.get_mut() {
            Some(engine) => {
                tracing::info!("Resizing volume to {}", size);
                engine.resize(size)
            }
            None => Err(Error::NotAvailable),
        };
        self.record("resize", started, result)
    }

    /// Enter (`true`, from Open/Dirty) or leave (`false`, from Rebuilding)
    /// the rebuilding state
    pub fn set_rebuilding(&self, rebuilding: bool) -> Result<()> {
        let started = Instant::now();
        let mut slot = self.write_slot();

        let (state, _) = self.derive(&slot);
        let allowed = if rebuilding {
            matches!(state, State::Open | State::Dirty)
        } else {
            state == State::Rebuilding
        };

        let result = match slot.get_mut() {
            Some(engine) if allowed => {
                tracing::info!("Setting rebuilding={} from state {}", rebuilding, state);
                engine.set_rebuilding(rebuilding)
            }
            _ => Err(Error::InvalidTransition { rebuilding, state }),
        };
        self.record("set_rebuilding", started, result)
    }

    pub fn set_revision_counter(&self, counter: i64) -> Result<()> {
        let started = Instant::now();
        let mut slot = self.write_slot();

        let Some(engine) = slot.get_mut() else {
            return Ok(());
        };

        tracing::info!("Setting revision counter to {}", counter);
        let result = engine.set_revision_counter(counter);
        self.record("set_revision_counter", started, result)
    }

    pub fn update_peer_details(&self, details: PeerDetails) -> Result<()> {
        let started = Instant::now();
        let mut slot = self.write_slot();

        let Some(engine) = slot.get_mut() else {
            return Ok(());
        };

        tracing::info!(
            "Updating peer details: {} replicas, quorum {}",
            details.replica_count,
            details.quorum_replica_count
        );
        let result = engine.update_peer_details(details);
        self.record("update_peer_details", started, result)
    }

    /// Close the engine and remove the replica's storage.
    ///
    /// A failed close keeps the handle so the call can be retried. Once close
    /// succeeds the handle is dropped even if the delete itself fails.
    pub fn delete(&self) -> Result<()> {
        let started = Instant::now();
        let mut slot = self.write_slot();

        let Some(engine) = slot.get_mut() else {
            return Ok(());
        };

        tracing::info!("Deleting volume");
        if let Err(e) = engine.close() {
            return self.record("delete", started, Err(e));
        }

        let result = match slot.take() {
            Some(mut engine) => engine.delete(),
            None => Ok(()),
        };
        self.record("delete", started, result)
    }

    /// Close the engine. The handle is kept if closing fails.
    pub fn close(&self) -> Result<()> {
        let started = Instant::now();
        let mut slot = self.write_slot();

        let Some(engine) = slot.get_mut() else {
            return Ok(());
        };

        tracing::info!("Closing volume");
        let result = engine.close().map(|()| {
            slot.take();
        });
        self.record("close", started, result)
    }

    pub fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let slot = self.read_slot();
        let engine = slot.get().ok_or(Error::NotAvailable)?;

        let result = engine.write_at(buf, offset);
        match &result {
            Ok(n) => self.metrics.bytes_written.add(*n as u64),
            Err(_) => self.metrics.io_errors.inc(),
        }
        result
    }

    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let slot = self.read_slot();
        let engine = slot.get().ok_or(Error::NotAvailable)?;

        let result = engine.read_at(buf, offset);
        match &result {
            Ok(n) => self.metrics.bytes_read.add(*n as u64),
            Err(_) => self.metrics.io_errors.inc(),
        }
        result
    }

    pub fn stats(&self) -> Result<Stats> {
        let slot = self.read_slot();
        let info = slot.get().ok_or(Error::NotAvailable)?.info();
        Ok(Stats {
            revision_counter: info.revision_counter,
            replica_count: i64::from(info.peer_count),
        })
    }

    pub fn get_usage(&self) -> Result<VolUsage> {
        let slot = self.read_slot();
        slot.get().ok_or(Error::NotAvailable)?.get_usage()
    }

    /// Liveness probe: Ok iff the replica can serve I/O
    pub fn ping_response(&self) -> Result<()> {
        let (state, _) = self.status();
        if !state.is_live() {
            return Err(Error::PingFailure(state));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReplicaCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("ReplicaCoordinator");
        out.field("dir", &self.dir)
            .field("server_type", &self.server_type);
        match self.slot.try_read() {
            Ok(slot) => out.field("slot", &*slot),
            Err(_) => out.field("slot", &"<locked>"),
        };
        out.finish()
    }
}
