//! Shared helpers for minivol integration tests

#![allow(dead_code)]

use minivol::common::Result;
use minivol::replica::{
    ActionMonitor, Engine, EngineFactory, EngineParams, FileMetadataReader, Info,
    MemEngineFactory, PeerDetails, PrepareRemoveAction, VolUsage,
};
use minivol::{ProcessContext, ReplicaCoordinator};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SECTOR: u64 = 512;
pub const SIZE: u64 = 1 << 20;

/// Coordinator over the in-memory engine for `dir`
pub fn coordinator(dir: &Path) -> (ReplicaCoordinator, ActionMonitor) {
    with_factory(dir, Arc::new(MemEngineFactory::new()))
}

pub fn with_factory(
    dir: &Path,
    factory: Arc<dyn EngineFactory>,
) -> (ReplicaCoordinator, ActionMonitor) {
    let (context, monitor) = ProcessContext::new(dir);
    let coordinator = ReplicaCoordinator::new(
        context,
        None,
        SECTOR,
        "tcp",
        factory,
        Arc::new(FileMetadataReader),
    );
    (coordinator, monitor)
}

/// A buffer of `sectors` sectors filled with `byte`
pub fn block(byte: u8, sectors: usize) -> Vec<u8> {
    vec![byte; sectors * SECTOR as usize]
}

/// Observations shared by every handle a [`SlowFactory`] hands out
#[derive(Debug, Default)]
pub struct Probe {
    pub reads_entered: AtomicUsize,
    pub reads_finished: AtomicUsize,
    pub active_reads: AtomicUsize,
    pub max_active_reads: AtomicUsize,
    pub resized_during_read: AtomicBool,
}

/// Wraps [`MemEngineFactory`] so every read sleeps for `delay`
pub struct SlowFactory {
    inner: MemEngineFactory,
    delay: Duration,
    pub probe: Arc<Probe>,
}

impl SlowFactory {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemEngineFactory::new(),
            delay,
            probe: Arc::new(Probe::default()),
        }
    }

    fn wrap(&self, inner: Box<dyn Engine>) -> Box<dyn Engine> {
        Box::new(SlowEngine {
            inner,
            delay: self.delay,
            probe: self.probe.clone(),
        })
    }
}

impl EngineFactory for SlowFactory {
    fn create(&self, params: &EngineParams) -> Result<Box<dyn Engine>> {
        self.inner.create(params).map(|engine| self.wrap(engine))
    }
}

struct SlowEngine {
    inner: Box<dyn Engine>,
    delay: Duration,
    probe: Arc<Probe>,
}

impl SlowEngine {
    fn rewrap(&self, inner: Box<dyn Engine>) -> Box<dyn Engine> {
        Box::new(SlowEngine {
            inner,
            delay: self.delay,
            probe: self.probe.clone(),
        })
    }
}

impl Engine for SlowEngine {
    fn info(&self) -> Info {
        self.inner.info()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn reload(&self) -> Result<Box<dyn Engine>> {
        self.inner.reload().map(|e| self.rewrap(e))
    }

    fn revert(&mut self, name: &str, created: &str) -> Result<Box<dyn Engine>> {
        let reverted = self.inner.revert(name, created)?;
        Ok(self.rewrap(reverted))
    }

    fn snapshot(&mut self, name: &str, user_created: bool, created: &str) -> Result<()> {
        self.inner.snapshot(name, user_created, created)
    }

    fn remove_diff_disk(&mut self, name: &str) -> Result<()> {
        self.inner.remove_diff_disk(name)
    }

    fn replace_disk(&mut self, target: &str, source: &str) -> Result<()> {
        self.inner.replace_disk(target, source)
    }

    fn prepare_remove_disk(&mut self, name: &str) -> Result<Vec<PrepareRemoveAction>> {
        self.inner.prepare_remove_disk(name)
    }

    fn delete(&mut self) -> Result<()> {
        self.inner.delete()
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        self.inner.write_at(buf, offset)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.probe.reads_entered.fetch_add(1, Ordering::SeqCst);
        let active = self.probe.active_reads.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe
            .max_active_reads
            .fetch_max(active, Ordering::SeqCst);

        std::thread::sleep(self.delay);
        let result = self.inner.read_at(buf, offset);

        self.probe.active_reads.fetch_sub(1, Ordering::SeqCst);
        self.probe.reads_finished.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn resize(&mut self, size: &str) -> Result<()> {
        if self.probe.active_reads.load(Ordering::SeqCst) > 0 {
            self.probe.resized_during_read.store(true, Ordering::SeqCst);
        }
        self.inner.resize(size)
    }

    fn set_rebuilding(&mut self, rebuilding: bool) -> Result<()> {
        self.inner.set_rebuilding(rebuilding)
    }

    fn set_revision_counter(&mut self, counter: i64) -> Result<()> {
        self.inner.set_revision_counter(counter)
    }

    fn update_peer_details(&mut self, details: PeerDetails) -> Result<()> {
        self.inner.update_peer_details(details)
    }

    fn get_usage(&self) -> Result<VolUsage> {
        self.inner.get_usage()
    }
}
