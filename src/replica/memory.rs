//! In-process replica engine
//!
//! Keeps the disk chain in memory and persists only `volume.meta`, so the
//! coordinator's state derivation sees a real metadata file. Volumes are
//! keyed by directory inside the factory and survive close/open cycles for
//! the lifetime of the factory.
//!
//! Chain layout: index 0 is the oldest disk, the last entry is the writable
//! head. Reads fall through from the head towards the base; sectors no disk
//! holds read as zeros.

use crate::common::{parse_size, Error, Result};
use crate::replica::metadata::{write_info, FileMetadataReader, MetadataReader};
use crate::replica::{
    Engine, EngineFactory, EngineParams, Info, PeerDetails, PrepareRemoveAction,
    RemoveActionKind, VolUsage,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

#[derive(Debug, Clone)]
struct Disk {
    name: String,
    user_created: bool,
    created: String,
    removed: bool,
    sectors: HashMap<u64, Vec<u8>>,
}

impl Disk {
    fn new(name: String) -> Self {
        Self {
            name,
            user_created: false,
            created: String::new(),
            removed: false,
            sectors: HashMap::new(),
        }
    }
}

fn head_name(seq: u64) -> String {
    format!("volume-head-{:03}.img", seq)
}

fn snapshot_name(name: &str) -> String {
    format!("volume-snap-{}.img", name)
}

#[derive(Debug)]
struct Volume {
    dir: PathBuf,
    info: Mutex<Info>,
    chain: RwLock<Vec<Disk>>,
    next_head: Mutex<u64>,
}

impl Volume {
    fn new(dir: PathBuf, info: Info) -> Self {
        let head = info.head.clone().unwrap_or_else(|| head_name(0));
        Self {
            dir,
            info: Mutex::new(Info {
                head: Some(head.clone()),
                ..info
            }),
            chain: RwLock::new(vec![Disk::new(head)]),
            next_head: Mutex::new(1),
        }
    }

    fn info(&self) -> MutexGuard<'_, Info> {
        self.info.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self) -> Result<()> {
        let info = self.info().clone();
        write_info(&self.dir, &info)
    }

    fn new_head(&self) -> String {
        let mut next = self.next_head.lock().unwrap_or_else(PoisonError::into_inner);
        let name = head_name(*next);
        *next += 1;
        name
    }

    fn chain_mut(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Disk>> {
        self.chain.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn chain(&self) -> std::sync::RwLockReadGuard<'_, Vec<Disk>> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn position(chain: &[Disk], name: &str) -> Result<usize> {
    chain
        .iter()
        .position(|d| d.name == name)
        .ok_or_else(|| Error::Engine(format!("disk {} not found in chain", name)))
}

/// Copy sectors from `from` into `into`, keeping those `into` already has
fn fill_missing(into: &mut Disk, from: &Disk) {
    for (sector, data) in &from.sectors {
        into.sectors
            .entry(*sector)
            .or_insert_with(|| data.clone());
    }
}

/// One disk of the chain as reported by [`MemEngine::disks`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    pub name: String,
    pub user_created: bool,
    pub created: String,
    pub removed: bool,
    pub sectors: usize,
}

/// Builds [`MemEngine`] handles, one shared volume per directory
#[derive(Debug, Default)]
pub struct MemEngineFactory {
    volumes: Mutex<HashMap<PathBuf, Arc<Volume>>>,
}

impl MemEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EngineFactory for MemEngineFactory {
    fn create(&self, params: &EngineParams) -> Result<Box<dyn Engine>> {
        let persisted = match FileMetadataReader.read(&params.dir) {
            Ok(info) => Some(info),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let mut volumes = self.volumes.lock().unwrap_or_else(PoisonError::into_inner);
        let existing = volumes.get(&params.dir).cloned();
        let volume = match (persisted, existing) {
            (Some(_), Some(existing)) => existing,
            (persisted, _) => {
                let info = persisted.unwrap_or_else(|| Info {
                    size: params.size,
                    sector_size: params.sector_size,
                    backing_file: params.backing.as_ref().map(|b| b.name.clone()),
                    ..Default::default()
                });
                if info.sector_size == 0 {
                    return Err(Error::Engine("sector size must be positive".into()));
                }
                let volume = Arc::new(Volume::new(params.dir.clone(), info));
                volumes.insert(params.dir.clone(), volume.clone());
                volume
            }
        };
        drop(volumes);

        volume.persist()?;
        tracing::debug!(
            "MemEngine ready for {} ({})",
            params.dir.display(),
            params.server_type
        );

        Ok(Box::new(MemEngine {
            volume,
            closed: false,
        }))
    }
}

/// Handle on an in-memory volume
#[derive(Debug)]
pub struct MemEngine {
    volume: Arc<Volume>,
    closed: bool,
}

impl MemEngine {
    pub fn dir(&self) -> &Path {
        &self.volume.dir
    }

    /// The chain from base to head
    pub fn disks(&self) -> Vec<DiskInfo> {
        self.volume
            .chain()
            .iter()
            .map(|d| DiskInfo {
                name: d.name.clone(),
                user_created: d.user_created,
                created: d.created.clone(),
                removed: d.removed,
                sectors: d.sectors.len(),
            })
            .collect()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Engine("engine handle is closed".into()));
        }
        Ok(())
    }

    /// Validate an I/O range and return (first sector, sector size)
    fn check_range(&self, len: usize, offset: u64) -> Result<(u64, u64)> {
        self.check_open()?;
        let info = self.volume.info();
        let sector_size = info.sector_size;
        if offset % sector_size != 0 || len as u64 % sector_size != 0 {
            return Err(Error::Engine(format!(
                "unaligned I/O: offset {} length {} sector size {}",
                offset, len, sector_size
            )));
        }
        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| Error::Engine("I/O range overflows".into()))?;
        if end > info.size {
            return Err(Error::Engine(format!(
                "I/O beyond end of volume: {} > {}",
                end, info.size
            )));
        }
        Ok((offset / sector_size, sector_size))
    }

    fn handle(&self) -> Box<dyn Engine> {
        Box::new(MemEngine {
            volume: self.volume.clone(),
            closed: false,
        })
    }
}

impl Engine for MemEngine {
    fn info(&self) -> Info {
        self.volume.info().clone()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.volume.persist()?;
        self.closed = true;
        Ok(())
    }

    fn reload(&self) -> Result<Box<dyn Engine>> {
        self.check_open()?;
        let persisted = FileMetadataReader.read(&self.volume.dir)?;
        {
            let mut info = self.volume.info();
            // Sectors in the chain are keyed by the live geometry
            if persisted.sector_size != info.sector_size {
                return Err(Error::Engine(format!(
                    "persisted sector size {} does not match volume sector size {}",
                    persisted.sector_size, info.sector_size
                )));
            }
            // Live counters win over whatever was last flushed
            let revision_counter = info.revision_counter.max(persisted.revision_counter);
            *info = Info {
                revision_counter,
                ..persisted
            };
        }
        Ok(self.handle())
    }

    fn revert(&mut self, name: &str, created: &str) -> Result<Box<dyn Engine>> {
        self.check_open()?;
        let snap = snapshot_name(name);
        let head = self.volume.new_head();
        {
            let mut chain = self.volume.chain_mut();
            let idx = position(&chain, &snap)?;
            chain.truncate(idx + 1);
            chain.push(Disk::new(head.clone()));
        }
        {
            let mut info = self.volume.info();
            info.head = Some(head);
            info.dirty = true;
        }
        self.volume.persist()?;
        tracing::debug!("Reverted {} to {} (created {})", self.dir().display(), snap, created);

        // The old handle no longer owns the chain
        self.closed = true;
        Ok(self.handle())
    }

    fn snapshot(&mut self, name: &str, user_created: bool, created: &str) -> Result<()> {
        self.check_open()?;
        let snap = snapshot_name(name);
        let head = self.volume.new_head();
        {
            let mut chain = self.volume.chain_mut();
            if chain.iter().any(|d| d.name == snap) {
                return Err(Error::Engine(format!("snapshot {} already exists", name)));
            }
            if let Some(current) = chain.last_mut() {
                current.name = snap;
                current.user_created = user_created;
                current.created = created.to_string();
            }
            chain.push(Disk::new(head.clone()));
        }
        self.volume.info().head = Some(head);
        self.volume.persist()
    }

    fn remove_diff_disk(&mut self, name: &str) -> Result<()> {
        self.check_open()?;
        let mut chain = self.volume.chain_mut();
        let idx = position(&chain, name)?;
        if idx + 1 == chain.len() {
            return Err(Error::Engine(format!(
                "can not remove the active head disk {}",
                name
            )));
        }
        let removed = chain.remove(idx);
        // Keep reads through the child unchanged
        fill_missing(&mut chain[idx], &removed);
        Ok(())
    }

    fn replace_disk(&mut self, target: &str, source: &str) -> Result<()> {
        self.check_open()?;
        let mut chain = self.volume.chain_mut();
        let target_idx = position(&chain, target)?;
        let source_idx = position(&chain, source)?;
        if target_idx + 1 == chain.len() {
            return Err(Error::Engine(format!(
                "can not replace the active head disk {}",
                target
            )));
        }
        if target_idx == source_idx {
            return Ok(());
        }

        let target_disk = chain[target_idx].clone();
        let mut source_disk = chain.remove(source_idx);
        // Target's data overrides the source when the source takes its place
        let mut merged = target_disk;
        fill_missing(&mut merged, &source_disk);
        source_disk.sectors = merged.sectors;
        source_disk.removed = false;

        let target_idx = position(&chain, target)?;
        chain[target_idx] = source_disk;
        Ok(())
    }

    fn prepare_remove_disk(&mut self, name: &str) -> Result<Vec<PrepareRemoveAction>> {
        self.check_open()?;
        let mut chain = self.volume.chain_mut();
        let idx = position(&chain, name)?;
        let head_idx = chain.len() - 1;
        if idx == head_idx {
            return Err(Error::Engine(format!(
                "can not delete the active differencing disk {}",
                name
            )));
        }
        chain[idx].removed = true;

        let child = &chain[idx + 1];
        let actions = if idx + 1 != head_idx {
            vec![
                PrepareRemoveAction {
                    action: RemoveActionKind::Coalesce,
                    source: child.name.clone(),
                    target: name.to_string(),
                },
                PrepareRemoveAction {
                    action: RemoveActionKind::Replace,
                    source: name.to_string(),
                    target: child.name.clone(),
                },
            ]
        } else if idx > 0 {
            let parent = chain[idx - 1].name.clone();
            vec![
                PrepareRemoveAction {
                    action: RemoveActionKind::Coalesce,
                    source: name.to_string(),
                    target: parent.clone(),
                },
                PrepareRemoveAction {
                    action: RemoveActionKind::Remove,
                    source: name.to_string(),
                    target: parent,
                },
            ]
        } else {
            // Base disk under the head: stays marked until the head is snapshotted
            Vec::new()
        };
        Ok(actions)
    }

    fn delete(&mut self) -> Result<()> {
        let path = FileMetadataReader::meta_path(&self.volume.dir);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.volume.chain_mut().clear();
        self.closed = true;
        Ok(())
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let (first, sector_size) = self.check_range(buf.len(), offset)?;
        {
            let mut chain = self.volume.chain_mut();
            let head = chain
                .last_mut()
                .ok_or_else(|| Error::Engine("empty disk chain".into()))?;
            for (i, chunk) in buf.chunks(sector_size as usize).enumerate() {
                head.sectors.insert(first + i as u64, chunk.to_vec());
            }
        }

        let first_write = {
            let mut info = self.volume.info();
            info.revision_counter += 1;
            !std::mem::replace(&mut info.dirty, true)
        };
        if first_write {
            self.volume.persist()?;
        }
        Ok(buf.len())
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let (first, sector_size) = self.check_range(buf.len(), offset)?;
        let chain = self.volume.chain();
        for (i, chunk) in buf.chunks_mut(sector_size as usize).enumerate() {
            let sector = first + i as u64;
            match chain.iter().rev().find_map(|d| d.sectors.get(&sector)) {
                Some(data) => chunk.copy_from_slice(data),
                None => chunk.fill(0),
            }
        }
        Ok(buf.len())
    }

    fn resize(&mut self, size: &str) -> Result<()> {
        self.check_open()?;
        let new_size = parse_size(size)?;
        {
            let mut info = self.volume.info();
            if new_size < info.size {
                return Err(Error::InvalidSize(format!(
                    "can not shrink volume from {} to {}",
                    info.size, new_size
                )));
            }
            if new_size % info.sector_size != 0 {
                return Err(Error::InvalidSize(format!(
                    "size {} is not a multiple of sector size {}",
                    new_size, info.sector_size
                )));
            }
            info.size = new_size;
        }
        self.volume.persist()
    }

    fn set_rebuilding(&mut self, rebuilding: bool) -> Result<()> {
        self.check_open()?;
        self.volume.info().rebuilding = rebuilding;
        self.volume.persist()
    }

    fn set_revision_counter(&mut self, counter: i64) -> Result<()> {
        self.check_open()?;
        self.volume.info().revision_counter = counter;
        self.volume.persist()
    }

    fn update_peer_details(&mut self, details: PeerDetails) -> Result<()> {
        self.check_open()?;
        self.volume.info().peer_count = details.replica_count;
        self.volume.persist()
    }

    fn get_usage(&self) -> Result<VolUsage> {
        self.check_open()?;
        let chain = self.volume.chain();
        let mut logical = HashSet::new();
        let mut used_blocks = 0u64;
        for disk in chain.iter() {
            used_blocks += disk.sectors.len() as u64;
            logical.extend(disk.sectors.keys().copied());
        }
        let info = self.volume.info();
        Ok(VolUsage {
            revision_counter: info.revision_counter,
            sector_size: info.sector_size,
            used_logical_blocks: logical.len() as u64,
            used_blocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SECTOR: u64 = 512;

    fn params(dir: &Path) -> EngineParams {
        EngineParams {
            size: 64 * SECTOR,
            sector_size: SECTOR,
            dir: dir.to_path_buf(),
            backing: None,
            server_type: "tcp".into(),
        }
    }

    fn sector(byte: u8) -> Vec<u8> {
        vec![byte; SECTOR as usize]
    }

    fn read_sector(engine: &dyn Engine, n: u64) -> Vec<u8> {
        let mut buf = sector(0xff);
        engine.read_at(&mut buf, n * SECTOR).unwrap();
        buf
    }

    fn chain_names(engine: &MemEngine) -> Vec<String> {
        engine.disks().into_iter().map(|d| d.name).collect()
    }

    #[test]
    fn test_create_persists_metadata() {
        let dir = tempdir().unwrap();
        let factory = MemEngineFactory::new();
        let mut engine = factory.create(&params(dir.path())).unwrap();

        let info = FileMetadataReader.read(dir.path()).unwrap();
        assert_eq!(info.size, 64 * SECTOR);
        assert_eq!(info.sector_size, SECTOR);
        assert_eq!(info.head.as_deref(), Some("volume-head-000.img"));
        engine.close().unwrap();
    }

    #[test]
    fn test_write_read_and_dirty() {
        let dir = tempdir().unwrap();
        let factory = MemEngineFactory::new();
        let engine = factory.create(&params(dir.path())).unwrap();

        assert_eq!(read_sector(engine.as_ref(), 3), sector(0));
        engine.write_at(&sector(7), 3 * SECTOR).unwrap();
        assert_eq!(read_sector(engine.as_ref(), 3), sector(7));

        let info = engine.info();
        assert!(info.dirty);
        assert_eq!(info.revision_counter, 1);
        // Dirty flag reached the file
        assert!(FileMetadataReader.read(dir.path()).unwrap().dirty);
    }

    #[test]
    fn test_rejects_bad_ranges() {
        let dir = tempdir().unwrap();
        let factory = MemEngineFactory::new();
        let engine = factory.create(&params(dir.path())).unwrap();

        assert!(engine.write_at(&[1u8; 100], 0).is_err());
        assert!(engine.write_at(&sector(1), 10).is_err());
        assert!(engine.write_at(&sector(1), 64 * SECTOR).is_err());
    }

    #[test]
    fn test_snapshot_and_revert() {
        let dir = tempdir().unwrap();
        let factory = MemEngineFactory::new();
        let mut engine = factory.create(&params(dir.path())).unwrap();

        engine.write_at(&sector(1), 0).unwrap();
        engine.snapshot("s1", true, "2026-01-01T00:00:00Z").unwrap();
        engine.write_at(&sector(2), 0).unwrap();
        assert_eq!(read_sector(engine.as_ref(), 0), sector(2));
        assert!(engine.snapshot("s1", true, "").is_err());

        let reverted = engine.revert("s1", "2026-01-01T00:00:00Z").unwrap();
        assert_eq!(read_sector(reverted.as_ref(), 0), sector(1));
        // Old handle released its claim on the chain
        assert!(engine.snapshot("s2", false, "").is_err());
        assert!(engine.revert("missing", "").is_err());
    }

    #[test]
    fn test_prepare_remove_and_remove_keep_data() {
        let dir = tempdir().unwrap();
        let info = Info {
            size: 64 * SECTOR,
            sector_size: SECTOR,
            ..Default::default()
        };
        let mut engine = MemEngine {
            volume: Arc::new(Volume::new(dir.path().to_path_buf(), info)),
            closed: false,
        };

        engine.write_at(&sector(1), 0).unwrap();
        engine.snapshot("a", true, "").unwrap();
        engine.write_at(&sector(2), SECTOR).unwrap();
        engine.snapshot("b", true, "").unwrap();
        assert_eq!(
            chain_names(&engine),
            vec!["volume-snap-a.img", "volume-snap-b.img", "volume-head-002.img"]
        );

        // a's child is b, not the head: coalesce b into a, then replace b
        let actions = engine.prepare_remove_disk("volume-snap-a.img").unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].action, RemoveActionKind::Coalesce);
        assert_eq!(actions[0].source, "volume-snap-b.img");
        assert_eq!(actions[1].action, RemoveActionKind::Replace);

        // b's child is the head and b has a parent
        let actions = engine.prepare_remove_disk("volume-snap-b.img").unwrap();
        assert_eq!(actions[1].action, RemoveActionKind::Remove);
        assert_eq!(actions[1].target, "volume-snap-a.img");

        assert!(engine.prepare_remove_disk("volume-head-002.img").is_err());
        let disks = engine.disks();
        assert!(disks[0].removed && disks[0].user_created);
        assert_eq!(disks[1].sectors, 1);

        engine.remove_diff_disk("volume-snap-a.img").unwrap();
        assert_eq!(read_sector(&engine, 0), sector(1));
        assert_eq!(read_sector(&engine, 1), sector(2));
        assert!(engine.remove_diff_disk("volume-head-002.img").is_err());
    }

    #[test]
    fn test_replace_disk() {
        let dir = tempdir().unwrap();
        let factory = MemEngineFactory::new();
        let mut engine = factory.create(&params(dir.path())).unwrap();

        engine.write_at(&sector(1), 0).unwrap();
        engine.snapshot("a", true, "").unwrap();
        engine.write_at(&sector(2), 0).unwrap();
        engine.snapshot("b", true, "").unwrap();

        engine
            .replace_disk("volume-snap-b.img", "volume-snap-a.img")
            .unwrap();
        assert_eq!(read_sector(engine.as_ref(), 0), sector(2));
        assert!(engine
            .replace_disk("volume-head-002.img", "volume-snap-a.img")
            .is_err());
    }

    #[test]
    fn test_resize() {
        let dir = tempdir().unwrap();
        let factory = MemEngineFactory::new();
        let mut engine = factory.create(&params(dir.path())).unwrap();

        engine.resize("64K").unwrap();
        assert_eq!(engine.info().size, 64 * 1024);
        assert!(matches!(engine.resize("1K"), Err(Error::InvalidSize(_))));
        assert!(engine.resize("65537").is_err());
        assert_eq!(FileMetadataReader.read(dir.path()).unwrap().size, 64 * 1024);
    }

    #[test]
    fn test_usage_and_peer_details() {
        let dir = tempdir().unwrap();
        let factory = MemEngineFactory::new();
        let mut engine = factory.create(&params(dir.path())).unwrap();

        engine.write_at(&sector(1), 0).unwrap();
        engine.snapshot("a", true, "").unwrap();
        engine.write_at(&sector(2), 0).unwrap();
        engine.write_at(&sector(3), SECTOR).unwrap();

        let usage = engine.get_usage().unwrap();
        assert_eq!(usage.used_logical_blocks, 2);
        assert_eq!(usage.used_blocks, 3);
        assert_eq!(usage.revision_counter, 3);

        engine
            .update_peer_details(PeerDetails {
                replica_count: 3,
                quorum_replica_count: 2,
            })
            .unwrap();
        assert_eq!(engine.info().peer_count, 3);
    }

    #[test]
    fn test_reopen_keeps_data_and_delete_removes_meta() {
        let dir = tempdir().unwrap();
        let factory = MemEngineFactory::new();
        let mut engine = factory.create(&params(dir.path())).unwrap();
        engine.write_at(&sector(9), 0).unwrap();
        engine.close().unwrap();
        assert!(engine.write_at(&sector(9), 0).is_err());

        let mut engine = factory.create(&params(dir.path())).unwrap();
        assert_eq!(read_sector(engine.as_ref(), 0), sector(9));

        engine.close().unwrap();
        engine.delete().unwrap();
        assert!(FileMetadataReader.read(dir.path()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_reload_rejects_mismatched_sector_size() {
        let dir = tempdir().unwrap();
        let factory = MemEngineFactory::new();
        let engine = factory.create(&params(dir.path())).unwrap();
        engine.write_at(&sector(5), 0).unwrap();

        // `{}` parses with every field defaulted, sector size included
        std::fs::write(FileMetadataReader::meta_path(dir.path()), b"{}").unwrap();
        assert!(matches!(engine.reload(), Err(Error::Engine(_))));

        let mut other = FileMetadataReader.read(dir.path()).unwrap();
        other.size = 64 * SECTOR;
        other.sector_size = 4096;
        write_info(dir.path(), &other).unwrap();
        assert!(engine.reload().is_err());

        // The live handle keeps its geometry and keeps serving
        assert_eq!(engine.info().sector_size, SECTOR);
        assert_eq!(read_sector(engine.as_ref(), 0), sector(5));
        engine.write_at(&sector(6), SECTOR).unwrap();
    }
}
