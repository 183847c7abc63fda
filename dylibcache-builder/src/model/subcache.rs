//! [`SubCache`]: one emitted file.

use dylibcache_types::SubCacheKind;
use uuid::Uuid;

use crate::error::{BuilderError, Result};

use super::region::Region;

/// Stable identity for a [`SubCache`] inside a [`SubCacheArena`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubCacheId(pub(crate) u32);

/// Where a sub-cache's bytes live while being built ("either an
/// anonymous VM allocation or an mmap of a temp file; the choice is fixed at
/// allocation").
pub enum Backing {
    Memory(Vec<u8>),
    TempFile { file: tempfile::NamedTempFile, mmap: memmap2::MmapMut },
}

impl Backing {
    pub fn new_memory(size: usize) -> Self {
        Backing::Memory(vec![0u8; size])
    }

    pub fn new_temp_file(size: usize) -> Result<Self> {
        let file = tempfile::NamedTempFile::new().map_err(|source| BuilderError::IoFailure {
            path: std::env::temp_dir(),
            source,
        })?;
        file.as_file()
            .set_len(size as u64)
            .map_err(|source| BuilderError::IoFailure { path: file.path().to_path_buf(), source })?;
        // SAFETY: the temp file is exclusively owned by this `Backing` and
        // not concurrently mapped elsewhere.
        let mmap = unsafe { memmap2::MmapMut::map_mut(file.as_file()) }
            .map_err(|source| BuilderError::IoFailure { path: file.path().to_path_buf(), source })?;
        Ok(Backing::TempFile { file, mmap })
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Memory(v) => v,
            Backing::TempFile { mmap, .. } => mmap,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Backing::Memory(v) => v,
            Backing::TempFile { mmap, .. } => mmap,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Backing::TempFile { mmap, file } = self {
            mmap.flush()
                .map_err(|source| BuilderError::IoFailure { path: file.path().to_path_buf(), source })?;
        }
        Ok(())
    }

    pub fn write_to(&self, mut w: impl std::io::Write) -> std::io::Result<()> {
        w.write_all(self.as_slice())
    }
}

impl std::fmt::Debug for Backing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backing::Memory(v) => f.debug_tuple("Memory").field(&v.len()).finish(),
            Backing::TempFile { mmap, .. } => f.debug_tuple("TempFile").field(&mmap.len()).finish(),
        }
    }
}

/// One emitted cache file.
#[derive(Debug)]
pub struct SubCache {
    pub kind: SubCacheKind,
    pub file_suffix: String,
    pub regions: Vec<Region>,
    /// For main caches: the sub-caches that attach as children.
    pub children: Vec<SubCacheId>,
    pub buffer: Option<Backing>,
    pub uuid: Option<Uuid>,
    pub cd_hash: Option<[u8; 20]>,
    /// Serialized cache header bytes, written by the finalizer once a main
    /// cache's children have all been code-signed. Empty for sub-caches that
    /// are not a main cache.
    pub header_bytes: Vec<u8>,
}

impl SubCache {
    pub fn new(kind: SubCacheKind, file_suffix: impl Into<String>) -> Self {
        use dylibcache_types::RegionKind::*;
        let regions = [Text, DataConst, Data, Auth, AuthConst, Linkedit, Unmapped, DynamicConfig, CodeSignature]
            .into_iter()
            .map(Region::new)
            .collect();
        Self {
            kind,
            file_suffix: file_suffix.into(),
            regions,
            children: Vec::new(),
            buffer: None,
            uuid: None,
            cd_hash: None,
            header_bytes: Vec::new(),
        }
    }

    pub fn region_mut(&mut self, kind: dylibcache_types::RegionKind) -> &mut Region {
        self.regions.iter_mut().find(|r| r.kind == kind).expect("all region kinds pre-created")
    }

    pub fn region(&self, kind: dylibcache_types::RegionKind) -> &Region {
        self.regions.iter().find(|r| r.kind == kind).expect("all region kinds pre-created")
    }

    /// Removes regions with no chunks ("empty Regions are removed
    /// at finalize time").
    pub fn drop_empty_regions(&mut self) {
        self.regions.retain(|r| !r.is_empty());
    }

    pub fn total_file_size(&self) -> u64 {
        self.regions.iter().map(|r| r.sub_cache_file_size.raw()).sum()
    }
}

/// Owns every [`SubCache`] created during a build. Reserved to its final
/// capacity before any cross-sub-cache pointer (main -> children) is
/// recorded, per "reserve container to final capacity before
/// index-style references are taken" rule.
#[derive(Debug, Default)]
pub struct SubCacheArena {
    sub_caches: Vec<SubCache>,
}

impl SubCacheArena {
    pub fn with_capacity(cap: usize) -> Self {
        Self { sub_caches: Vec::with_capacity(cap) }
    }

    pub fn insert(&mut self, sub_cache: SubCache) -> SubCacheId {
        assert!(
            self.sub_caches.len() < self.sub_caches.capacity(),
            "SubCacheArena must be reserved to final capacity before inserting"
        );
        let id = SubCacheId(self.sub_caches.len() as u32);
        self.sub_caches.push(sub_cache);
        id
    }

    pub fn get(&self, id: SubCacheId) -> &SubCache {
        &self.sub_caches[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SubCacheId) -> &mut SubCache {
        &mut self.sub_caches[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.sub_caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_caches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SubCacheId, &SubCache)> {
        self.sub_caches.iter().enumerate().map(|(i, s)| (SubCacheId(i as u32), s))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SubCacheId, &mut SubCache)> {
        self.sub_caches.iter_mut().enumerate().map(|(i, s)| (SubCacheId(i as u32), s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_capacity_is_enforced() {
        let mut arena = SubCacheArena::with_capacity(1);
        let id = arena.insert(SubCache::new(SubCacheKind::MainDevelopment, "development"));
        assert_eq!(id, SubCacheId(0));
    }

    #[test]
    #[should_panic(expected = "reserved to final capacity")]
    fn overflowing_reserved_capacity_panics() {
        let mut arena = SubCacheArena::with_capacity(1);
        arena.insert(SubCache::new(SubCacheKind::MainDevelopment, "development"));
        arena.insert(SubCache::new(SubCacheKind::Sub, "01"));
    }
}
