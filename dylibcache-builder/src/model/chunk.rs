//! [`Chunk`]: a contiguous byte range destined for the cache. Chunks are
//! held in an append-only [`ChunkArena`] and referenced everywhere else by
//! [`ChunkId`], per the "arena + indices" strategy this design recommends in
//! place of the original's raw back-pointers. Once a `ChunkId` is handed
//! out, the arena never invalidates it: the arena only grows, and allocation
//! (`allocate_sub_cache_buffers`) mutates a chunk's fields in place rather
//! than moving it.

use dylibcache_types::{CacheFileOffset, CacheFileSize, CacheVMAddress, CacheVMSize};

/// Stable, opaque identity for a [`Chunk`] inside a [`ChunkArena`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ChunkId(pub(crate) u32);

/// What a chunk's bytes represent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChunkKind {
    /// A raw segment copied from an input dylib.
    DylibSegment { dylib_index: u32, segment_name: String },
    /// A sub-piece of a dylib's linkedit (symbol table, string table,...).
    LinkeditData { dylib_index: u32, piece: LinkeditPiece },
    /// A synthesized, cache-wide acceleration table.
    Synthesized(SynthesizedKind),
}

/// Which linkedit sub-piece a [`ChunkKind::LinkeditData`] chunk holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LinkeditPiece {
    SymbolTable,
    StringTable,
    IndirectSymbolTable,
    FunctionStarts,
    ExportTrie,
}

/// Which cache-wide synthesized structure a chunk holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SynthesizedKind {
    SelectorStrings,
    ClassNames,
    ProtocolNames,
    ClassHashTable,
    ProtocolHashTable,
    SelectorHashTable,
    ImpCaches,
    CanonicalProtocols,
    SwiftTypeConformanceTable,
    SwiftMetadataConformanceTable,
    SwiftForeignConformanceTable,
    DylibTrie,
    PatchTable,
    PrebuiltLoaders,
    UniquedGots,
    SymbolStrings,
    SymbolNlist,
    SlideInfo,
}

/// A contiguous byte range destined for the cache.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub name: String,
    pub alignment: u64,
    /// File size within its owning sub-cache, set at
    /// optimizer/categorization time.
    pub sub_cache_file_size: CacheFileSize,
    /// VM size within its owning sub-cache; may exceed `sub_cache_file_size`
    /// only for a zero-fill tail ("Zero-fill chunks are permitted only at
    /// the end of a region").
    pub cache_vm_size: CacheVMSize,
    pub is_zero_fill: bool,
    /// Populated by `allocate_sub_cache_buffers`.
    pub sub_cache_file_offset: Option<CacheFileOffset>,
    /// Populated by the VM layout pass.
    pub cache_vm_address: Option<CacheVMAddress>,
}

impl Chunk {
    pub fn new(kind: ChunkKind, name: impl Into<String>, alignment: u64, size: CacheFileSize) -> Self {
        Self {
            kind,
            name: name.into(),
            alignment,
            sub_cache_file_size: size,
            cache_vm_size: CacheVMSize(size.raw()),
            is_zero_fill: false,
            sub_cache_file_offset: None,
            cache_vm_address: None,
        }
    }

    pub fn new_zero_fill(kind: ChunkKind, name: impl Into<String>, alignment: u64, vm_size: CacheVMSize) -> Self {
        Self {
            kind,
            name: name.into(),
            alignment,
            sub_cache_file_size: CacheFileSize(0),
            cache_vm_size: vm_size,
            is_zero_fill: true,
            sub_cache_file_offset: None,
            cache_vm_address: None,
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.sub_cache_file_offset.is_some() || self.is_zero_fill
    }
}

/// Append-only owner of every [`Chunk`] created during the build.
#[derive(Debug, Default)]
pub struct ChunkArena {
    chunks: Vec<Chunk>,
}

impl ChunkArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chunk: Chunk) -> ChunkId {
        let id = ChunkId(self.chunks.len() as u32);
        self.chunks.push(chunk);
        id
    }

    pub fn get(&self, id: ChunkId) -> &Chunk {
        &self.chunks[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ChunkId) -> &mut Chunk {
        &mut self.chunks[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChunkId, &Chunk)> {
        self.chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (ChunkId(i as u32), c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_stay_stable_across_inserts() {
        let mut arena = ChunkArena::new();
        let a = arena.insert(Chunk::new(
            ChunkKind::Synthesized(SynthesizedKind::SelectorStrings),
            "sel",
            8,
            CacheFileSize(16),
        ));
        let b = arena.insert(Chunk::new(
            ChunkKind::Synthesized(SynthesizedKind::ClassNames),
            "cls",
            8,
            CacheFileSize(32),
        ));
        assert_ne!(a, b);
        assert_eq!(arena.get(a).name, "sel");
        assert_eq!(arena.get(b).name, "cls");
    }
}
