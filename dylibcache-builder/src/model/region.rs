//! [`Region`]: a permission-homogeneous span within one sub-cache.

use dylibcache_types::{CacheFileOffset, CacheFileSize, CacheVMAddress, CacheVMSize, RegionKind};

use super::chunk::{Chunk, ChunkArena, ChunkId};

/// A permission-homogeneous span inside a sub-cache. Chunks are appended in
/// layout order; the region owns none of them (see [`ChunkArena`]).
#[derive(Debug, Clone)]
pub struct Region {
    pub kind: RegionKind,
    chunk_ids: Vec<ChunkId>,
    pub sub_cache_file_offset: Option<CacheFileOffset>,
    pub sub_cache_file_size: CacheFileSize,
    pub sub_cache_vm_address: Option<CacheVMAddress>,
    pub sub_cache_vm_size: CacheVMSize,
}

impl Region {
    pub fn new(kind: RegionKind) -> Self {
        Self {
            kind,
            chunk_ids: Vec::new(),
            sub_cache_file_offset: None,
            sub_cache_file_size: CacheFileSize(0),
            sub_cache_vm_address: None,
            sub_cache_vm_size: CacheVMSize(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    pub fn chunk_ids(&self) -> &[ChunkId] {
        &self.chunk_ids
    }

    /// Appends a chunk, padding to its alignment first. Returns the vm
    /// offset at which the chunk's file contents would start relative to the
    /// region's own start-of-file-data, after accounting for already-
    /// appended zero-fill chunks. Invariant: zero-fill chunks are permitted
    /// only at the end of a region, and must not be followed by file-backed
    /// chunks in the same region.
    pub fn push_chunk(&mut self, arena: &ChunkArena, id: ChunkId) {
        let chunk = arena.get(id);
        if let Some(&last) = self.chunk_ids.last() {
            let last_chunk = arena.get(last);
            debug_assert!(
                !last_chunk.is_zero_fill,
                "region {:?}: appended a chunk after a zero-fill chunk",
                self.kind
            );
        }
        let padded_vm = align_up(self.sub_cache_vm_size.raw(), chunk.alignment);
        self.sub_cache_vm_size = dylibcache_types::CacheVMSize(padded_vm + chunk.cache_vm_size.raw());
        if !chunk.is_zero_fill {
            let padded_file = align_up(self.sub_cache_file_size.raw(), chunk.alignment);
            self.sub_cache_file_size =
                dylibcache_types::CacheFileSize(padded_file + chunk.sub_cache_file_size.raw());
        }
        self.chunk_ids.push(id);
    }

    /// Fills in each of this region's chunks' `sub_cache_file_offset`/
    /// `cache_vm_address`, replaying the same alignment walk `push_chunk`
    /// used to size the region, now that the region itself has a concrete
    /// file offset and VM address. This is `allocate_sub_cache_buffers`'s
    /// per-region chunk pass, run once VM layout has assigned the region's
    /// own placement.
    pub fn allocate_chunk_offsets(&self, arena: &mut ChunkArena) {
        let Some(file_base) = self.sub_cache_file_offset else { return };
        let vm_base = self.sub_cache_vm_address;
        let mut file_cursor = 0u64;
        let mut vm_cursor = 0u64;
        for &id in &self.chunk_ids {
            let alignment = arena.get(id).alignment;
            vm_cursor = align_up(vm_cursor, alignment);
            if let Some(vm_base) = vm_base {
                arena.get_mut(id).cache_vm_address = Some(CacheVMAddress(vm_base.raw() + vm_cursor));
            }
            if !arena.get(id).is_zero_fill {
                file_cursor = align_up(file_cursor, alignment);
                arena.get_mut(id).sub_cache_file_offset = Some(CacheFileOffset(file_base.raw() + file_cursor));
                file_cursor += arena.get(id).sub_cache_file_size.raw();
            }
            vm_cursor += arena.get(id).cache_vm_size.raw();
        }
    }

    pub fn validate_no_file_backed_after_zero_fill(&self, arena: &ChunkArena) -> bool {
        let mut seen_zero_fill = false;
        for &id in &self.chunk_ids {
            let c = arena.get(id);
            if seen_zero_fill && !c.is_zero_fill {
                return false;
            }
            seen_zero_fill |= c.is_zero_fill;
        }
        true
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    let align = align.max(1);
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::chunk::{Chunk, ChunkKind, SynthesizedKind};

    #[test]
    fn zero_fill_must_trail_the_region() {
        let mut arena = ChunkArena::new();
        let a = arena.insert(Chunk::new(
            ChunkKind::Synthesized(SynthesizedKind::SelectorStrings),
            "a",
            8,
            CacheFileSize(16),
        ));
        let z = arena.insert(Chunk::new_zero_fill(
            ChunkKind::Synthesized(SynthesizedKind::SlideInfo),
            "z",
            8,
            CacheVMSize(16),
        ));
        let mut region = Region::new(RegionKind::Data);
        region.push_chunk(&arena, a);
        region.push_chunk(&arena, z);
        assert!(region.validate_no_file_backed_after_zero_fill(&arena));

        let b = arena.insert(Chunk::new(
            ChunkKind::Synthesized(SynthesizedKind::ClassNames),
            "b",
            8,
            CacheFileSize(8),
        ));
        // Manually simulate an invalid append (bypassing the debug_assert
        // path by pushing directly) to exercise the validator.
        region.chunk_ids.push(b);
        assert!(!region.validate_no_file_backed_after_zero_fill(&arena));
    }

    #[test]
    fn allocate_chunk_offsets_assigns_increasing_addresses_per_chunk() {
        let mut arena = ChunkArena::new();
        let a = arena.insert(Chunk::new(ChunkKind::Synthesized(SynthesizedKind::SelectorStrings), "a", 8, CacheFileSize(16)));
        let b = arena.insert(Chunk::new(ChunkKind::Synthesized(SynthesizedKind::ClassNames), "b", 8, CacheFileSize(8)));
        let mut region = Region::new(RegionKind::Text);
        region.push_chunk(&arena, a);
        region.push_chunk(&arena, b);
        region.sub_cache_file_offset = Some(CacheFileOffset(0x4000));
        region.sub_cache_vm_address = Some(CacheVMAddress(0x1_8000_0000));

        region.allocate_chunk_offsets(&mut arena);

        let a_off = arena.get(a).sub_cache_file_offset.unwrap();
        let b_off = arena.get(b).sub_cache_file_offset.unwrap();
        assert_eq!(a_off.raw(), 0x4000);
        assert_eq!(b_off.raw(), 0x4000 + 16);
        assert!(arena.get(b).cache_vm_address.unwrap().raw() > arena.get(a).cache_vm_address.unwrap().raw());
    }
}
