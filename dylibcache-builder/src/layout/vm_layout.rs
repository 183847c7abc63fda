//! VM layout algorithms: contiguous, discontiguous-simulator, and
//! discontiguous (Rosetta-reserving) address assignment for one sub-cache's
//! regions.

use dylibcache_types::{CacheFileOffset, CacheVMAddress, CacheVMSize, RegionKind};

use crate::error::{BuilderError, Result};
use crate::error::Capacity;
use crate::model::SubCache;

const PAGE_SIZE: u64 = 16 * 1024;
const GIB: u64 = 1024 * 1024 * 1024;

fn align_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    (value + align - 1) / align * align
}

/// Walks regions in a fixed permission order, inserting `region_padding`
/// bytes whenever the permission class changes, and assigns sequential file
/// offsets and VM addresses.
pub fn layout_contiguous(sub_cache: &mut SubCache, base_vm_address: CacheVMAddress, region_padding: u64, cache_size: u64) -> Result<CacheVMSize> {
    let mut file_offset = 0u64;
    let mut vm_address = base_vm_address.raw();
    let start_vm_address = vm_address;

    for region in sub_cache.regions.iter_mut() {
        if region.is_empty() {
            continue;
        }
        vm_address = align_up(vm_address, PAGE_SIZE) + if vm_address > start_vm_address { region_padding } else { 0 };
        file_offset = align_up(file_offset, PAGE_SIZE);

        region.sub_cache_file_offset = Some(CacheFileOffset(file_offset));
        region.sub_cache_vm_address = Some(CacheVMAddress(vm_address));

        file_offset += region.sub_cache_file_size.raw();
        vm_address += region.sub_cache_vm_size.raw();
    }

    let total = vm_address.saturating_sub(start_vm_address);
    if total > cache_size {
        return Err(BuilderError::CapacityExceeded { capacity: Capacity::WholeCache, needed: total, available: cache_size });
    }
    Ok(CacheVMSize(total))
}

/// Fixed TEXT/DATA/LINKEDIT bands, each a hard ceiling (the design
/// "DiscontiguousSim (x86_64 simulator)").
pub struct DiscontiguousSimBands {
    pub text_base: u64,
    pub text_size: u64,
    pub data_base: u64,
    pub data_size: u64,
    pub linkedit_base: u64,
    pub linkedit_size: u64,
}

pub fn layout_discontiguous_sim(sub_cache: &mut SubCache, bands: &DiscontiguousSimBands) -> Result<()> {
    let mut file_offset = 0u64;
    for region in sub_cache.regions.iter_mut() {
        if region.is_empty() {
            continue;
        }
        let (band_base, band_size) = match region.kind {
            RegionKind::Text => (bands.text_base, bands.text_size),
            RegionKind::Linkedit => (bands.linkedit_base, bands.linkedit_size),
            _ => (bands.data_base, bands.data_size),
        };
        if region.sub_cache_vm_size.raw() > band_size {
            return Err(BuilderError::CapacityExceeded {
                capacity: Capacity::Region,
                needed: region.sub_cache_vm_size.raw(),
                available: band_size,
            });
        }
        region.sub_cache_vm_address = Some(CacheVMAddress(band_base));
        file_offset = align_up(file_offset, PAGE_SIZE);
        region.sub_cache_file_offset = Some(CacheFileOffset(file_offset));
        file_offset += region.sub_cache_file_size.raw();
    }
    Ok(())
}

/// One main sub-cache starts on a 1 GiB boundary; inside it, 1 GiB of
/// padding is inserted whenever write permission toggles, and slack is
/// reserved after the RW and RO regions for Rosetta translation caches.
pub fn layout_discontiguous(sub_cache: &mut SubCache, gib_aligned_base: CacheVMAddress) -> Result<CacheVMSize> {
    let base = align_up(gib_aligned_base.raw(), GIB);
    let mut vm_address = base;

    let writable_order = [RegionKind::Data, RegionKind::DataConst, RegionKind::Auth, RegionKind::AuthConst];
    let readonly_order = [RegionKind::Text, RegionKind::Linkedit];

    for region in sub_cache.regions.iter_mut() {
        if region.is_empty() {
            continue;
        }
        let is_writable = writable_order.contains(&region.kind);
        let is_readonly = readonly_order.contains(&region.kind);
        if !is_writable && !is_readonly {
            continue;
        }
        region.sub_cache_vm_address = Some(CacheVMAddress(vm_address));
        vm_address += region.sub_cache_vm_size.raw();

        if is_writable {
            let next_boundary = align_up(vm_address, GIB);
            let slack = next_boundary - vm_address;
            vm_address += slack / 2;
        } else {
            vm_address += GIB;
            let linkedit_tail_slack = align_up(vm_address, PAGE_SIZE) - vm_address;
            vm_address += linkedit_tail_slack;
        }
    }

    Ok(CacheVMSize(vm_address - base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dylibcache_types::{CacheFileSize, SubCacheKind};
    use crate::model::{Chunk, ChunkArena, ChunkKind, SynthesizedKind};

    fn sub_cache_with_text_and_data() -> (SubCache, ChunkArena) {
        let mut arena = ChunkArena::new();
        let text_chunk = arena.insert(Chunk::new(ChunkKind::Synthesized(SynthesizedKind::SelectorStrings), "t", 8, CacheFileSize(100)));
        let data_chunk = arena.insert(Chunk::new(ChunkKind::Synthesized(SynthesizedKind::ClassNames), "d", 8, CacheFileSize(50)));
        let mut sub_cache = SubCache::new(SubCacheKind::MainDevelopment, "development");
        sub_cache.region_mut(RegionKind::Text).push_chunk(&arena, text_chunk);
        sub_cache.region_mut(RegionKind::Data).push_chunk(&arena, data_chunk);
        (sub_cache, arena)
    }

    #[test]
    fn contiguous_layout_assigns_increasing_addresses() {
        let (mut sub_cache, _arena) = sub_cache_with_text_and_data();
        let total = layout_contiguous(&mut sub_cache, CacheVMAddress(0x1_8000_0000), PAGE_SIZE, 1 << 32).unwrap();
        let text_addr = sub_cache.region(RegionKind::Text).sub_cache_vm_address.unwrap();
        let data_addr = sub_cache.region(RegionKind::Data).sub_cache_vm_address.unwrap();
        assert!(data_addr.raw() > text_addr.raw());
        assert!(total.raw() > 0);
    }

    #[test]
    fn contiguous_layout_rejects_overflow() {
        let (mut sub_cache, _arena) = sub_cache_with_text_and_data();
        let err = layout_contiguous(&mut sub_cache, CacheVMAddress(0), PAGE_SIZE, 10).unwrap_err();
        assert!(matches!(err, BuilderError::CapacityExceeded { .. }));
    }

    #[test]
    fn discontiguous_sim_rejects_region_exceeding_its_band() {
        let (mut sub_cache, _arena) = sub_cache_with_text_and_data();
        let bands = DiscontiguousSimBands { text_base: 0, text_size: 10, data_base: 0x1000_0000, data_size: 1 << 20, linkedit_base: 0x2000_0000, linkedit_size: 1 << 20 };
        let err = layout_discontiguous_sim(&mut sub_cache, &bands).unwrap_err();
        assert!(matches!(err, BuilderError::CapacityExceeded { .. }));
    }
}
