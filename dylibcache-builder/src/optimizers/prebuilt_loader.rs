//! Prebuilt-loader estimation and serialization, grounded
//! on `original_source/dyld/PrebuiltLoader.h`'s `PrebuiltLoaderSet` layout:
//! a header, followed by a `uint32_t[]` offset table into per-loader
//! records, each record describing one dylib's (or one executable's)
//! already-bound dependents, segments, and fixups.

use dylibcache_types::CacheVMSize;

/// One cache dylib's or one executable's prebuilt loader, sized before the
/// layouter runs so `subCacheStubsLimit`-style budgeting (the design Open
/// Question) can reserve space ahead of the real bind/fixup pass.
#[derive(Debug, Clone)]
pub struct PrebuiltLoaderEstimate {
    pub dependent_count: u32,
    pub segment_count: u32,
    pub bind_target_count: u32,
    pub fixup_count: u32,
}

/// `#[repr(C)]` on-disk record header, whose field order and sizes mirror
/// `dyld4::PrebuiltLoader::BindTargetTable` plus the fixed-size leading
/// fields of `dyld4::PrebuiltLoader`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PrebuiltLoaderHeader {
    pub magic: u32,
    pub info_version: u16,
    pub layout_version: u8,
    pub ref_count: u8,
    pub dependent_count: u32,
    pub segment_count: u32,
    pub bind_target_count: u32,
    pub fixups_count: u32,
}

pub const PREBUILT_LOADER_MAGIC: u32 = 0x5042_4c44; // "PBLD"

impl PrebuiltLoaderEstimate {
    /// `sizeof(header) + dependent_count*4 + segment_count*sizeof(SegInfo)
    /// + bind_target_count*sizeof(BindTargetRef) + fixup_count*8`, the
    /// per-record estimator the layouter sums across every dylib to budget
    /// the `PrebuiltLoaders` region.
    pub fn estimated_byte_size(&self) -> usize {
        const SEG_INFO_SIZE: usize = 12;
        const BIND_TARGET_REF_SIZE: usize = 8;
        const FIXUP_SIZE: usize = 8;
        std::mem::size_of::<PrebuiltLoaderHeader>()
            + self.dependent_count as usize * 4
            + self.segment_count as usize * SEG_INFO_SIZE
            + self.bind_target_count as usize * BIND_TARGET_REF_SIZE
            + self.fixup_count as usize * FIXUP_SIZE
    }

    pub fn estimated_cache_vm_size(&self) -> CacheVMSize {
        CacheVMSize(self.estimated_byte_size() as u64)
    }

    pub fn header(&self) -> PrebuiltLoaderHeader {
        PrebuiltLoaderHeader {
            magic: PREBUILT_LOADER_MAGIC,
            info_version: 1,
            layout_version: 1,
            ref_count: 0,
            dependent_count: self.dependent_count,
            segment_count: self.segment_count,
            bind_target_count: self.bind_target_count,
            fixups_count: self.fixup_count,
        }
    }
}

/// The `PrebuiltLoaderSet` for every cache dylib, plus the keyed-by-path
/// set for executables ("executables get their own
/// PrebuiltLoaderSet, keyed by install path, separate from the cache
/// dylibs' set").
#[derive(Debug, Default)]
pub struct PrebuiltLoaderSet {
    pub dylib_loaders: Vec<PrebuiltLoaderEstimate>,
    pub executable_loaders: Vec<(String, PrebuiltLoaderEstimate)>,
}

impl PrebuiltLoaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_estimated_size(&self) -> CacheVMSize {
        let dylibs: u64 = self.dylib_loaders.iter().map(|e| e.estimated_byte_size() as u64).sum();
        let execs: u64 = self.executable_loaders.iter().map(|(_, e)| e.estimated_byte_size() as u64).sum();
        CacheVMSize(dylibs + execs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_grows_with_each_component() {
        let small = PrebuiltLoaderEstimate { dependent_count: 0, segment_count: 0, bind_target_count: 0, fixup_count: 0 };
        let large = PrebuiltLoaderEstimate { dependent_count: 4, segment_count: 4, bind_target_count: 10, fixup_count: 20 };
        assert!(large.estimated_byte_size() > small.estimated_byte_size());
        assert_eq!(small.estimated_byte_size(), std::mem::size_of::<PrebuiltLoaderHeader>());
    }

    #[test]
    fn header_carries_magic_and_counts() {
        let est = PrebuiltLoaderEstimate { dependent_count: 2, segment_count: 3, bind_target_count: 1, fixup_count: 5 };
        let header = est.header();
        assert_eq!(header.magic, PREBUILT_LOADER_MAGIC);
        assert_eq!(header.dependent_count, 2);
        assert_eq!(header.fixups_count, 5);
    }

    #[test]
    fn set_sums_dylib_and_executable_estimates() {
        let mut set = PrebuiltLoaderSet::new();
        set.dylib_loaders.push(PrebuiltLoaderEstimate { dependent_count: 1, segment_count: 1, bind_target_count: 1, fixup_count: 1 });
        set.executable_loaders.push((
            "/usr/bin/true".to_string(),
            PrebuiltLoaderEstimate { dependent_count: 1, segment_count: 1, bind_target_count: 1, fixup_count: 1 },
        ));
        assert_eq!(set.total_estimated_size().raw(), set.dylib_loaders[0].estimated_byte_size() as u64 * 2);
    }
}
