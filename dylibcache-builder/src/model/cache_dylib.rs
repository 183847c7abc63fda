//! [`CacheDylib`]: an input dylib promoted into the cache.

use dylibcache_types::{CacheVMAddress, DependentKind, InputDylibVMAddress};

use super::chunk::ChunkId;
use super::subcache::SubCacheId;

/// One dependency edge, recorded by `calculate_dylib_dependents`. `target`
/// is `None` only for a weak-link edge whose dependency is entirely absent
/// from the cache (the "break-on-weak rule").
#[derive(Debug, Clone)]
pub struct Dependent {
    pub kind: DependentKind,
    pub target: Option<u32>,
    pub raw_path: String,
}

/// The segment-adjustor: translates an [`InputDylibVMAddress`] range into a
/// cache-side buffer location and [`CacheVMAddress`] range (the design step
/// 2).
#[derive(Debug, Clone)]
pub struct SegmentAdjustment {
    pub segment_name: String,
    pub input_vm_start: InputDylibVMAddress,
    pub input_vm_end: InputDylibVMAddress,
    pub cache_vm_start: CacheVMAddress,
    pub chunk: ChunkId,
}

#[derive(Debug, Default, Clone)]
pub struct SplitSegAdjustor {
    segments: Vec<SegmentAdjustment>,
}

impl SplitSegAdjustor {
    pub fn add_segment(&mut self, adjustment: SegmentAdjustment) {
        self.segments.push(adjustment);
    }

    /// Translates an on-disk address into its cache VM address, or `None` if
    /// the address does not fall inside any registered segment.
    pub fn translate(&self, addr: InputDylibVMAddress) -> Option<CacheVMAddress> {
        self.segments.iter().find_map(|seg| {
            if addr.raw() >= seg.input_vm_start.raw() && addr.raw() < seg.input_vm_end.raw() {
                let delta = addr.raw() - seg.input_vm_start.raw();
                Some(CacheVMAddress(seg.cache_vm_start.raw() + delta))
            } else {
                None
            }
        })
    }

    pub fn segments(&self) -> &[SegmentAdjustment] {
        &self.segments
    }
}

/// How an external bind target was classified.
#[derive(Debug, Clone)]
pub enum BindTarget {
    Absolute(u64),
    CacheImage { dylib_cache_index: u32, cache_vm_address: CacheVMAddress },
    InputImage { dylib_cache_index: u32, cache_vm_address: CacheVMAddress },
}

/// An input dylib promoted into the cache.
#[derive(Debug, Clone)]
pub struct CacheDylib {
    pub install_name: String,
    pub path: String,
    /// Dense 0..N index assigned by `sort_dylibs`; `u32::MAX` until then.
    pub cache_index: u32,
    pub input_load_address: InputDylibVMAddress,
    pub segment_chunks: Vec<ChunkId>,
    pub linkedit_chunks: Vec<ChunkId>,
    pub dependents: Vec<Dependent>,
    pub bind_targets: Vec<BindTarget>,
    pub indirect_symbol_table: Vec<u32>,
    pub adjustor: SplitSegAdjustor,
    pub assigned_sub_cache: Option<SubCacheId>,
    pub has_objc: bool,
    pub has_swift: bool,
    pub has_thread_local_variables: bool,
    pub exported_symbols: Vec<String>,
    /// Real path after alias/symlink resolution.
    pub real_path: Option<String>,
}

impl CacheDylib {
    pub fn new(install_name: impl Into<String>, path: impl Into<String>, input_load_address: InputDylibVMAddress) -> Self {
        Self {
            install_name: install_name.into(),
            path: path.into(),
            cache_index: u32::MAX,
            input_load_address,
            segment_chunks: Vec::new(),
            linkedit_chunks: Vec::new(),
            dependents: Vec::new(),
            bind_targets: Vec::new(),
            indirect_symbol_table: Vec::new(),
            adjustor: SplitSegAdjustor::default(),
            assigned_sub_cache: None,
            has_objc: false,
            has_swift: false,
            has_thread_local_variables: false,
            exported_symbols: Vec::new(),
            real_path: None,
        }
    }

    /// Every non-weak entry must resolve to a surviving dylib (the design
    /// property 1).
    pub fn non_weak_dependents_resolved(&self) -> bool {
        self.dependents
            .iter()
            .all(|d| matches!(d.kind, DependentKind::WeakLink) || d.target.is_some())
    }
}
