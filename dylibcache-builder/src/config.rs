//! Recognized configuration options.

use std::collections::{BTreeMap, BTreeSet};

use dylibcache_types::{CacheKind, CodeSigningDigestMode, LayoutMode, LocalSymbolsMode, Platform};

/// Controls ObjC IMP-cache generation; kept as an opaque blob (/// "`objcOptimizations`: JSON blob controlling IMP-cache generation") since
/// the blob's schema is owned by the caller, not the builder core.
pub type ObjcOptimizationsBlob = serde_json_like::Value;

/// A tiny JSON-shaped value used only to carry the opaque
/// `objcOptimizations` blob through configuration without pulling in a JSON
/// dependency the core never otherwise needs. Real callers populate this
/// from their own JSON layer (the emission of which is explicitly out of
/// scope per convention).
pub mod serde_json_like {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub enum Value {
        #[default]
        Null,
        Bool(bool),
        Number(f64),
        String(String),
        Array(Vec<Value>),
        Object(std::collections::BTreeMap<String, Value>),
    }
}

/// Full builder configuration, covering every option the design enumerates.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub platform: Platform,
    pub kind: CacheKind,
    pub local_symbols_mode: LocalSymbolsMode,
    pub code_signing_digest_mode: CodeSigningDigestMode,
    pub dylibs_removed_from_disk: bool,
    pub force_development_sub_cache_suffix: bool,
    /// install-name -> priority, ascending. Consumed by `sort_dylibs`.
    pub dylib_ordering: BTreeMap<String, u32>,
    /// dylib path -> priority, used when sorting `__DATA_DIRTY`.
    pub dirty_data_segment_ordering: BTreeMap<String, u32>,
    pub objc_optimizations: ObjcOptimizationsBlob,
    pub archs: Vec<String>,
    pub cache_size: u64,
    pub cache_base_address: u64,
    pub slide_info_format: SlideInfoFormat,
    pub slide_info_page_size: u32,
    pub page_size: u32,
    pub layout_mode: LayoutMode,
    pub sub_cache_text_limit: u64,
    pub sub_cache_stubs_limit: u64,
    pub region_padding: u64,
    pub region_alignment: u64,
    pub all_linkedit_in_last_sub_cache: bool,
    pub allowed_missing_weak_dylibs: BTreeSet<String>,
    pub log_prefix: String,
    pub print_stats: bool,
}

/// Slide-info page encoding version.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SlideInfoFormat {
    V1,
    V2,
    V3,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            platform: Platform::MacOS,
            kind: CacheKind::Development,
            local_symbols_mode: LocalSymbolsMode::Keep,
            code_signing_digest_mode: CodeSigningDigestMode::Sha256Only,
            dylibs_removed_from_disk: false,
            force_development_sub_cache_suffix: false,
            dylib_ordering: BTreeMap::new(),
            dirty_data_segment_ordering: BTreeMap::new(),
            objc_optimizations: ObjcOptimizationsBlob::default(),
            archs: vec!["arm64e".to_string()],
            // 4 GiB: the historical single-file cache ceiling this design
            // inherits for the `Regular`/`LargeContiguous` layout modes.
            cache_size: 4 * 1024 * 1024 * 1024,
            cache_base_address: 0x1_8000_0000,
            slide_info_format: SlideInfoFormat::V3,
            slide_info_page_size: 16 * 1024,
            page_size: 16 * 1024,
            layout_mode: LayoutMode::Regular,
            sub_cache_text_limit: 1000 * 1024 * 1024,
            // Heuristic threshold noted as an Open Question in the design; kept
            // as configuration rather than a hardcoded constant.
            sub_cache_stubs_limit: 110 * 1024 * 1024,
            region_padding: 0x4000,
            region_alignment: 0x4000,
            all_linkedit_in_last_sub_cache: true,
            allowed_missing_weak_dylibs: BTreeSet::new(),
            log_prefix: String::new(),
            print_stats: false,
        }
    }
}

impl BuilderConfig {
    /// Whether IMP-cache generation is eligible under the static gates of
    /// the design ("enabled only for 64-bit, cache < 4 GiB, specific
    /// platform, and when libobjc exports the required offsets section").
    /// The libobjc-offsets-section check happens later, per dylib; this is
    /// just the build-wide portion of the gate.
    pub fn imp_caches_eligible(&self) -> bool {
        self.cache_size < 4 * 1024 * 1024 * 1024
            && matches!(self.platform, Platform::MacOS | Platform::IOS | Platform::IOSMac)
    }
}
