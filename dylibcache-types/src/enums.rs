//! Small shared enumerations referenced by configuration and by
//! the data model that more than one builder module needs, kept
//! here so `dylibcache-builder`'s modules don't have to depend on each other
//! just to share a tag.

/// Target platform for the cache build; gates several per-platform checks
/// (IMP-cache eligibility, iOSMac dual-platform input matching, Rosetta
/// reservations in the discontiguous x86_64 layout).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Platform {
    MacOS,
    IOS,
    IOSMac,
    DriverKit,
    TvOS,
    WatchOS,
}

impl Platform {
    /// Whether this platform additionally accepts iOSMac-tagged slices for
    /// the same file, per convention `add_file`.
    pub fn accepts_ios_mac_dual_match(self) -> bool {
        matches!(self, Platform::MacOS)
    }
}

/// Overall cache build kind; `Universal` additionally splits stub regions
/// into development/customer sub-caches.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CacheKind {
    Development,
    Universal,
}

/// How local (non-exported) symbols are handled in the emitted symbol table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LocalSymbolsMode {
    Keep,
    Unmap,
    Strip,
}

/// Code-signature digest mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CodeSigningDigestMode {
    Sha256Only,
    Sha1Only,
    Agile,
}

/// VM layout policy selection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LayoutMode {
    /// One sub-cache, contiguous arm64-style layout.
    Regular,
    /// Multiple sub-caches, contiguous layout, split on `subCacheTextLimit`.
    LargeContiguous,
    /// `LargeContiguous` plus stub-region splitting for universal caches.
    LargeUniversal,
    /// Fixed TEXT/DATA/LINKEDIT bands, x86_64 simulator.
    DiscontiguousSim,
    /// 1 GiB-aligned sub-caches with Rosetta slack reservation, x86_64.
    Discontiguous,
}

/// Dependency edge kind recorded in `CacheDylib::dependents` (the design
/// `calculate_dylib_dependents`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DependentKind {
    Normal,
    WeakLink,
    Reexport,
    Upward,
}

/// Permission-homogeneous region kinds within a sub-cache.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegionKind {
    Text,
    DataConst,
    Data,
    Auth,
    AuthConst,
    Linkedit,
    Unmapped,
    DynamicConfig,
    CodeSignature,
}

/// What kind of file a sub-cache is.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubCacheKind {
    MainDevelopment,
    MainCustomer,
    Sub,
    StubsDevelopment,
    StubsCustomer,
    Symbols,
}

impl SubCacheKind {
    /// Whether this sub-cache is one of the two "main" roots that other
    /// sub-caches attach to by pointer (the design ownership rules).
    pub fn is_main(self) -> bool {
        matches!(self, SubCacheKind::MainDevelopment | SubCacheKind::MainCustomer)
    }

    /// The conventional file suffix fragment for this kind, used by
    /// `SubCacheLayouter`'s deterministic suffix assignment.
    pub fn suffix_kind_name(self) -> &'static str {
        match self {
            SubCacheKind::MainDevelopment => "development",
            SubCacheKind::MainCustomer => "",
            SubCacheKind::Sub => "sub",
            SubCacheKind::StubsDevelopment => "stubs.development",
            SubCacheKind::StubsCustomer => "stubs",
            SubCacheKind::Symbols => "symbols",
        }
    }
}
