//! Strongly typed addresses, scalars, and shared enumerations used across
//! the dylibcache-builder workspace. This crate exists purely to give every
//! other crate in the workspace a single, dependency-light vocabulary to
//! share, the way a workspace's lowest-level crate anchors types for its
//! sibling crates to build on.

mod address;
mod enums;

pub use address::{CacheFileOffset, CacheFileSize, CacheVMAddress, CacheVMSize, InputDylibVMAddress, VMOffset};
pub use enums::{
    CacheKind, CodeSigningDigestMode, DependentKind, LayoutMode, LocalSymbolsMode, Platform,
    RegionKind, SubCacheKind,
};
