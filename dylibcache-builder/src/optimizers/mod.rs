//! The Optimizers phase: per-acceleration-structure
//! computation that runs once over every categorized input dylib, ahead of
//! per-dylib layout and rewriting.

pub mod imp_cache;
pub mod name_pools;
pub mod patch_table;
pub mod perfect_hash;
pub mod prebuilt_loader;
pub mod stubs;
pub mod swift_conformance;
pub mod trie;

pub use imp_cache::{build_imp_cache, imp_caches_eligible, ImpCache, ImpCacheCandidate, ImpCacheEntry, ImpCacheHeader};
pub use name_pools::{MultiNamePool, NamePool, MAGIC_SELECTOR_BYTES};
pub use patch_table::{PatchLocation, PatchTable, PatchableExport};
pub use perfect_hash::{combined_hash, jenkins_lookup8, Entry, PerfectHashTable};
pub use prebuilt_loader::{PrebuiltLoaderEstimate, PrebuiltLoaderHeader, PrebuiltLoaderSet, PREBUILT_LOADER_MAGIC};
pub use stubs::{StubDisposition, StubOptimizer};
pub use swift_conformance::{build_conformance_tables, lookup_type_conformance, ConformanceCandidate, SwiftConformanceTables};
pub use trie::PathTrie;
