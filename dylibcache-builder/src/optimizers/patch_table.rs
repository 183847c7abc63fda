//! Patch table : for each cache dylib's exported symbols,
//! the set of `(client dylib, bind-site cache offset)` locations that bound
//! to it, so a future single-dylib patch (root-library override) can find
//! every use without relinking the whole cache.

use std::collections::BTreeMap;

use dylibcache_types::VMOffset;

/// One client's use of a patched export: where in the cache the bound
/// pointer/GOT slot lives, expressed relative to that client's own cache
/// mapping ("recorded as a cache-relative offset, not a raw VM
/// address, so the table survives a cache slid to a different base").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchLocation {
    pub client_cache_index: u32,
    pub offset: VMOffset,
    pub addend: i64,
}

/// All patch locations for one exported symbol of one dylib.
#[derive(Debug, Clone, Default)]
pub struct PatchableExport {
    pub locations: Vec<PatchLocation>,
}

/// The full per-dylib patch table: `export name -> PatchableExport`, built
/// incrementally as the dylib pass resolves each
/// `BindTarget::CacheImage` bind site.
#[derive(Debug, Default)]
pub struct PatchTable {
    exports: BTreeMap<String, PatchableExport>,
}

impl PatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, export_name: &str, location: PatchLocation) {
        self.exports.entry(export_name.to_string()).or_default().locations.push(location);
    }

    pub fn locations_for(&self, export_name: &str) -> &[PatchLocation] {
        self.exports.get(export_name).map(|e| e.locations.as_slice()).unwrap_or(&[])
    }

    pub fn exported_names(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    /// Total patch-location count across every export, used by the
    /// prebuilt-loader size estimator.
    pub fn total_locations(&self) -> usize {
        self.exports.values().map(|e| e.locations.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate_per_export() {
        let mut table = PatchTable::new();
        table.record("_foo", PatchLocation { client_cache_index: 1, offset: VMOffset(0x10), addend: 0 });
        table.record("_foo", PatchLocation { client_cache_index: 2, offset: VMOffset(0x20), addend: 0 });
        assert_eq!(table.locations_for("_foo").len(), 2);
        assert_eq!(table.total_locations(), 2);
    }

    #[test]
    fn unknown_export_has_no_locations() {
        let table = PatchTable::new();
        assert!(table.locations_for("_missing").is_empty());
    }
}
