//! `emit_uniqued_gots`: deduplicates GOT entries across a
//! sub-cache's DATA_CONST/AUTH_CONST regions.

use std::collections::BTreeMap;

/// What a GOT entry points at, before dedup.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GotKey {
    pub target_install_name: String,
    pub target_symbol_name: String,
    pub pointer_metadata: u16,
}

/// One (dylib, offset) site whose GOT slot must be rewritten to the
/// deduplicated slot index once dedup completes.
#[derive(Debug, Clone, Copy)]
pub struct GotUseSite {
    pub dylib_cache_index: u32,
    pub offset_in_dylib: u64,
}

#[derive(Debug, Default)]
pub struct GotDeduplicator {
    entries: BTreeMap<GotKey, Vec<GotUseSite>>,
}

impl GotDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: GotKey, site: GotUseSite) {
        self.entries.entry(key).or_default().push(site);
    }

    /// Orders deduplicated keys libSystem.B first, then `/usr/lib/system/*`,
    /// then lexicographic install-name, then symbol name.
    pub fn ordered_slots(&self) -> Vec<(&GotKey, &[GotUseSite])> {
        let mut keys: Vec<&GotKey> = self.entries.keys().collect();
        keys.sort_by(|a, b| got_sort_rank(a).cmp(&got_sort_rank(b)));
        keys.into_iter().map(|k| (k, self.entries[k].as_slice())).collect()
    }

    pub fn slot_index_of(&self, key: &GotKey) -> Option<usize> {
        self.ordered_slots().iter().position(|(k, _)| *k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn got_sort_rank(key: &GotKey) -> (u8, String, String) {
    let rank = if key.target_install_name.ends_with("libSystem.B.dylib") {
        0
    } else if key.target_install_name.starts_with("/usr/lib/system/") {
        1
    } else {
        2
    };
    (rank, key.target_install_name.clone(), key.target_symbol_name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(install_name: &str, symbol: &str) -> GotKey {
        GotKey { target_install_name: install_name.into(), target_symbol_name: symbol.into(), pointer_metadata: 0 }
    }

    #[test]
    fn duplicate_keys_share_one_slot_with_all_use_sites() {
        let mut dedup = GotDeduplicator::new();
        let k = key("/usr/lib/libSystem.B.dylib", "malloc");
        dedup.record(k.clone(), GotUseSite { dylib_cache_index: 0, offset_in_dylib: 0 });
        dedup.record(k.clone(), GotUseSite { dylib_cache_index: 1, offset_in_dylib: 8 });
        assert_eq!(dedup.len(), 1);
        assert_eq!(dedup.ordered_slots()[0].1.len(), 2);
    }

    #[test]
    fn libsystem_b_sorts_before_other_system_libs_and_others() {
        let mut dedup = GotDeduplicator::new();
        dedup.record(key("/usr/lib/libZZZ.dylib", "z"), GotUseSite { dylib_cache_index: 0, offset_in_dylib: 0 });
        dedup.record(key("/usr/lib/system/libcommonCrypto.dylib", "c"), GotUseSite { dylib_cache_index: 0, offset_in_dylib: 0 });
        dedup.record(key("/usr/lib/libSystem.B.dylib", "malloc"), GotUseSite { dylib_cache_index: 0, offset_in_dylib: 0 });
        let ordered = dedup.ordered_slots();
        assert_eq!(ordered[0].0.target_install_name, "/usr/lib/libSystem.B.dylib");
        assert_eq!(ordered[1].0.target_install_name, "/usr/lib/system/libcommonCrypto.dylib");
        assert_eq!(ordered[2].0.target_install_name, "/usr/lib/libZZZ.dylib");
    }
}
