//! `emit_symbol_table` and `emit_unmapped_local_symbols`.

use dylibcache_types::LocalSymbolsMode;

/// One symbol entry destined for the cache-wide, deduplicated symbol
/// string pool plus its nlist record.
#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub dylib_cache_index: u32,
    pub name: String,
    pub value: u64,
    pub is_local: bool,
    pub is_text: bool,
}

/// The merged, deduplicated symbol-string buffer and per-entry string
/// offsets, mapped symbols only (locals excluded when `mode` says so).
#[derive(Debug, Default)]
pub struct SymbolTable {
    pub string_pool: Vec<u8>,
    pub offsets: Vec<(u32, u64, u32)>, // (dylib_cache_index, value, string_offset)
}

/// A separate `.symbols` sub-cache payload, populated only when
/// `local_symbols_mode` is `Unmap`: text symbols are replaced by
/// `<redacted>`, everything else is dropped.
#[derive(Debug, Default)]
pub struct UnmappedLocalSymbols {
    pub entries: Vec<SymbolEntry>,
}

#[tracing::instrument(level = "trace", skip_all, fields(entry_count = entries.len(), ?mode))]
pub fn emit_symbol_table(entries: &[SymbolEntry], mode: LocalSymbolsMode) -> (SymbolTable, Option<UnmappedLocalSymbols>) {
    let mut table = SymbolTable::default();
    let mut dedup = std::collections::HashMap::new();

    let mapped = entries.iter().filter(|e| !e.is_local || mode == LocalSymbolsMode::Keep);
    for entry in mapped {
        let offset = *dedup.entry(entry.name.clone()).or_insert_with(|| {
            let offset = table.string_pool.len() as u32;
            table.string_pool.extend_from_slice(entry.name.as_bytes());
            table.string_pool.push(0);
            offset
        });
        table.offsets.push((entry.dylib_cache_index, entry.value, offset));
    }

    let unmapped = if mode == LocalSymbolsMode::Unmap {
        let redacted: Vec<SymbolEntry> = entries
            .iter()
            .filter(|e| e.is_local)
            .filter_map(|e| {
                if e.is_text {
                    Some(SymbolEntry { name: "<redacted>".to_string(), ..e.clone() })
                } else {
                    None
                }
            })
            .collect();
        Some(UnmappedLocalSymbols { entries: redacted })
    } else {
        None
    };

    (table, unmapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, is_local: bool, is_text: bool) -> SymbolEntry {
        SymbolEntry { dylib_cache_index: 0, name: name.to_string(), value: 0, is_local, is_text }
    }

    #[test]
    fn keep_mode_retains_locals_in_mapped_table() {
        let entries = vec![entry("_foo", false, false), entry("_local", true, false)];
        let (table, unmapped) = emit_symbol_table(&entries, LocalSymbolsMode::Keep);
        assert_eq!(table.offsets.len(), 2);
        assert!(unmapped.is_none());
    }

    #[test]
    fn unmap_mode_redacts_text_locals_and_drops_the_rest() {
        let entries = vec![entry("_foo", false, false), entry("_local_text", true, true), entry("_local_data", true, false)];
        let (table, unmapped) = emit_symbol_table(&entries, LocalSymbolsMode::Unmap);
        assert_eq!(table.offsets.len(), 1);
        let unmapped = unmapped.unwrap();
        assert_eq!(unmapped.entries.len(), 1);
        assert_eq!(unmapped.entries[0].name, "<redacted>");
    }
}
