//! ObjC selector/class-name/protocol-name pools. Accumulates deduplicated
//! string pools via `indexmap::IndexMap` before a single serialization pass,
//! the way a symbol-table converter collects its string/file/function pools
//! before writing them out in one go; here the same shape backs three name
//! pools instead of one.

use indexmap::IndexMap;

use dylibcache_types::VMOffset;

/// The four-byte "magic selector" the design requires at offset 0 of the
/// selector-strings buffer, including its NUL terminator.
pub const MAGIC_SELECTOR_BYTES: [u8; 5] = [0xf0, 0x9f, 0xa4, 0xaf, 0x00];

/// A single canonical-name pool: a dense byte buffer of NUL-terminated
/// strings plus a `name -> VMOffset` index, built by merging per-dylib
/// candidate names in a fixed, deterministic order ("entries are consumed in
/// ascending dylib cache-index order to produce deterministic byte output").
#[derive(Debug, Default)]
pub struct NamePool {
    buffer: Vec<u8>,
    offsets: IndexMap<String, VMOffset>,
}

impl NamePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the pool with the magic selector at offset 0. Only selector
    /// pools use this; class/protocol pools start empty.
    pub fn new_selector_pool() -> Self {
        let mut pool = Self::new();
        pool.buffer.extend_from_slice(&MAGIC_SELECTOR_BYTES);
        pool
    }

    /// Inserts `name` if not already present, returning its offset either
    /// way. This is how duplicate selector/class/protocol names across
    /// dylibs collapse to one canonical buffer position.
    pub fn insert(&mut self, name: &str) -> VMOffset {
        if let Some(&offset) = self.offsets.get(name) {
            return offset;
        }
        let offset = VMOffset(self.buffer.len() as i64);
        self.buffer.extend_from_slice(name.as_bytes());
        self.buffer.push(0);
        self.offsets.insert(name.to_string(), offset);
        offset
    }

    /// Inserts names that must occupy the smallest offsets first.
    pub fn insert_priority_then(&mut self, priority: impl IntoIterator<Item = String>, rest: impl IntoIterator<Item = String>) {
        for name in priority {
            self.insert(&name);
        }
        for name in rest {
            self.insert(&name);
        }
    }

    pub fn offset_of(&self, name: &str) -> Option<VMOffset> {
        self.offsets.get(name).copied()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// A multimap pool for class/protocol names: duplicates across dylibs are
/// *retained* ("duplicates are retained because the runtime must observe all
/// class-name duplicates"), unlike the deduplicated [`NamePool`] used for
/// selectors.
#[derive(Debug, Default)]
pub struct MultiNamePool {
    entries: Vec<(String, u32, dylibcache_types::InputDylibVMAddress)>,
}

impl MultiNamePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one `(name -> (vm_address, dylib cache-index))` occurrence.
    pub fn push(&mut self, name: impl Into<String>, dylib_cache_index: u32, vm_address: dylibcache_types::InputDylibVMAddress) {
        self.entries.push((name.into(), dylib_cache_index, vm_address));
    }

    /// Every occurrence of `name`, in insertion order.
    pub fn lookup_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = (u32, dylibcache_types::InputDylibVMAddress)> + 'a {
        self.entries.iter().filter(move |(n, _, _)| n == name).map(|(_, idx, addr)| (*idx, *addr))
    }

    pub fn entries(&self) -> &[(String, u32, dylibcache_types::InputDylibVMAddress)] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_pool_starts_with_magic_bytes() {
        let pool = NamePool::new_selector_pool();
        assert_eq!(&pool.buffer()[..5], &MAGIC_SELECTOR_BYTES);
    }

    #[test]
    fn selector_pool_dedupes_and_returns_same_offset() {
        let mut pool = NamePool::new_selector_pool();
        let a1 = pool.insert("foo");
        let a2 = pool.insert("foo");
        assert_eq!(a1, a2);
        assert_eq!(pool.offset_of("foo"), Some(a1));
    }

    #[test]
    fn priority_selectors_get_smaller_offsets() {
        let mut pool = NamePool::new_selector_pool();
        pool.insert_priority_then(
            vec!["imp_candidate".to_string()],
            vec!["later_selector".to_string()],
        );
        let imp_off = pool.offset_of("imp_candidate").unwrap();
        let later_off = pool.offset_of("later_selector").unwrap();
        assert!(imp_off.raw() < later_off.raw());
    }

    #[test]
    fn class_name_duplicates_are_retained() {
        let mut pool = MultiNamePool::new();
        pool.push("X", 0, dylibcache_types::InputDylibVMAddress(0x100));
        pool.push("X", 1, dylibcache_types::InputDylibVMAddress(0x200));
        let all: Vec<_> = pool.lookup_all("X").collect();
        assert_eq!(all.len(), 2);
    }
}
