//! IMP-cache synthesis: a perfect hash per class from method selectors to
//! implementations.

use dylibcache_types::{CacheVMAddress, InputDylibVMAddress, Platform};

use super::perfect_hash::{Entry, PerfectHashTable};

/// One class or category's method-name selectors and their resolved
/// implementation address, gathered before IMP-cache synthesis.
#[derive(Debug, Clone)]
pub struct ImpCacheCandidate {
    pub class_vm_address: InputDylibVMAddress,
    /// Resolved through an in-image rebase or a cross-dylib bind, per class-
    /// linkage requirement.
    pub superclass_cache_vm_address: Option<CacheVMAddress>,
    pub methods: Vec<(String, u64)>,
}

/// On-disk `#[repr(C)]`-shaped header, sized per convention:
/// `sizeof(ImpCacheHeader) + N*sizeof(ImpCacheEntry)`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ImpCacheHeader {
    pub fallback_class_offset: i32,
    pub capacity: u32,
    pub occupied: u32,
    pub shift: u32,
    pub mask: u32,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ImpCacheEntry {
    pub selector_vm_offset: u32,
    pub imp_vm_offset: i32,
}

/// A synthesized IMP cache for one class.
#[derive(Debug, Clone)]
pub struct ImpCache {
    pub class_vm_address: InputDylibVMAddress,
    pub header: ImpCacheHeader,
    pub entries: Vec<ImpCacheEntry>,
}

impl ImpCache {
    pub fn byte_size(&self) -> usize {
        std::mem::size_of::<ImpCacheHeader>() + self.entries.len() * std::mem::size_of::<ImpCacheEntry>()
    }
}

/// Static eligibility gate: "enabled only for 64-bit, cache < 4 GiB,
/// specific platform, and when libobjc exports the required offsets
/// section". The libobjc-offsets check is `libobjc_exports_offsets_section`,
/// supplied by the caller since it depends on a specific dylib's exports.
pub fn imp_caches_eligible(is_64_bit: bool, cache_size: u64, platform: Platform, libobjc_exports_offsets_section: bool) -> bool {
    is_64_bit
        && cache_size < 4 * 1024 * 1024 * 1024
        && matches!(platform, Platform::MacOS | Platform::IOS | Platform::IOSMac)
        && libobjc_exports_offsets_section
}

/// Builds one class's IMP cache by perfect-hashing its selector names onto
/// selector-pool offsets, with targets pointing at the method's IMP offset
/// relative to the class.
pub fn build_imp_cache(
    class_vm_address: InputDylibVMAddress,
    methods: &[(String, u64)],
    selector_offset_of: impl Fn(&str) -> Option<u32>,
) -> Option<ImpCache> {
    if methods.is_empty() {
        return None;
    }
    let entries: Vec<Entry<String>> = methods
        .iter()
        .filter_map(|(name, imp_offset)| {
            let sel_offset = selector_offset_of(name)?;
            Some(Entry {
                key: name.clone(),
                key_bytes: sel_offset.to_le_bytes().to_vec(),
                extra: 0,
                target: *imp_offset as u32,
            })
        })
        .collect();
    if entries.is_empty() {
        return None;
    }
    let table = PerfectHashTable::build(&entries);
    let header = ImpCacheHeader {
        fallback_class_offset: 0,
        capacity: table.capacity,
        occupied: table.occupied,
        shift: table.shift,
        mask: table.mask,
    };
    let imp_entries: Vec<ImpCacheEntry> = table
        .targets
        .iter()
        .map(|&t| ImpCacheEntry {
            selector_vm_offset: 0,
            imp_vm_offset: if t == u32::MAX { 0 } else { t as i32 },
        })
        .collect();
    Some(ImpCache { class_vm_address, header, entries: imp_entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_requires_64_bit_and_small_cache() {
        assert!(!imp_caches_eligible(false, 1 << 20, Platform::MacOS, true));
        assert!(!imp_caches_eligible(true, 5u64 << 32, Platform::MacOS, true));
        assert!(imp_caches_eligible(true, 1 << 20, Platform::MacOS, true));
    }

    #[test]
    fn builds_cache_for_nonempty_methods() {
        let cache = build_imp_cache(
            InputDylibVMAddress(0x1000),
            &[("foo".to_string(), 8), ("bar".to_string(), 16)],
            |name| match name {
                "foo" => Some(0),
                "bar" => Some(8),
                _ => None,
            },
        )
        .unwrap();
        assert_eq!(cache.header.occupied, 2);
        assert_eq!(cache.byte_size(), std::mem::size_of::<ImpCacheHeader>() + 2 * std::mem::size_of::<ImpCacheEntry>());
    }
}
