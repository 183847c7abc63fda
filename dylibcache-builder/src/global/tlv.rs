//! `optimize_tlvs`: allocates pthread TSD keys for dylibs with
//! thread-local-variable sections and rewrites their TLV thunk triples to
//! call directly into `tlv_get_addr`.

/// One `(thunk, key, offset)` triple found in a dylib's `__DATA,__thread_vars`
/// (or the auth-pointer variant), rewritten in place to
/// `(tlv_get_addr, key, offset)`.
#[derive(Debug, Clone, Copy)]
pub struct TlvThunkSite {
    pub dylib_cache_index: u32,
    pub site_offset: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct TlvDescriptorRange {
    pub first_key: u32,
    pub last_key: u32,
}

#[derive(Debug, Default)]
pub struct TlvOptimizer {
    next_key: u32,
    last_key: u32,
    assigned: Vec<(u32, u32)>, // (dylib_cache_index, key)
}

impl TlvOptimizer {
    /// Starts key allocation at `range.first_key`, stopping once
    /// `range.last_key` is exceeded.
    pub fn new(range: TlvDescriptorRange) -> Self {
        Self { next_key: range.first_key, last_key: range.last_key, assigned: Vec::new() }
    }

    /// Allocates the next pthread key for `dylib_cache_index`, or `None`
    /// if the range is exhausted ("Stop (with a warning) when
    /// keys are exhausted").
    pub fn allocate_key(&mut self, dylib_cache_index: u32) -> Option<u32> {
        if self.next_key > self.last_key {
            return None;
        }
        let key = self.next_key;
        self.next_key += 1;
        self.assigned.push((dylib_cache_index, key));
        Some(key)
    }

    pub fn assigned(&self) -> &[(u32, u32)] {
        &self.assigned
    }
}

/// Rewrites a TLV thunk triple in place: the thunk-pointer word becomes
/// `tlv_get_addr_address`, the key word becomes the assigned pthread key,
/// and the offset word is left untouched.
pub fn rewrite_tlv_thunk(buffer: &mut [u8], site: &TlvThunkSite, tlv_get_addr_address: u64, key: u32) {
    let offset = site.site_offset as usize;
    if let Some(slot) = buffer.get_mut(offset..offset + 8) {
        slot.copy_from_slice(&tlv_get_addr_address.to_le_bytes());
    }
    if let Some(slot) = buffer.get_mut(offset + 8..offset + 16) {
        slot.copy_from_slice(&(key as u64).to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_allocation_stops_when_range_is_exhausted() {
        let mut optimizer = TlvOptimizer::new(TlvDescriptorRange { first_key: 10, last_key: 11 });
        assert_eq!(optimizer.allocate_key(0), Some(10));
        assert_eq!(optimizer.allocate_key(1), Some(11));
        assert_eq!(optimizer.allocate_key(2), None);
    }

    #[test]
    fn rewrite_sets_thunk_and_key_words() {
        let mut buffer = vec![0u8; 24];
        let site = TlvThunkSite { dylib_cache_index: 0, site_offset: 0 };
        rewrite_tlv_thunk(&mut buffer, &site, 0xdead_beef, 3);
        assert_eq!(u64::from_le_bytes(buffer[0..8].try_into().unwrap()), 0xdead_beef);
        assert_eq!(u64::from_le_bytes(buffer[8..16].try_into().unwrap()), 3);
    }
}
