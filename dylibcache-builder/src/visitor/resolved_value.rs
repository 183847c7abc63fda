//! [`Visitor`] and [`ResolvedValue`]: the address-space-polymorphic pointer
//! chaser the design calls for in place of the original's build-time
//! polymorphism over "cache builder form" vs "on-disk form". One tagged
//! [`AddressSpace`] replaces the `#if SUPPORT_VM_LAYOUT` / `#if
//! POINTERS_ARE_UNSLID` branching in
//! `original_source/common/MetadataVisitor.h`; a single concrete [`Visitor`]
//! dispatches on it.

use dylibcache_types::{CacheVMAddress, InputDylibVMAddress};

/// Which address space a [`Visitor`]'s buffer lives in.
#[derive(Debug, Clone, Copy)]
pub enum AddressSpace {
    /// A dylib already copied into its sub-cache buffer, walked during
    /// `DylibPassRunner`/`GlobalEmitters`.
    InCache { base: CacheVMAddress },
    /// An on-disk dylib or executable, not yet promoted into cache form
    /// (used by `InputRegistry::verify_self_contained` and alias resolution,
    /// which must walk dependency dylibs before they exist in cache form).
    OnDisk { chain_base: InputDylibVMAddress },
}

/// A resolved pointer-chase result: a byte location inside the visitor's
/// buffer, tagged with its VM address in whichever space the visitor is
/// walking. Neither field is ever synthesized without going through
/// [`Visitor::get_field`] or one of the `resolve_*` methods, matching
/// "accessor discipline so neither side is synthesized incorrectly".
#[derive(Debug, Clone, Copy)]
pub struct ResolvedValue<'a> {
    data: &'a [u8],
    offset: usize,
    pub vm_address: ResolvedAddress,
}

/// The VM address half of a [`ResolvedValue`], tagged by address kind so it
/// can never be compared across kinds ("MUST NOT be implicitly converted").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedAddress {
    Cache(CacheVMAddress),
    Input(InputDylibVMAddress),
}

impl<'a> ResolvedValue<'a> {
    pub fn bytes(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    pub fn read_u64_le(&self) -> Option<u64> {
        self.bytes().get(..8).map(|b| u64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_u32_le(&self) -> Option<u32> {
        self.bytes().get(..4).map(|b| u32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_cstr(&self) -> Option<&'a str> {
        let bytes = self.bytes();
        let end = bytes.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&bytes[..end]).ok()
    }
}

/// Walks a single Mach-O's in-flight bytes, chasing rebase/bind pointers
/// without caring whether the bytes are an on-disk dylib or a dylib already
/// copied into its cache buffer.
pub struct Visitor<'a> {
    data: &'a [u8],
    address_space: AddressSpace,
    /// Base VM address of `data[0]`, in whichever space `address_space` is.
    base_vm_address: u64,
    pointer_size: u32,
}

impl<'a> Visitor<'a> {
    pub fn new(data: &'a [u8], address_space: AddressSpace, base_vm_address: u64, pointer_size: u32) -> Self {
        Self { data, address_space, base_vm_address, pointer_size }
    }

    fn tag_address(&self, vm_addr: u64) -> ResolvedAddress {
        match self.address_space {
            AddressSpace::InCache { .. } => ResolvedAddress::Cache(CacheVMAddress(vm_addr)),
            AddressSpace::OnDisk { .. } => ResolvedAddress::Input(InputDylibVMAddress(vm_addr)),
        }
    }

    /// Returns a [`ResolvedValue`] for a byte offset within the visitor's
    /// buffer, computing its VM address from `base_vm_address`. This is the
    /// visitor's only way to manufacture a [`ResolvedValue`] from a raw
    /// offset; all other accessors dereference an existing one.
    pub fn get_value_at_offset(&self, offset: usize) -> Option<ResolvedValue<'a>> {
        if offset > self.data.len() {
            return None;
        }
        let vm_address = self.base_vm_address + offset as u64;
        Some(ResolvedValue { data: self.data, offset, vm_address: self.tag_address(vm_address) })
    }

    /// Finds the given VM address within the visitor's tracked buffer and
    /// returns a `ResolvedValue` pointing at it (`getValueFor`).
    pub fn get_value_for(&self, vm_addr: u64) -> Option<ResolvedValue<'a>> {
        let offset = vm_addr.checked_sub(self.base_vm_address)?;
        self.get_value_at_offset(offset as usize)
    }

    /// Returns a child value at a field offset from `parent`, without
    /// dereferencing.
    pub fn get_field(&self, parent: &ResolvedValue<'a>, field_offset: usize) -> Option<ResolvedValue<'a>> {
        self.get_value_at_offset(parent.offset + field_offset)
    }

    /// Dereferences `value` as a rebase pointer. Returns `None` if the
    /// stored pointer is null.
    pub fn resolve_optional_rebase(&self, value: &ResolvedValue<'a>) -> Option<ResolvedValue<'a>> {
        let raw = if self.pointer_size == 8 { value.read_u64_le()? } else { value.read_u32_le()? as u64 };
        if raw == 0 {
            return None;
        }
        self.get_value_for(raw)
    }

    /// As [`Visitor::resolve_optional_rebase`], but the pointer is required
    /// to be non-null.
    pub fn resolve_rebase(&self, value: &ResolvedValue<'a>) -> Option<ResolvedValue<'a>> {
        self.resolve_optional_rebase(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_field_and_resolve_rebase_chase_a_pointer() {
        let mut buf = vec![0u8; 32];
        // buf[0..8] is a pointer field pointing at vm address 0x1000 + 16.
        buf[0..8].copy_from_slice(&16u64.to_le_bytes());
        let visitor = Visitor::new(&buf, AddressSpace::OnDisk { chain_base: InputDylibVMAddress(0x1000) }, 0x1000, 8);
        let root = visitor.get_value_at_offset(0).unwrap();
        let field = visitor.get_field(&root, 0).unwrap();
        let target = visitor.resolve_rebase(&field).unwrap();
        assert_eq!(target.vm_address, ResolvedAddress::Input(InputDylibVMAddress(0x1010)));
    }

    #[test]
    fn cache_and_input_addresses_are_never_equal_variants() {
        let cache = ResolvedAddress::Cache(CacheVMAddress(0x10));
        let input = ResolvedAddress::Input(InputDylibVMAddress(0x10));
        assert_ne!(cache, input);
    }
}
