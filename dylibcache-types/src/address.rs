//! The three address kinds used throughout the builder, plus the strongly
//! typed scalars that measure them. These types deliberately do not
//! implement `From`/`Into` between each other: an [`InputDylibVMAddress`]
//! and a [`CacheVMAddress`] both wrap a `u64`, but adding one to the other,
//! or comparing them, is always a bug. Conversion only ever happens through
//! an explicit rule (a segment adjustor, a base-address addition), never
//! implicitly.

use std::fmt;
use std::ops::{Add, Sub};

macro_rules! address_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(pub u64);

        impl $name {
            /// Returns the raw address value.
            pub const fn raw(self) -> u64 {
                self.0
            }

            /// Adds a [`VMOffset`] to this address.
            pub fn add_offset(self, offset: VMOffset) -> Self {
                Self(self.0.wrapping_add(offset.0 as u64))
            }

            /// Returns the offset from `self` to `other`, or `None` if
            /// `other < self`.
            pub fn checked_offset_to(self, other: Self) -> Option<VMOffset> {
                other.0.checked_sub(self.0).map(|v| VMOffset(v as i64))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{:x})", stringify!($name), self.0)
            }
        }
    };
}

address_newtype!(
    /// An address in the original, on-disk dylib's preferred VM space. Never
    /// compared or added to a [`CacheVMAddress`] directly.
    InputDylibVMAddress
);

address_newtype!(
    /// An address in the final, laid-out shared-cache VM space.
    CacheVMAddress
);

/// A signed delta between two VM addresses of the *same* kind.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VMOffset(pub i64);

impl VMOffset {
    /// Returns the raw signed value.
    pub const fn raw(self) -> i64 {
        self.0
    }
}

impl Add for VMOffset {
    type Output = VMOffset;
    fn add(self, rhs: VMOffset) -> VMOffset {
        VMOffset(self.0 + rhs.0)
    }
}

impl Sub for VMOffset {
    type Output = VMOffset;
    fn sub(self, rhs: VMOffset) -> VMOffset {
        VMOffset(self.0 - rhs.0)
    }
}

impl CacheVMAddress {
    /// Returns the offset from `base` to `self`, saturating at zero if `self
    /// < base`.
    pub fn vm_offset_from(self, base: CacheVMAddress) -> VMOffset {
        VMOffset(self.0 as i64 - base.0 as i64)
    }
}

macro_rules! scalar_newtype {
    ($(#[$meta:meta])* $name:ident : $repr:ty) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(pub $repr);

        impl $name {
            /// Returns the raw value.
            pub const fn raw(self) -> $repr {
                self.0
            }

            /// Rounds up to the given alignment, which must be a power of
            /// two.
            pub fn aligned_up(self, align: $repr) -> Self {
                debug_assert!(align.is_power_of_two());
                Self((self.0 + align - 1) & !(align - 1))
            }
        }

        impl Add for $name {
            type Output = $name;
            fn add(self, rhs: $name) -> $name {
                $name(self.0 + rhs.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

scalar_newtype!(
    /// A byte offset into a sub-cache's output file.
    CacheFileOffset: u64
);

scalar_newtype!(
    /// A byte length measured in the sub-cache's output file.
    CacheFileSize: u64
);

scalar_newtype!(
    /// A byte length measured in the final cache VM space (may exceed the
    /// file size for zero-fill tails).
    CacheVMSize: u64
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_kinds_do_not_mix() {
        let input = InputDylibVMAddress(0x1000);
        let cache = CacheVMAddress(0x2000);
        // Both are plain u64 newtypes; the type system is the only thing
        // stopping `input == cache` from compiling, which is the point.
        assert_eq!(input.raw(), 0x1000);
        assert_eq!(cache.raw(), 0x2000);
    }

    #[test]
    fn vm_offset_from_is_signed() {
        let base = CacheVMAddress(0x4000);
        let addr = CacheVMAddress(0x3000);
        assert_eq!(addr.vm_offset_from(base), VMOffset(-0x1000));
    }

    #[test]
    fn aligned_up_rounds_to_page() {
        let size = CacheFileSize(0x4001);
        assert_eq!(size.aligned_up(0x4000).raw(), 0x8000);
        assert_eq!(CacheFileSize(0x4000).aligned_up(0x4000).raw(), 0x4000);
    }
}
