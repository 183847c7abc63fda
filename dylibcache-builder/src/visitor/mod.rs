//! The reference-chasing visitor model for walking metadata of in-flight
//! libraries. Grounded on `original_source/common/MetadataVisitor.h`'s
//! `Visitor` class, which is specialized at compile time (via `#if` blocks)
//! over three address-space shapes. Here that collapses into one concrete
//! visitor whose methods dispatch on a tagged [`AddressSpace`] instead.

mod macho_access;
mod objc;
mod resolved_value;
mod swift;

pub use macho_access::{DependentLibrary, MachOAccess, Section, Segment as MachOSegment};
pub use objc::{demangle_swift_protocol_name, ObjcClass, ObjcMethod, ObjcProtocol, ObjcVisitor};
pub use resolved_value::{AddressSpace, ResolvedAddress, ResolvedValue, Visitor};
pub use swift::{ConformanceTypeRef, SwiftConformance, SwiftVisitor};
