//! `GlobalEmitters`: the sequential post-dylib-pass phase that
//! dedupes GOTs, canonicalizes ObjC protocols, emits hash tables, the
//! Swift conformance tables, the patch table, prebuilt-loader sets, slide
//! info, and symbol tables.

pub mod canonical_protocols;
pub mod got;
pub mod objc_headers;
pub mod slide_info;
pub mod swift_tables;
pub mod symbol_table;
pub mod tlv;

pub use canonical_protocols::{elect_canonical_protocols, CanonicalProtocol, ProtocolCandidate};
pub use got::{GotDeduplicator, GotKey, GotUseSite};
pub use objc_headers::{build_header_info_entry, compute_objc_class_layout, ClassLayout, ObjcHeaderInfoEntry};
pub use slide_info::{compute_slide_info, SlideInfo, SlideInfoPage, TrackedFixup};
pub use swift_tables::emit_swift_hash_tables;
pub use symbol_table::{emit_symbol_table, SymbolEntry, SymbolTable, UnmappedLocalSymbols};
pub use tlv::{rewrite_tlv_thunk, TlvDescriptorRange, TlvOptimizer, TlvThunkSite};
