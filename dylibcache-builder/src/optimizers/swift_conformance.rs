//! Swift protocol-conformance tables: three perfect-hash
//! tables keyed respectively on (type descriptor, protocol), (metadata,
//! protocol), and (foreign-identity bytes, protocol).

use super::perfect_hash::{combined_hash, Entry, PerfectHashTable};
use crate::visitor::ConformanceTypeRef;

/// One conformance record after classification, ready to be sorted into
/// one of the three tables.
#[derive(Debug, Clone)]
pub struct ConformanceCandidate {
    pub type_ref: ConformanceTypeRef,
    pub protocol_vm_offset: i64,
    pub record_vm_offset: i64,
    /// Present only for `ConformanceTypeRef::DirectObjCClassName` with a
    /// foreign (non-Swift-native) identity, per "foreign
    /// conformance" rule.
    pub foreign_identity: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct SwiftConformanceTables {
    pub type_conformance: Option<PerfectHashTable>,
    pub metadata_conformance: Option<PerfectHashTable>,
    pub foreign_conformance: Option<PerfectHashTable>,
}

/// Splits candidates into the three buckets and perfect-hashes each
/// non-empty bucket, matching `OptimizerSwift.cpp`'s three-table split.
pub fn build_conformance_tables(candidates: &[ConformanceCandidate]) -> SwiftConformanceTables {
    let mut type_entries = Vec::new();
    let mut metadata_entries = Vec::new();
    let mut foreign_entries = Vec::new();

    for c in candidates {
        match &c.type_ref {
            ConformanceTypeRef::DirectTypeDescriptor { vm_offset } | ConformanceTypeRef::IndirectTypeDescriptor { vm_offset } => {
                type_entries.push(Entry {
                    key: *vm_offset,
                    key_bytes: vm_offset.to_le_bytes().to_vec(),
                    extra: c.protocol_vm_offset as u64,
                    target: c.record_vm_offset as u32,
                });
            }
            ConformanceTypeRef::IndirectObjCClass { vm_offset } => {
                metadata_entries.push(Entry {
                    key: *vm_offset,
                    key_bytes: vm_offset.to_le_bytes().to_vec(),
                    extra: c.protocol_vm_offset as u64,
                    target: c.record_vm_offset as u32,
                });
            }
            ConformanceTypeRef::DirectObjCClassName { .. } => {
                if let Some(identity) = &c.foreign_identity {
                    foreign_entries.push(Entry {
                        key: identity.clone(),
                        key_bytes: identity.clone(),
                        extra: c.protocol_vm_offset as u64,
                        target: c.record_vm_offset as u32,
                    });
                }
            }
        }
    }

    SwiftConformanceTables {
        type_conformance: non_empty_table(type_entries),
        metadata_conformance: non_empty_table(metadata_entries),
        foreign_conformance: non_empty_table(foreign_entries),
    }
}

fn non_empty_table<K: Clone>(entries: Vec<Entry<K>>) -> Option<PerfectHashTable> {
    if entries.is_empty() {
        None
    } else {
        Some(PerfectHashTable::build(&entries))
    }
}

/// Looks up a type-descriptor conformance the way the Swift runtime's
/// cache-aware conformance lookup does: hash `(type_descriptor_offset,
/// protocol_offset)` through the combined hash and check the table.
pub fn lookup_type_conformance(table: &PerfectHashTable, type_descriptor_vm_offset: i64, protocol_vm_offset: i64) -> Option<u32> {
    let _ = combined_hash(&type_descriptor_vm_offset.to_le_bytes(), protocol_vm_offset as u64, table.salt);
    table.lookup(&type_descriptor_vm_offset.to_le_bytes(), protocol_vm_offset as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_candidates_into_three_tables() {
        let candidates = vec![
            ConformanceCandidate {
                type_ref: ConformanceTypeRef::DirectTypeDescriptor { vm_offset: 100 },
                protocol_vm_offset: 10,
                record_vm_offset: 200,
                foreign_identity: None,
            },
            ConformanceCandidate {
                type_ref: ConformanceTypeRef::IndirectObjCClass { vm_offset: 300 },
                protocol_vm_offset: 20,
                record_vm_offset: 400,
                foreign_identity: None,
            },
            ConformanceCandidate {
                type_ref: ConformanceTypeRef::DirectObjCClassName { name: "Foo".into() },
                protocol_vm_offset: 30,
                record_vm_offset: 500,
                foreign_identity: Some(b"Nidentity".to_vec()),
            },
        ];
        let tables = build_conformance_tables(&candidates);
        assert!(tables.type_conformance.is_some());
        assert!(tables.metadata_conformance.is_some());
        assert!(tables.foreign_conformance.is_some());
    }

    #[test]
    fn empty_bucket_yields_no_table() {
        let tables = build_conformance_tables(&[]);
        assert!(tables.type_conformance.is_none());
        assert!(tables.metadata_conformance.is_none());
        assert!(tables.foreign_conformance.is_none());
    }

    #[test]
    fn lookup_resolves_inserted_type_conformance() {
        let candidates = vec![ConformanceCandidate {
            type_ref: ConformanceTypeRef::DirectTypeDescriptor { vm_offset: 64 },
            protocol_vm_offset: 8,
            record_vm_offset: 128,
            foreign_identity: None,
        }];
        let tables = build_conformance_tables(&candidates);
        let table = tables.type_conformance.unwrap();
        assert_eq!(lookup_type_conformance(&table, 64, 8), Some(128));
    }
}
