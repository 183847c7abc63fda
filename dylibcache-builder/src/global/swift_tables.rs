//! `emit_swift_hash_tables`: builds the three Swift
//! conformance tables described in the design from the merged per-dylib
//! conformance candidates.

use crate::optimizers::swift_conformance::{build_conformance_tables, ConformanceCandidate, SwiftConformanceTables};

/// Merges per-dylib conformance candidates in ascending dylib cache-index
/// order and builds the three perfect-hash tables.
#[tracing::instrument(level = "trace", skip_all, fields(dylibs_with_conformances = per_dylib_candidates.len()))]
pub fn emit_swift_hash_tables(per_dylib_candidates: &[(u32, Vec<ConformanceCandidate>)]) -> SwiftConformanceTables {
    let mut ordered = per_dylib_candidates.to_vec();
    ordered.sort_by_key(|(cache_index, _)| *cache_index);
    let merged: Vec<ConformanceCandidate> = ordered.into_iter().flat_map(|(_, candidates)| candidates).collect();
    build_conformance_tables(&merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visitor::ConformanceTypeRef;

    #[test]
    fn merges_in_ascending_cache_index_order() {
        let per_dylib = vec![
            (
                1,
                vec![ConformanceCandidate {
                    type_ref: ConformanceTypeRef::DirectTypeDescriptor { vm_offset: 10 },
                    protocol_vm_offset: 1,
                    record_vm_offset: 100,
                    foreign_identity: None,
                }],
            ),
            (
                0,
                vec![ConformanceCandidate {
                    type_ref: ConformanceTypeRef::DirectTypeDescriptor { vm_offset: 20 },
                    protocol_vm_offset: 2,
                    record_vm_offset: 200,
                    foreign_identity: None,
                }],
            ),
        ];
        let tables = emit_swift_hash_tables(&per_dylib);
        assert!(tables.type_conformance.is_some());
    }
}
