//! `emit_canonical_objc_protocols`: elects one canonical
//! definition per protocol name and rewrites every reference to it.

use std::collections::BTreeMap;

use dylibcache_types::InputDylibVMAddress;

/// One candidate protocol definition, keyed by name, before canonical
/// election.
#[derive(Debug, Clone)]
pub struct ProtocolCandidate {
    pub name: String,
    pub dylib_cache_index: u32,
    pub vm_address: InputDylibVMAddress,
    pub bytes: Vec<u8>,
    pub demangled_name: Option<String>,
}

/// The elected canonical definition for one protocol name.
#[derive(Debug, Clone)]
pub struct CanonicalProtocol {
    pub name: String,
    pub bytes: Vec<u8>,
    pub demangled_name: Option<String>,
    pub source_dylib_cache_index: u32,
    pub source_vm_address: InputDylibVMAddress,
}

/// Elects the first candidate in ascending `(dylib_cache_index,
/// vm_address)` order as canonical for each protocol name, matching the
/// deterministic-merge-order rule of the design ("entries are consumed in
/// ascending dylib cache-index order").
#[tracing::instrument(level = "trace", skip_all, fields(candidate_count = candidates.len()))]
pub fn elect_canonical_protocols(candidates: &[ProtocolCandidate]) -> BTreeMap<String, CanonicalProtocol> {
    let mut by_name: BTreeMap<String, &ProtocolCandidate> = BTreeMap::new();
    for candidate in candidates {
        let replace = match by_name.get(&candidate.name) {
            None => true,
            Some(existing) => {
                (candidate.dylib_cache_index, candidate.vm_address.raw()) < (existing.dylib_cache_index, existing.vm_address.raw())
            }
        };
        if replace {
            by_name.insert(candidate.name.clone(), candidate);
        }
    }

    by_name
        .into_iter()
        .map(|(name, c)| {
            let demangled_name = c.demangled_name.clone().or_else(|| crate::visitor::demangle_swift_protocol_name(&c.name));
            (
                name,
                CanonicalProtocol {
                    name: c.name.clone(),
                    bytes: c.bytes.clone(),
                    demangled_name,
                    source_dylib_cache_index: c.dylib_cache_index,
                    source_vm_address: c.vm_address,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_cache_index_wins_the_canonical_slot() {
        let candidates = vec![
            ProtocolCandidate {
                name: "P".into(),
                dylib_cache_index: 5,
                vm_address: InputDylibVMAddress(0x100),
                bytes: vec![1],
                demangled_name: None,
            },
            ProtocolCandidate {
                name: "P".into(),
                dylib_cache_index: 1,
                vm_address: InputDylibVMAddress(0x200),
                bytes: vec![2],
                demangled_name: None,
            },
        ];
        let canonical = elect_canonical_protocols(&candidates);
        assert_eq!(canonical["P"].source_dylib_cache_index, 1);
        assert_eq!(canonical["P"].bytes, vec![2]);
    }

    #[test]
    fn missing_demangled_name_is_synthesized_from_swift_mangling() {
        let candidates = vec![ProtocolCandidate {
            name: "_TtP7MyModule9MyProto_".into(),
            dylib_cache_index: 0,
            vm_address: InputDylibVMAddress(0x100),
            bytes: vec![],
            demangled_name: None,
        }];
        let canonical = elect_canonical_protocols(&candidates);
        assert_eq!(canonical["_TtP7MyModule9MyProto_"].demangled_name, Some("MyModule.MyProto".to_string()));
    }
}
