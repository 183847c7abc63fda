//! [`Builder`]: the top-level orchestrator that drives every phase in order:
//! InputRegistry -> Optimizers -> SubCacheLayouter -> DylibPassRunner ->
//! GlobalEmitters -> Finalizer.

use std::collections::BTreeMap;

use dylibcache_types::{CacheFileSize, CacheVMAddress, InputDylibVMAddress, LayoutMode, RegionKind, SubCacheKind, VMOffset};

use crate::config::BuilderConfig;
use crate::error::{BuilderError, Result};
use crate::finalizer;
use crate::global;
use crate::input_registry::InputRegistry;
use crate::layout;
use crate::model::{Backing, BindTarget, Chunk, ChunkArena, ChunkId, ChunkKind, SegmentAdjustment, SubCacheId};
use crate::optimizers;
use crate::pass;
use crate::visitor::{MachOAccess, ObjcVisitor, SwiftVisitor};
use crate::warnings::Warnings;

/// Everything a successful `build` hands back (the design "Artifacts
/// emitted"): one buffer per emitted sub-cache file, keyed by its file
/// suffix, plus the warnings accumulated along the way.
#[derive(Debug, Default)]
pub struct BuildResults {
    sub_caches: Vec<(String, Vec<u8>)>,
    warnings: Warnings,
}

impl BuildResults {
    pub fn sub_cache_files(&self) -> &[(String, Vec<u8>)] {
        &self.sub_caches
    }

    /// Invokes `f` for every recorded warning, in recording order (the
    /// design `for_each_warning`).
    pub fn for_each_warning(&self, f: impl FnMut(&crate::warnings::Warning)) {
        self.warnings.for_each_warning(f);
    }
}

/// Drives the whole build. Owned by the caller; dropped when the build is
/// done ("no further work needed beyond making the builder owned by the
/// caller and freed on drop").
pub struct Builder {
    config: BuilderConfig,
    registry: InputRegistry,
}

impl Builder {
    pub fn new(config: BuilderConfig) -> Self {
        let registry = InputRegistry::new(config.platform);
        Self { config, registry }
    }

    /// Forwards to `InputRegistry::add_file`.
    pub fn add_file(&mut self, buffer: Vec<u8>, path: impl Into<String>, inode: u64, mtime: u64) {
        self.registry.add_file(buffer, path, inode, mtime);
    }

    pub fn set_aliases(&mut self, aliases: BTreeMap<String, String>, intermediate_aliases: BTreeMap<String, String>) {
        self.registry.set_aliases(aliases, intermediate_aliases);
    }

    /// Runs every phase and returns the emitted sub-cache buffers.
    #[tracing::instrument(skip(self), fields(log_prefix = %self.config.log_prefix))]
    pub fn build(&self) -> Result<BuildResults> {
        let mut warnings = Warnings::new();

        if self.registry.file_count() == 0 {
            return Err(BuilderError::NoInputs);
        }

        // -- InputRegistry -------------------------------------------------
        let mut candidates = self.registry.categorize_inputs(|_path| None, &mut warnings);
        self.registry.verify_self_contained(&mut candidates, |_path| None, &self.config.allowed_missing_weak_dylibs, &mut warnings);
        InputRegistry::sort_dylibs(&mut candidates, &self.config.dylib_ordering);

        if candidates.is_empty() {
            return Err(BuilderError::NoCacheDylibs);
        }

        let mut dylibs = InputRegistry::build_cache_dylibs(&candidates);
        InputRegistry::calculate_dylib_dependents(&candidates, &mut dylibs)?;
        let accesses: Vec<&MachOAccess> = candidates.iter().map(|c| c.access()).collect();
        tracing::debug!(dylib_count = dylibs.len(), "input registry produced cache-eligible closure");

        // -- Optimizers ------------------------------------------------------
        let mut selector_pool = optimizers::NamePool::new_selector_pool();
        let mut class_name_pool = optimizers::MultiNamePool::new();
        for access in &accesses {
            for section in &access.sections {
                if section.section_name == "__objc_methname" {
                    for name in split_nul_terminated(&section.data) {
                        selector_pool.insert(&name);
                    }
                }
            }
        }
        for (i, dylib) in dylibs.iter().enumerate() {
            for class in ObjcVisitor::new(accesses[i]).for_each_class() {
                class_name_pool.push(class.name, dylib.cache_index, class.vm_address);
            }
        }
        tracing::debug!(selectors = selector_pool.len(), "optimizers built canonical name pools");

        // -- SubCacheLayouter --------------------------------------------
        let text_sizes: Vec<layout::DylibTextSize> = dylibs
            .iter()
            .map(|d| layout::DylibTextSize {
                cache_index: d.cache_index,
                text_size: accesses[d.cache_index as usize].segments.iter().filter(|s| s.name == "__TEXT").map(|s| s.file_size).sum(),
            })
            .collect();

        let plan = layout::layout_sub_caches(&self.config, &mut dylibs, &text_sizes)?;
        let mut arena = plan.sub_caches;

        // One chunk per dylib, holding its concatenated segment bytes; the
        // chunk-per-segment split `copy_raw_segments` could support is not
        // tracked separately here since nothing downstream needs individual
        // segment boundaries inside the cache buffer.
        let mut chunk_arena = ChunkArena::new();
        let mut dylib_chunks: Vec<ChunkId> = Vec::with_capacity(dylibs.len());
        for (i, dylib) in dylibs.iter().enumerate() {
            let buffer_len: u64 = accesses[i].segments.iter().map(|s| s.data.len() as u64).sum();
            let chunk = Chunk::new(
                ChunkKind::DylibSegment { dylib_index: dylib.cache_index, segment_name: "__TEXT_DATA".to_string() },
                dylib.install_name.clone(),
                self.config.page_size as u64,
                CacheFileSize(buffer_len),
            );
            let chunk_id = chunk_arena.insert(chunk);
            dylib_chunks.push(chunk_id);
            if let Some(sub_cache_id) = dylib.assigned_sub_cache {
                let region = arena.get_mut(sub_cache_id).region_mut(RegionKind::Text);
                region.push_chunk(&chunk_arena, chunk_id);
            }
        }
        tracing::debug!(sub_caches = arena.len(), "sub-cache layouter partitioned dylibs");

        // -- VM layout -------------------------------------------------------
        match self.config.layout_mode {
            LayoutMode::Regular | LayoutMode::LargeContiguous | LayoutMode::LargeUniversal => {
                let base = CacheVMAddress(self.config.cache_base_address);
                for (_, sub_cache) in arena.iter_mut() {
                    layout::layout_contiguous(sub_cache, base, self.config.region_padding, self.config.cache_size)?;
                }
            }
            LayoutMode::Discontiguous => {
                let base = CacheVMAddress(self.config.cache_base_address);
                for (_, sub_cache) in arena.iter_mut() {
                    layout::layout_discontiguous(sub_cache, base)?;
                }
            }
            LayoutMode::DiscontiguousSim => {
                let bands = layout::DiscontiguousSimBands {
                    text_base: self.config.cache_base_address,
                    text_size: self.config.cache_size / 3,
                    data_base: self.config.cache_base_address + self.config.cache_size / 3,
                    data_size: self.config.cache_size / 3,
                    linkedit_base: self.config.cache_base_address + 2 * (self.config.cache_size / 3),
                    linkedit_size: self.config.cache_size / 3,
                };
                for (_, sub_cache) in arena.iter_mut() {
                    layout::layout_discontiguous_sim(sub_cache, &bands)?;
                }
            }
        }

        // Now that every region has a concrete file offset/VM address, walk
        // each region's chunks once more to fill in their own offsets.
        for (_, sub_cache) in arena.iter_mut() {
            for region in sub_cache.regions.iter() {
                region.allocate_chunk_offsets(&mut chunk_arena);
            }
        }

        // Build each dylib's split-seg adjustor from its now-placed chunk.
        for (i, dylib) in dylibs.iter_mut().enumerate() {
            let access = accesses[i];
            let chunk = chunk_arena.get(dylib_chunks[i]);
            let Some(cache_vm_start) = chunk.cache_vm_address else { continue };
            let input_vm_start = access.segments.iter().map(|s| s.vm_start.raw()).min().unwrap_or(0);
            let input_vm_end = access.segments.iter().map(|s| s.vm_start.raw() + s.vm_size).max().unwrap_or(input_vm_start);
            dylib.adjustor.add_segment(SegmentAdjustment {
                segment_name: "__TEXT_DATA".to_string(),
                input_vm_start: InputDylibVMAddress(input_vm_start),
                input_vm_end: InputDylibVMAddress(input_vm_end),
                cache_vm_start,
                chunk: dylib_chunks[i],
            });
            dylib.segment_chunks.push(dylib_chunks[i]);
        }

        // Cross-dylib export resolution: the first dylib to export a given
        // symbol wins, matching `sort_dylibs`'s already-established priority
        // order.
        let mut symbol_address_map: BTreeMap<String, (u32, CacheVMAddress)> = BTreeMap::new();
        for (i, dylib) in dylibs.iter().enumerate() {
            for (name, addr) in &accesses[i].exported_symbol_addresses {
                if let Some(cache_addr) = dylib.adjustor.translate(*addr) {
                    symbol_address_map.entry(name.clone()).or_insert((dylib.cache_index, cache_addr));
                }
            }
        }

        // -- DylibPassRunner ---------------------------------------------
        let pass_states = pass::run_all(&dylibs, &accesses, &selector_pool, &|name: &str| symbol_address_map.get(name).copied(), &warnings)?;
        tracing::debug!(dylibs_rewritten = pass_states.len(), "dylib pass runner rewrote per-dylib buffers");

        // -- allocate buffers, then place each rewritten dylib's bytes ----
        for (_, sub_cache) in arena.iter_mut() {
            let size = sub_cache.total_file_size().max(self.config.page_size as u64);
            sub_cache.buffer = Some(Backing::new_memory(size as usize));
        }
        for (i, state) in pass_states.iter().enumerate() {
            let Some(sub_cache_id) = dylibs[i].assigned_sub_cache else { continue };
            let Some(file_offset) = chunk_arena.get(dylib_chunks[i]).sub_cache_file_offset else { continue };
            let sub_cache = arena.get_mut(sub_cache_id);
            let Some(backing) = sub_cache.buffer.as_mut() else { continue };
            let start = file_offset.raw() as usize;
            if let Some(slot) = backing.as_mut_slice().get_mut(start..start + state.cache_buffer.len()) {
                slot.copy_from_slice(&state.cache_buffer);
            }
        }

        // -- GlobalEmitters ------------------------------------------------
        let mut got_dedup = global::GotDeduplicator::new();
        let mut patch_table = optimizers::PatchTable::new();
        for (i, (dylib, state)) in dylibs.iter().zip(pass_states.iter()).enumerate() {
            for (site, target) in accesses[i].bind_sites.iter().zip(state.bind_targets.iter()) {
                let BindTarget::CacheImage { dylib_cache_index, .. } = target else { continue };
                let target_install_name = dylibs[*dylib_cache_index as usize].install_name.clone();
                got_dedup.record(
                    global::GotKey { target_install_name, target_symbol_name: site.symbol_name.clone(), pointer_metadata: 0 },
                    global::GotUseSite { dylib_cache_index: dylib.cache_index, offset_in_dylib: site.site_offset as u64 },
                );
                patch_table.record(
                    &site.symbol_name,
                    optimizers::PatchLocation { client_cache_index: dylib.cache_index, offset: VMOffset(site.site_offset as i64), addend: site.addend },
                );
            }
        }

        let mut dylib_trie = optimizers::PathTrie::new();
        for dylib in &dylibs {
            dylib_trie.insert(&dylib.path, dylib.cache_index.to_le_bytes().to_vec());
        }

        let mut protocol_candidates = Vec::new();
        let mut per_dylib_conformances: Vec<(u32, Vec<optimizers::ConformanceCandidate>)> = Vec::new();
        for (i, dylib) in dylibs.iter().enumerate() {
            let access = accesses[i];
            for protocol in ObjcVisitor::new(access).for_each_protocol() {
                protocol_candidates.push(global::ProtocolCandidate {
                    name: protocol.name,
                    dylib_cache_index: dylib.cache_index,
                    vm_address: protocol.vm_address,
                    bytes: Vec::new(),
                    demangled_name: protocol.demangled_name,
                });
            }
            let conformances: Vec<optimizers::ConformanceCandidate> = SwiftVisitor::new(access)
                .for_each_conformance()
                .into_iter()
                .map(|c| optimizers::ConformanceCandidate {
                    type_ref: c.type_ref,
                    protocol_vm_offset: c.protocol_vm_offset,
                    record_vm_offset: c.record_vm_offset,
                    foreign_identity: None,
                })
                .collect();
            if !conformances.is_empty() {
                per_dylib_conformances.push((dylib.cache_index, conformances));
            }
        }
        let canonical_protocols = global::elect_canonical_protocols(&protocol_candidates);
        let swift_tables = global::emit_swift_hash_tables(&per_dylib_conformances);

        let mut tracked_fixups = Vec::new();
        for (i, state) in pass_states.iter().enumerate() {
            let Some(base) = chunk_arena.get(dylib_chunks[i]).cache_vm_address else { continue };
            for &offset in &state.fixup_offsets {
                let addr = base.raw() + offset as u64;
                tracked_fixups.push(global::TrackedFixup {
                    page_index: (addr / self.config.slide_info_page_size as u64) as u32,
                    page_relative_offset: (addr % self.config.slide_info_page_size as u64) as u32,
                });
            }
        }
        let slide_info = global::compute_slide_info(&tracked_fixups, self.config.slide_info_format, self.config.slide_info_page_size);

        // TLV thunks are rewritten directly in each sub-cache's buffer,
        // since they're an allocation (pthread key) shared cache-wide rather
        // than a per-dylib rewrite.
        let mut tlv_optimizer = global::TlvOptimizer::new(global::TlvDescriptorRange { first_key: 0, last_key: 1000 });
        for (i, dylib) in dylibs.iter().enumerate() {
            if !dylib.has_thread_local_variables {
                continue;
            }
            let Some(sub_cache_id) = dylib.assigned_sub_cache else { continue };
            let Some(file_offset) = chunk_arena.get(dylib_chunks[i]).sub_cache_file_offset else { continue };
            let Some(key) = tlv_optimizer.allocate_key(dylib.cache_index) else {
                warnings.optimization_downgraded("thread-local variables", format!("pthread key range exhausted at '{}'", dylib.install_name));
                continue;
            };
            let Some(backing) = arena.get_mut(sub_cache_id).buffer.as_mut() else { continue };
            for &site_offset in &accesses[i].tlv_thunk_sites {
                let site = global::TlvThunkSite {
                    dylib_cache_index: dylib.cache_index,
                    site_offset: file_offset.raw() + site_offset as u64,
                };
                // `tlv_get_addr`'s cache address is resolved through the same
                // cross-dylib export map as any other bind.
                let tlv_get_addr = symbol_address_map.get("_tlv_get_addr").map(|(_, a)| a.raw()).unwrap_or(0);
                global::rewrite_tlv_thunk(backing.as_mut_slice(), &site, tlv_get_addr, key);
            }
        }

        let mut objc_header_entries = Vec::new();
        for (i, dylib) in dylibs.iter().enumerate() {
            if !dylib.has_objc {
                continue;
            }
            let rel_offset = chunk_arena.get(dylib_chunks[i]).sub_cache_file_offset.map(|o| o.raw() as i64).unwrap_or(0);
            objc_header_entries.push(global::build_header_info_entry(rel_offset, rel_offset, 0));
        }

        let mut prebuilt_loaders = optimizers::PrebuiltLoaderSet::new();
        for (i, (dylib, state)) in dylibs.iter().zip(pass_states.iter()).enumerate() {
            prebuilt_loaders.dylib_loaders.push(optimizers::PrebuiltLoaderEstimate {
                dependent_count: dylib.dependents.len() as u32,
                segment_count: accesses[i].segments.len() as u32,
                bind_target_count: state.bind_targets.len() as u32,
                fixup_count: state.fixup_offsets.len() as u32,
            });
        }

        let symbol_entries: Vec<global::SymbolEntry> = dylibs
            .iter()
            .flat_map(|d| {
                d.exported_symbols.iter().map(|name| {
                    let value = symbol_address_map.get(name).map(|(_, addr)| addr.raw()).unwrap_or(0);
                    global::SymbolEntry { dylib_cache_index: d.cache_index, name: name.clone(), value, is_local: false, is_text: true }
                })
            })
            .collect();
        let (symbol_table, unmapped_locals) = global::emit_symbol_table(&symbol_entries, self.config.local_symbols_mode);

        tracing::debug!(
            got_slots = got_dedup.len(),
            patch_exports = patch_table.len(),
            canonical_protocols = canonical_protocols.len(),
            swift_type_conformances = swift_tables.type_conformance.is_some(),
            slide_info_pages = slide_info.pages.len(),
            objc_headers = objc_header_entries.len(),
            prebuilt_loader_bytes = prebuilt_loaders.total_estimated_size().raw(),
            symbol_table_strings = symbol_table.offsets.len(),
            class_names = class_name_pool.entries().len(),
            dylib_trie_bytes = dylib_trie.serialize().len(),
            "global emitters computed cache-wide acceleration structures"
        );
        let _ = unmapped_locals;

        // -- Finalizer ------------------------------------------------------
        let main_ids: Vec<SubCacheId> = std::iter::once(plan.main_development).chain(plan.main_customer).collect();
        finalizer::finalize(&self.config, &mut arena, &main_ids, dylibs.len() as u32);
        tracing::debug!(sub_cache_count = arena.len(), "finalizer code-signed every sub-cache");

        let mut sub_caches = Vec::new();
        for (_, sub_cache) in arena.iter() {
            let suffix = suffix_for(sub_cache.kind, &sub_cache.file_suffix);
            let bytes = sub_cache.buffer.as_ref().map(|b| b.as_slice().to_vec()).unwrap_or_default();
            sub_caches.push((suffix, bytes));
        }

        Ok(BuildResults { sub_caches, warnings })
    }
}

fn suffix_for(kind: SubCacheKind, file_suffix: &str) -> String {
    if file_suffix.is_empty() {
        format!("{:?}", kind)
    } else {
        file_suffix.to_string()
    }
}

fn split_nul_terminated(data: &[u8]) -> Vec<String> {
    data.split(|&b| b == 0)
        .filter(|chunk| !chunk.is_empty())
        .filter_map(|chunk| std::str::from_utf8(chunk).ok().map(ToOwned::to_owned))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dylibcache_types::Platform;

    #[test]
    fn build_with_no_inputs_is_an_error() {
        let builder = Builder::new(BuilderConfig { platform: Platform::MacOS, ..BuilderConfig::default() });
        let err = builder.build().unwrap_err();
        assert!(matches!(err, BuilderError::NoInputs));
    }

    #[test]
    fn build_with_only_non_macho_input_yields_no_cache_dylibs() {
        let mut builder = Builder::new(BuilderConfig::default());
        builder.add_file(vec![0u8; 16], "/garbage", 1, 1);
        let err = builder.build().unwrap_err();
        assert!(matches!(err, BuilderError::NoCacheDylibs));
    }
}
