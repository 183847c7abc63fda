//! [`InputRegistry`]: receives candidate library buffers, validates them,
//! separates cache-eligible dylibs from executables and ineligible dylibs,
//! computes aliases, sorts into cache order, computes dependency edges,
//! removes transitively broken nodes.

use std::collections::{BTreeMap, BTreeSet};

use dylibcache_types::{DependentKind, InputDylibVMAddress, Platform};

use crate::error::{BuilderError, Result};
use crate::model::{CacheDylib, Dependent};
use crate::visitor::MachOAccess;
use crate::warnings::Warnings;

/// One raw input buffer claimed to be a Mach-O.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub buffer: Vec<u8>,
    pub path: String,
    pub inode: u64,
    pub mtime: u64,
    pub error: Option<String>,
}

/// Result of `categorize_inputs`: which bucket each surviving file fell
/// into.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputCategory {
    CacheEligibleDylib,
    NonCacheDylib,
    PrebuildableExecutable,
}

struct CategorizedInput {
    access: MachOAccess,
    file_index: usize,
    category: InputCategory,
    install_name: String,
}

/// Accepts candidate buffers and produces the closure of cache-eligible
/// dylibs in build order.
pub struct InputRegistry {
    files: Vec<InputFile>,
    aliases: BTreeMap<String, String>,
    intermediate_aliases: BTreeMap<String, String>,
    platform: Platform,
}

impl InputRegistry {
    pub fn new(platform: Platform) -> Self {
        Self { platform, files: Vec::new(), aliases: BTreeMap::new(), intermediate_aliases: BTreeMap::new() }
    }

    /// Attempts a platform-aware Mach-O slice extraction and, on match,
    /// records an [`InputFile`]. The real world supports fat/universal
    /// archives with one slice per architecture; here `buffer` is already
    /// assumed to be a single-architecture slice, since fat-archive
    /// splitting belongs to the `MachOAccess` external collaborator.
    pub fn add_file(&mut self, buffer: Vec<u8>, path: impl Into<String>, inode: u64, mtime: u64) {
        self.files.push(InputFile { buffer, path: path.into(), inode, mtime, error: None });
    }

    /// Installs a path-rewriting table used downstream to translate
    /// symlinked install-names.
    pub fn set_aliases(&mut self, aliases: BTreeMap<String, String>, intermediate_aliases: BTreeMap<String, String>) {
        self.aliases = aliases;
        self.intermediate_aliases = intermediate_aliases;
    }

    /// Every alias path plus, on macOS, every intermediate Current->A alias
    /// for `install_name` (the design dylib trie: "every aliased path, and
    /// (on macOS) every intermediate Current->A alias").
    pub fn aliases_for(&self, install_name: &str) -> Vec<String> {
        let mut out: Vec<String> =
            self.aliases.iter().filter(|(_, target)| target.as_str() == install_name).map(|(alias, _)| alias.clone()).collect();
        if self.platform == Platform::MacOS {
            out.extend(
                self.intermediate_aliases
                    .iter()
                    .filter(|(_, target)| target.as_str() == install_name)
                    .map(|(alias, _)| alias.clone()),
            );
        }
        out.sort();
        out
    }

    /// Partitions parsed InputFiles into cache-eligible dylibs, non-cache
    /// dylibs, and prebuildable executables. An install-name/path mismatch
    /// is reconciled by treating the install-name as the canonical path
    /// whenever `real_path_of` resolves it back to the file's actual path.
    #[tracing::instrument(level = "trace", skip_all, fields(file_count = self.files.len()))]
    pub fn categorize_inputs(&self, real_path_of: impl Fn(&str) -> Option<String>, warnings: &mut Warnings) -> Vec<CategorizedInputHandle> {
        let mut out = Vec::new();
        for (file_index, file) in self.files.iter().enumerate() {
            let access = match MachOAccess::parse(&file.buffer) {
                Ok(access) => access,
                Err(err) => {
                    warnings.dylib_excluded(&file.path, format!("failed to parse Mach-O: {err}"));
                    continue;
                }
            };

            let category = if access.is_dylib {
                if access.install_name.is_some() {
                    InputCategory::CacheEligibleDylib
                } else {
                    InputCategory::NonCacheDylib
                }
            } else if access.is_dynamic_executable {
                InputCategory::PrebuildableExecutable
            } else {
                warnings.dylib_excluded(&file.path, "not a dylib or dynamic executable");
                continue;
            };

            let mut install_name = access.install_name.clone().unwrap_or_else(|| file.path.clone());
            if install_name != file.path {
                if let Some(resolved) = real_path_of(&install_name) {
                    if resolved == file.path {
                        // install-name is canonical; keep it as-is.
                    } else {
                        install_name = file.path.clone();
                    }
                }
            }

            out.push(CategorizedInputHandle(CategorizedInput { access, file_index, category, install_name }));
        }
        tracing::trace!(categorized = out.len(), "input registry categorized files");
        out
    }

    /// Fixed-point pass over cache-eligible dylibs: a dylib whose non-weak
    /// dependency cannot be found among the cache-eligible set (after real-
    /// path resolution) is marked bad and demoted; dependencies on already-
    /// bad dylibs propagate.
    #[tracing::instrument(level = "trace", skip_all, fields(candidate_count = candidates.len()))]
    pub fn verify_self_contained(
        &self,
        candidates: &mut Vec<CategorizedInputHandle>,
        real_path_of: impl Fn(&str) -> Option<String>,
        allowed_missing_weak_dylibs: &BTreeSet<String>,
        warnings: &mut Warnings,
    ) {
        let mut bad: BTreeSet<usize> = BTreeSet::new();
        loop {
            let install_names: BTreeSet<&str> = candidates
                .iter()
                .enumerate()
                .filter(|(i, c)| c.0.category == InputCategory::CacheEligibleDylib && !bad.contains(i))
                .map(|(_, c)| c.0.install_name.as_str())
                .collect();

            let mut newly_bad = Vec::new();
            for (i, candidate) in candidates.iter().enumerate() {
                if candidate.0.category != InputCategory::CacheEligibleDylib || bad.contains(&i) {
                    continue;
                }
                for dep in &candidate.0.access.dependents {
                    let resolved_path = real_path_of(&dep.install_name).unwrap_or_else(|| dep.install_name.clone());
                    let present = install_names.contains(resolved_path.as_str()) || install_names.contains(dep.install_name.as_str());
                    if present {
                        continue;
                    }
                    let break_on_weak = dep.kind == DependentKind::WeakLink;
                    let allowed = allowed_missing_weak_dylibs.contains(&dep.install_name);
                    if break_on_weak || allowed {
                        continue;
                    }
                    newly_bad.push((i, dep.install_name.clone()));
                }
            }

            if newly_bad.is_empty() {
                break;
            }
            for (i, missing) in newly_bad {
                if bad.insert(i) {
                    warnings.dylib_excluded(
                        &candidates[i].0.install_name,
                        format!("non-weak dependency '{missing}' was not found in the input closure"),
                    );
                }
            }
        }

        tracing::trace!(excluded = bad.len(), "self-containment pass reached a fixed point");
        for i in bad {
            candidates[i].0.category = InputCategory::NonCacheDylib;
        }
    }

    /// Stable cache-index ordering: libobjc first, then the configured
    /// ordering file, then macOS-before-iOSMac, then lexicographic this
    /// design `sort_dylibs`, invariant).
    pub fn sort_dylibs(candidates: &mut Vec<CategorizedInputHandle>, dylib_ordering: &BTreeMap<String, u32>) {
        candidates.retain(|c| c.0.category == InputCategory::CacheEligibleDylib);
        candidates.sort_by(|a, b| {
            let a_is_objc = is_libobjc(&a.0.install_name);
            let b_is_objc = is_libobjc(&b.0.install_name);
            b_is_objc.cmp(&a_is_objc).then_with(|| {
                let a_priority = dylib_ordering.get(&a.0.install_name).copied().unwrap_or(u32::MAX);
                let b_priority = dylib_ordering.get(&b.0.install_name).copied().unwrap_or(u32::MAX);
                a_priority.cmp(&b_priority).then_with(|| a.0.install_name.cmp(&b.0.install_name))
            })
        });
    }

    /// Builds `CacheDylib` records in the already-sorted order, with
    /// `cache_index` assigned densely from 0.
    pub fn build_cache_dylibs(candidates: &[CategorizedInputHandle]) -> Vec<CacheDylib> {
        candidates
            .iter()
            .enumerate()
            .map(|(index, c)| {
                let mut dylib = CacheDylib::new(c.0.install_name.clone(), c.0.install_name.clone(), InputDylibVMAddress(0));
                dylib.cache_index = index as u32;
                dylib.has_objc = c.0.access.has_objc;
                dylib.has_thread_local_variables = c.0.access.has_thread_local_variables;
                dylib.exported_symbols = c.0.access.exported_symbols.clone();
                dylib
            })
            .collect()
    }

    /// Populates `dependents[]` for each dylib (the design
    /// `calculate_dylib_dependents`). Fails with `DependencyNotFound` when a
    /// non-weak dependency cannot be resolved.
    pub fn calculate_dylib_dependents(candidates: &[CategorizedInputHandle], dylibs: &mut [CacheDylib]) -> Result<()> {
        let index_of: BTreeMap<&str, u32> =
            candidates.iter().enumerate().map(|(i, c)| (c.0.install_name.as_str(), i as u32)).collect();

        for (i, candidate) in candidates.iter().enumerate() {
            let mut dependents = Vec::new();
            for dep in &candidate.0.access.dependents {
                let target = index_of.get(dep.install_name.as_str()).copied();
                if target.is_none() && dep.kind != DependentKind::WeakLink {
                    return Err(BuilderError::DependencyNotFound {
                        referrer: candidate.0.install_name.clone(),
                        path: dep.install_name.clone(),
                    });
                }
                dependents.push(Dependent { kind: dep.kind, target, raw_path: dep.install_name.clone() });
            }
            dylibs[i].dependents = dependents;
        }
        Ok(())
    }

    pub fn file(&self, index: usize) -> &InputFile {
        &self.files[index]
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Opaque handle returned by `categorize_inputs`, re-examined and mutated by
/// later pipeline steps without re-parsing the Mach-O.
pub struct CategorizedInputHandle(CategorizedInput);

impl CategorizedInputHandle {
    pub fn access(&self) -> &MachOAccess {
        &self.0.access
    }

    pub fn file_index(&self) -> usize {
        self.0.file_index
    }

    pub fn category(&self) -> InputCategory {
        self.0.category
    }

    pub fn install_name(&self) -> &str {
        &self.0.install_name
    }
}

fn is_libobjc(install_name: &str) -> bool {
    install_name.ends_with("libobjc.A.dylib") || install_name.ends_with("libobjc.dylib")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn libobjc_sorts_before_everything_else() {
        let mut names = vec!["/usr/lib/libobjc.A.dylib".to_string(), "/usr/lib/A.dylib".to_string()];
        names.sort_by(|a, b| is_libobjc(b).cmp(&is_libobjc(a)).then_with(|| a.cmp(b)));
        assert_eq!(names[0], "/usr/lib/libobjc.A.dylib");
    }

    #[test]
    fn empty_registry_has_no_files() {
        let registry = InputRegistry::new(Platform::MacOS);
        assert_eq!(registry.file_count(), 0);
    }
}
