//! `SubCacheLayouter` and VM layout: partitions libraries
//! across sub-cache files and assigns file offsets and VM addresses.

pub mod sub_cache_layouter;
pub mod vm_layout;

pub use sub_cache_layouter::{layout_sub_caches, DylibTextSize, LayoutPlan};
pub use vm_layout::{layout_contiguous, layout_discontiguous, layout_discontiguous_sim, DiscontiguousSimBands};
