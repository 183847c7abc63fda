//! `DylibPassRunner`: the per-dylib rewrite pass run in
//! parallel across the cache dylib closure.

pub mod dylib_pass_runner;

pub use dylib_pass_runner::{
    apply_split_seg_info, bind, calculate_bind_targets, copy_raw_segments, emit_objc_imp_caches, fips_sign,
    optimize_loads_from_constants, optimize_stubs, run_all, update_objc_selector_references_and_sort, update_symbol_tables,
    BindEnvironment, DylibPassState, RawBindSite,
};
