//! End-to-end `Builder::build` behavior over synthetic Mach-O inputs.

use std::collections::BTreeMap;

use dylibcache_builder::{BuilderConfig, BuilderError};
use dylibcache_testutils::{objc_methname_section, Dependency, MachOFixture};

#[test]
fn two_dependent_dylibs_build_into_one_sub_cache() {
    let a = MachOFixture::new("/usr/lib/A.dylib").section("__TEXT", "__text", vec![0u8; 32]).build();
    let b = MachOFixture::new("/usr/lib/B.dylib")
        .dependency(Dependency::Normal("/usr/lib/A.dylib"))
        .section("__TEXT", "__text", vec![0u8; 32])
        .build();

    let mut builder = dylibcache_builder::Builder::new(BuilderConfig::default());
    builder.add_file(a, "/usr/lib/A.dylib", 1, 0);
    builder.add_file(b, "/usr/lib/B.dylib", 2, 0);

    let results = builder.build().expect("build should succeed for a self-contained closure");
    assert!(!results.sub_cache_files().is_empty());
}

#[test]
fn each_dylibs_raw_segment_bytes_land_somewhere_in_the_emitted_cache() {
    let a_text: Vec<u8> = (0..32).map(|i| 0xA0 ^ i).collect();
    let b_text: Vec<u8> = (0..32).map(|i| 0xB0 ^ i).collect();
    let a = MachOFixture::new("/usr/lib/A.dylib").section("__TEXT", "__text", a_text.clone()).build();
    let b = MachOFixture::new("/usr/lib/B.dylib")
        .dependency(Dependency::Normal("/usr/lib/A.dylib"))
        .section("__TEXT", "__text", b_text.clone())
        .build();

    let mut builder = dylibcache_builder::Builder::new(BuilderConfig::default());
    builder.add_file(a, "/usr/lib/A.dylib", 1, 0);
    builder.add_file(b, "/usr/lib/B.dylib", 2, 0);

    let results = builder.build().expect("build should succeed for a self-contained closure");
    let all_bytes: Vec<u8> = results.sub_cache_files().iter().flat_map(|(_, bytes)| bytes.iter().copied()).collect();

    assert!(
        all_bytes.windows(a_text.len()).any(|w| w == a_text.as_slice()),
        "A's raw __text bytes should have been copied into some emitted sub-cache buffer"
    );
    assert!(
        all_bytes.windows(b_text.len()).any(|w| w == b_text.as_slice()),
        "B's raw __text bytes should have been copied into some emitted sub-cache buffer"
    );
}

#[test]
fn aliased_install_name_does_not_prevent_a_successful_build() {
    let a = MachOFixture::new("/usr/lib/A.dylib").section("__TEXT", "__text", vec![0u8; 16]).build();

    let mut builder = dylibcache_builder::Builder::new(BuilderConfig::default());
    builder.add_file(a, "/usr/lib/A.dylib", 1, 0);

    let mut aliases = BTreeMap::new();
    aliases.insert("/usr/lib/A.compat.dylib".to_string(), "/usr/lib/A.dylib".to_string());
    builder.set_aliases(aliases, BTreeMap::new());

    let results = builder.build().expect("aliasing a live install name must not fail the build");
    assert!(!results.sub_cache_files().is_empty());
}

#[test]
fn objc_selector_sections_are_absorbed_without_failing_the_build() {
    let objc = MachOFixture::new("/usr/lib/HasObjc.dylib")
        .section("__TEXT", "__objc_methname", objc_methname_section(&["foo", "bar", "baz"]))
        .section("__DATA", "__objc_imageinfo", vec![0u8; 8])
        .build();

    let mut builder = dylibcache_builder::Builder::new(BuilderConfig::default());
    builder.add_file(objc, "/usr/lib/HasObjc.dylib", 1, 0);

    let results = builder.build().expect("an objc dylib with selector sections should build");
    assert!(!results.sub_cache_files().is_empty());
}

#[test]
fn missing_non_weak_dependency_excludes_only_the_dependent() {
    let a_text: Vec<u8> = (0..16).map(|i| 0xC0 ^ i).collect();
    let a = MachOFixture::new("/usr/lib/A.dylib").section("__TEXT", "__text", a_text.clone()).build();
    let b = MachOFixture::new("/usr/lib/B.dylib")
        .dependency(Dependency::Normal("/usr/lib/Missing.dylib"))
        .section("__TEXT", "__text", vec![0u8; 16])
        .build();

    let mut builder = dylibcache_builder::Builder::new(BuilderConfig::default());
    builder.add_file(a, "/usr/lib/A.dylib", 1, 0);
    builder.add_file(b, "/usr/lib/B.dylib", 2, 0);

    let mut messages = Vec::new();
    let results = builder.build().expect("A alone is still a self-contained closure");
    results.for_each_warning(|w| messages.push(w.to_string()));
    assert!(
        messages.iter().any(|m| m.contains("B.dylib") && m.contains("Missing.dylib")),
        "warning should name both the excluded dylib and its missing dependency, got: {messages:?}"
    );

    let all_bytes: Vec<u8> = results.sub_cache_files().iter().flat_map(|(_, bytes)| bytes.iter().copied()).collect();
    assert!(
        all_bytes.windows(a_text.len()).any(|w| w == a_text.as_slice()),
        "A should still have been placed in the cache despite B's exclusion"
    );
}

#[test]
fn weak_missing_dependency_does_not_exclude_the_dylib() {
    let b = MachOFixture::new("/usr/lib/B.dylib")
        .dependency(Dependency::Weak("/usr/lib/Missing.dylib"))
        .section("__TEXT", "__text", vec![0u8; 16])
        .build();

    let mut builder = dylibcache_builder::Builder::new(BuilderConfig::default());
    builder.add_file(b, "/usr/lib/B.dylib", 1, 0);

    let results = builder.build().expect("a missing weak dependency must not exclude the dylib");
    assert!(!results.sub_cache_files().is_empty());
}

#[test]
fn truncated_mach_o_input_is_excluded_rather_than_fatal() {
    let mut builder = dylibcache_builder::Builder::new(BuilderConfig::default());
    // Valid 64-bit magic, but far too short to contain any load commands.
    builder.add_file(vec![0xcf, 0xfa, 0xed, 0xfe, 0, 0, 0, 0], "/usr/lib/Truncated.dylib", 1, 0);

    let err = builder.build().unwrap_err();
    assert!(matches!(err, BuilderError::NoCacheDylibs));
}
