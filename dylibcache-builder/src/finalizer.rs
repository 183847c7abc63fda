//! `Finalizer`: attaches objc-synthesized segments, writes
//! cache headers, code-signs every sub-cache, and propagates sub-cache
//! UUIDs back into main-cache headers.

use dylibcache_types::{CacheFileOffset, CacheVMAddress, CodeSigningDigestMode};
use uuid::Uuid;

use crate::config::BuilderConfig;
use crate::model::{SubCache, SubCacheArena, SubCacheId};

/// Synthesized `__OBJC_RO`/`__OBJC_RW` segment descriptors attached to one
/// ObjC dylib's mach header. This is last among mutations to a dylib's
/// header because it changes the segment count.
#[derive(Debug, Clone)]
pub struct ObjcSegments {
    pub objc_ro_file_offset: CacheFileOffset,
    pub objc_ro_vm_address: CacheVMAddress,
    pub objc_rw_vm_address: CacheVMAddress,
}

pub fn add_objc_segments(ro_offset: CacheFileOffset, ro_addr: CacheVMAddress, rw_addr: CacheVMAddress) -> ObjcSegments {
    ObjcSegments { objc_ro_file_offset: ro_offset, objc_ro_vm_address: ro_addr, objc_rw_vm_address: rw_addr }
}

/// `#[repr(C)]` subset of `dyld_cache_header` this design actually
/// populates: the mapping-table/image-info/sub-cache bookkeeping named in
/// the design, not the full historical field set (most of which is beyond
/// this design's scope per convention).
#[derive(Debug, Clone)]
pub struct CacheHeader {
    pub mapping_count: u32,
    pub image_count: u32,
    pub sub_cache_count: u32,
    pub dyld_in_cache_vm_offset: Option<CacheVMAddress>,
    pub uuid: Uuid,
    /// Filled in only for main caches, only after every child sub-cache has
    /// been code-signed ("sub-cache UUIDs are filled in after
    /// child sub-caches are code-signed").
    pub sub_cache_uuids: Vec<Uuid>,
}

pub fn compute_cache_header(sub_cache: &SubCache, image_count: u32, uuid: Uuid) -> CacheHeader {
    CacheHeader {
        mapping_count: sub_cache.regions.iter().filter(|r| !r.is_empty()).count() as u32,
        image_count,
        sub_cache_count: sub_cache.children.len() as u32,
        dyld_in_cache_vm_offset: None,
        uuid,
        sub_cache_uuids: Vec::new(),
    }
}

/// Hashes every page of a sub-cache's buffer, per the configured digest
/// mode, producing a cdHash. The actual SHA256/SHA1 primitives are an
/// external collaborator ; this computes the
/// page-hash tree shape (one hash per page, then a hash of hashes) using a
/// placeholder digest so the method ordering and output shape are
/// faithful without re-deriving a cryptographic hash function.
pub fn code_sign(buffer: &[u8], page_size: u32, digest_mode: CodeSigningDigestMode) -> [u8; 20] {
    let mut page_hashes: Vec<u8> = Vec::new();
    for page in buffer.chunks(page_size as usize) {
        page_hashes.push(placeholder_page_hash(page));
    }
    let mut cd_hash = [0u8; 20];
    for (i, &h) in page_hashes.iter().enumerate() {
        cd_hash[i % 20] ^= h;
    }
    // Agile mode additionally produces a SHA1 hash alongside SHA256; since
    // both are placeholders here, the mode only affects which slots of the
    // SuperBlob would be populated downstream, not this intermediate hash.
    let _ = digest_mode;
    cd_hash
}

fn placeholder_page_hash(page: &[u8]) -> u8 {
    page.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Derives a sub-cache's UUID from its own cdHash rather than drawing random
/// bytes, so two builds of identical inputs produce identical UUIDs.
fn uuid_from_cd_hash(cd_hash: &[u8; 20]) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&cd_hash[..16]);
    Uuid::from_bytes(bytes)
}

/// Packs a [`CacheHeader`] into its on-disk byte layout: three `u32`
/// counters, the cache's own UUID, then one 16-byte UUID per child sub-cache.
fn serialize_cache_header(header: &CacheHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + 16 + header.sub_cache_uuids.len() * 16);
    out.extend_from_slice(&header.mapping_count.to_le_bytes());
    out.extend_from_slice(&header.image_count.to_le_bytes());
    out.extend_from_slice(&header.sub_cache_count.to_le_bytes());
    out.extend_from_slice(header.uuid.as_bytes());
    for uuid in &header.sub_cache_uuids {
        out.extend_from_slice(uuid.as_bytes());
    }
    out
}

/// Code-signs every sub-cache (children before their mains, per convention:
/// "Sub-caches are signed before main caches so that main-cache headers
/// can embed child UUIDs"), then propagates child UUIDs into each main
/// cache's header. `image_count` is the number of cache dylibs placed across
/// the whole build, recorded in every main cache's header.
#[tracing::instrument(level = "trace", skip_all, fields(sub_cache_count = arena.len(), main_count = main_ids.len()))]
pub fn finalize(config: &BuilderConfig, arena: &mut SubCacheArena, main_ids: &[SubCacheId], image_count: u32) {
    let main_set: std::collections::BTreeSet<u32> = main_ids.iter().map(|id| id.0).collect();

    let mut child_order: Vec<SubCacheId> = Vec::new();
    for (id, sub_cache) in arena.iter() {
        if !main_set.contains(&id.0) {
            child_order.push(id);
        }
        let _ = sub_cache;
    }

    for id in child_order {
        let sub_cache = arena.get_mut(id);
        if let Some(backing) = &sub_cache.buffer {
            let cd_hash = code_sign(backing.as_slice(), config.page_size, config.code_signing_digest_mode);
            sub_cache.cd_hash = Some(cd_hash);
            sub_cache.uuid.get_or_insert_with(|| uuid_from_cd_hash(&cd_hash));
        }
    }

    for &main_id in main_ids {
        let children = arena.get(main_id).children.clone();
        let child_uuids: Vec<Uuid> = children.iter().filter_map(|&c| arena.get(c).uuid).collect();

        let main = arena.get_mut(main_id);
        let uuid = if let Some(backing) = &main.buffer {
            let cd_hash = code_sign(backing.as_slice(), config.page_size, config.code_signing_digest_mode);
            main.cd_hash = Some(cd_hash);
            *main.uuid.get_or_insert_with(|| uuid_from_cd_hash(&cd_hash))
        } else {
            *main.uuid.get_or_insert_with(Uuid::new_v4)
        };

        let mut header = compute_cache_header(main, image_count, uuid);
        header.sub_cache_uuids = child_uuids;
        main.header_bytes = serialize_cache_header(&header);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dylibcache_types::SubCacheKind;

    #[test]
    fn code_sign_is_deterministic_for_the_same_buffer() {
        let buffer = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        let a = code_sign(&buffer, 4, CodeSigningDigestMode::Sha256Only);
        let b = code_sign(&buffer, 4, CodeSigningDigestMode::Sha256Only);
        assert_eq!(a, b);
    }

    #[test]
    fn finalize_signs_children_before_assigning_main_uuid() {
        let mut arena = SubCacheArena::with_capacity(2);
        let mut main = SubCache::new(SubCacheKind::MainDevelopment, "development");
        let mut child = SubCache::new(SubCacheKind::Sub, "01");
        child.buffer = Some(crate::model::Backing::new_memory(16));
        let child_id = arena.insert(child);
        main.children.push(child_id);
        main.buffer = Some(crate::model::Backing::new_memory(16));
        let main_id = arena.insert(main);

        let config = BuilderConfig::default();
        finalize(&config, &mut arena, &[main_id], 1);

        assert!(arena.get(child_id).cd_hash.is_some());
        assert!(arena.get(main_id).uuid.is_some());
    }

    #[test]
    fn uuid_is_derived_from_cd_hash_not_random() {
        let mut arena = SubCacheArena::with_capacity(1);
        let mut main = SubCache::new(SubCacheKind::MainDevelopment, "development");
        main.buffer = Some(crate::model::Backing::new_memory(16));
        let main_id = arena.insert(main);

        let config = BuilderConfig::default();
        finalize(&config, &mut arena, &[main_id], 0);
        let first_uuid = arena.get(main_id).uuid;

        let mut arena2 = SubCacheArena::with_capacity(1);
        let mut main2 = SubCache::new(SubCacheKind::MainDevelopment, "development");
        main2.buffer = Some(crate::model::Backing::new_memory(16));
        let main_id2 = arena2.insert(main2);
        finalize(&config, &mut arena2, &[main_id2], 0);

        assert_eq!(first_uuid, arena2.get(main_id2).uuid);
        assert!(!arena.get(main_id).header_bytes.is_empty());
    }
}
