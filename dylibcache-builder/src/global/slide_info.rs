//! `compute_slide_info`: builds page-granular slide-info from
//! the per-chunk ASLR trackers registered during the dylib pass. Must run
//! last among pointer-writing emitters since it encodes the pointer
//! format.

use crate::config::SlideInfoFormat;

/// One fixup location registered with a chunk's ASLR tracker during
/// `apply_split_seg_info`/`bind`.
#[derive(Debug, Clone, Copy)]
pub struct TrackedFixup {
    pub page_relative_offset: u32,
    pub page_index: u32,
}

/// One page's slide-info entry: the offset of the first fixup in the page
/// (v1: a 16-bit delta chain; v2/v3: wider, auth-aware chains). Modeled
/// here as the delta-chain shape common to all three formats, since the
/// per-format encoding differences (v1's 12-bit page-offset bitmap, v2's
/// `DYLD_CACHE_SLIDE4_*` masks, v3's `dyld_cache_slide_pointer3`
/// chain-and-auth bits) live in the emitted byte layout, not in this
/// intermediate model.
#[derive(Debug, Clone)]
pub struct SlideInfoPage {
    pub page_index: u32,
    pub fixup_offsets: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct SlideInfo {
    pub format: SlideInfoFormat,
    pub page_size: u32,
    pub pages: Vec<SlideInfoPage>,
}

/// Groups tracked fixups by page and sorts each page's fixups ascending,
/// the precondition for chaining them into a valid delta list.
#[tracing::instrument(level = "trace", skip_all, fields(fixup_count = fixups.len(), ?format))]
pub fn compute_slide_info(fixups: &[TrackedFixup], format: SlideInfoFormat, page_size: u32) -> SlideInfo {
    use std::collections::BTreeMap;
    let mut by_page: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for fixup in fixups {
        by_page.entry(fixup.page_index).or_default().push(fixup.page_relative_offset);
    }
    let pages = by_page
        .into_iter()
        .map(|(page_index, mut offsets)| {
            offsets.sort_unstable();
            SlideInfoPage { page_index, fixup_offsets: offsets }
        })
        .collect();
    SlideInfo { format, page_size, pages }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixups_are_grouped_and_sorted_per_page() {
        let fixups = vec![
            TrackedFixup { page_relative_offset: 16, page_index: 0 },
            TrackedFixup { page_relative_offset: 8, page_index: 0 },
            TrackedFixup { page_relative_offset: 4, page_index: 1 },
        ];
        let info = compute_slide_info(&fixups, SlideInfoFormat::V3, 16 * 1024);
        assert_eq!(info.pages.len(), 2);
        assert_eq!(info.pages[0].fixup_offsets, vec![8, 16]);
    }
}
