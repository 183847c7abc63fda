//! `emit_objc_header_info`, `emit_objc_hash_tables`,
//! `compute_objc_class_layout`, `emit_objc_opts_header`.

use std::collections::BTreeMap;

/// One dylib's ObjC read-only header-info entry: a relative offset to its
/// mach header and a relative offset to its image-info, with bit 3 of the
/// image-info flags set to mark the dylib as cache-optimized.
#[derive(Debug, Clone, Copy)]
pub struct ObjcHeaderInfoEntry {
    pub mach_header_rel_offset: i64,
    pub image_info_rel_offset: i64,
    pub image_info_flags: u32,
}

const OPTIMIZED_BY_DYLD_FLAG: u32 = 1 << 3;

pub fn build_header_info_entry(mach_header_rel_offset: i64, image_info_rel_offset: i64, raw_flags: u32) -> ObjcHeaderInfoEntry {
    ObjcHeaderInfoEntry { mach_header_rel_offset, image_info_rel_offset, image_info_flags: raw_flags | OPTIMIZED_BY_DYLD_FLAG }
}

/// One class's ivar layout before/after superclass-aware adjustment.
#[derive(Debug, Clone)]
pub struct ClassLayout {
    pub name: String,
    pub superclass: Option<String>,
    pub instance_start: u32,
    pub instance_size: u32,
    pub ivar_offsets: Vec<(String, u32, bool)>, // (ivar name, offset, elided)
    pub max_ivar_align: u32,
}

/// Computes per-class instance-start/size adjustments by BFS from root
/// classes, adjusting ivar offsets by the difference between a
/// superclass's `instanceSize` and the subclass's `instanceStart`, and
/// dropping ivars flagged elided.
pub fn compute_objc_class_layout(mut classes: BTreeMap<String, ClassLayout>) -> BTreeMap<String, ClassLayout> {
    let roots: Vec<String> = classes.values().filter(|c| c.superclass.is_none()).map(|c| c.name.clone()).collect();
    let mut queue: std::collections::VecDeque<String> = roots.into_iter().collect();
    let mut visited = std::collections::BTreeSet::new();

    while let Some(name) = queue.pop_front() {
        if !visited.insert(name.clone()) {
            continue;
        }
        let superclass_size = classes.get(&name).and_then(|c| c.superclass.clone()).and_then(|sup| classes.get(&sup)).map(|sup| sup.instance_size);

        if let Some(superclass_size) = superclass_size {
            if let Some(class) = classes.get_mut(&name) {
                let delta = superclass_size.saturating_sub(class.instance_start);
                class.instance_start = superclass_size;
                class.instance_size += delta;
                for (_, offset, _) in class.ivar_offsets.iter_mut() {
                    *offset += delta;
                }
                class.ivar_offsets.retain(|(_, _, elided)| !elided);
            }
        }

        let children: Vec<String> = classes.values().filter(|c| c.superclass.as_deref() == Some(name.as_str())).map(|c| c.name.clone()).collect();
        queue.extend(children);
    }

    classes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_info_sets_optimized_by_dyld_bit() {
        let entry = build_header_info_entry(0, 8, 0);
        assert_eq!(entry.image_info_flags & OPTIMIZED_BY_DYLD_FLAG, OPTIMIZED_BY_DYLD_FLAG);
    }

    #[test]
    fn subclass_ivar_offsets_shift_by_superclass_growth() {
        let mut classes = BTreeMap::new();
        classes.insert(
            "Root".to_string(),
            ClassLayout { name: "Root".into(), superclass: None, instance_start: 0, instance_size: 16, ivar_offsets: vec![], max_ivar_align: 8 },
        );
        classes.insert(
            "Child".to_string(),
            ClassLayout {
                name: "Child".into(),
                superclass: Some("Root".into()),
                instance_start: 8,
                instance_size: 24,
                ivar_offsets: vec![("x".into(), 8, false), ("y".into(), 16, true)],
                max_ivar_align: 8,
            },
        );
        let result = compute_objc_class_layout(classes);
        let child = &result["Child"];
        assert_eq!(child.instance_start, 16);
        assert_eq!(child.ivar_offsets.len(), 1);
        assert_eq!(child.ivar_offsets[0], ("x".to_string(), 16, false));
    }
}
