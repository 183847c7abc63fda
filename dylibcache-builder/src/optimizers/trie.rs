//! Dylib-path and executable-path tries, built the same way
//! the Mach-O export trie is: a byte-compressed prefix tree where each
//! terminal node carries a payload (a cache dylib index, or an
//! executable's on-disk path plus inode for the PrebuiltLoader set).

use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct TrieNode {
    payload: Option<Vec<u8>>,
    children: BTreeMap<Vec<u8>, TrieNode>,
}

/// A path trie over `(path_bytes -> payload_bytes)`, encoded the way
/// `original_source/cache-builder/DylibTrie*` produces the `__TEXT,__dyld_trie`
/// blob consumed by `dyld4::PrebuiltLoaderSet::findLoader`.
#[derive(Debug, Default)]
pub struct PathTrie {
    root: TrieNode,
}

impl PathTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `path -> payload`, overwriting any existing payload at the
    /// exact path. Paths are split on `/` to build shared prefixes the way
    /// aliases naturally do.
    pub fn insert(&mut self, path: &str, payload: Vec<u8>) {
        let mut node = &mut self.root;
        for segment in path_segments(path) {
            node = node.children.entry(segment).or_default();
        }
        node.payload = Some(payload);
    }

    pub fn lookup(&self, path: &str) -> Option<&[u8]> {
        let mut node = &self.root;
        for segment in path_segments(path) {
            node = node.children.get(&segment)?;
        }
        node.payload.as_deref()
    }

    /// Serializes the trie depth-first, each node as
    /// `[has_payload:u8][payload_len:uleb128][payload][child_count:uleb128]
    /// [(edge_len:uleb128 edge_bytes child)*]`, then pads to an 8-byte
    /// boundary.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_node(&self.root, &mut out);
        while out.len() % 8 != 0 {
            out.push(0);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.root.payload.is_none() && self.root.children.is_empty()
    }
}

fn path_segments(path: &str) -> Vec<Vec<u8>> {
    path.split('/').filter(|s| !s.is_empty()).map(|s| s.as_bytes().to_vec()).collect()
}

fn write_uleb128(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn write_node(node: &TrieNode, out: &mut Vec<u8>) {
    match &node.payload {
        Some(payload) => {
            out.push(1);
            write_uleb128(out, payload.len() as u64);
            out.extend_from_slice(payload);
        }
        None => out.push(0),
    }
    write_uleb128(out, node.children.len() as u64);
    for (edge, child) in &node.children {
        write_uleb128(out, edge.len() as u64);
        out.extend_from_slice(edge);
        write_node(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_inserted_paths() {
        let mut trie = PathTrie::new();
        trie.insert("/usr/lib/libSystem.B.dylib", vec![1, 0, 0, 0]);
        trie.insert("/usr/lib/libobjc.A.dylib", vec![2, 0, 0, 0]);
        assert_eq!(trie.lookup("/usr/lib/libSystem.B.dylib"), Some(&[1, 0, 0, 0][..]));
        assert_eq!(trie.lookup("/usr/lib/libobjc.A.dylib"), Some(&[2, 0, 0, 0][..]));
        assert_eq!(trie.lookup("/usr/lib/missing.dylib"), None);
    }

    #[test]
    fn serialized_form_is_8_byte_aligned() {
        let mut trie = PathTrie::new();
        trie.insert("/a", vec![9]);
        let bytes = trie.serialize();
        assert_eq!(bytes.len() % 8, 0);
    }

    #[test]
    fn empty_trie_has_no_payload() {
        let trie = PathTrie::new();
        assert!(trie.is_empty());
        assert_eq!(trie.lookup("/anything"), None);
    }
}
