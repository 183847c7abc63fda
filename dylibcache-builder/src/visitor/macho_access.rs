//! `MachOAccess`: the external Mach-O parsing collaborator, backed by the
//! `object` crate the way a debug-info accessor backs its own typed view
//! with a lower-level parsing crate. Everything downstream of this module
//! works with the plain [`Segment`]/[`Section`]/[`DependentLibrary`]
//! records, never with `object` types directly — the same "convert at the
//! boundary" shape such an accessor uses over its parsing layer.

use object::macho;
use object::read::macho::{LoadCommandVariant, MachHeader};
use object::{Endianness, Object, ObjectSection, ObjectSegment};

use dylibcache_types::InputDylibVMAddress;

use crate::error::{BuilderError, Result};

/// A Mach-O segment, converted into plain data at the parsing boundary.
#[derive(Debug, Clone)]
pub struct Segment {
    pub name: String,
    pub vm_start: InputDylibVMAddress,
    pub vm_size: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub max_protection: u32,
    pub init_protection: u32,
    pub data: Vec<u8>,
}

/// A section within a segment.
#[derive(Debug, Clone)]
pub struct Section {
    pub segment_name: String,
    pub section_name: String,
    pub vm_address: InputDylibVMAddress,
    pub size: u64,
    pub data: Vec<u8>,
}

/// One `LC_LOAD_DYLIB`/`LC_LOAD_WEAK_DYLIB`/`LC_REEXPORT_DYLIB`/
/// `LC_LOAD_UPWARD_DYLIB` entry.
#[derive(Debug, Clone)]
pub struct DependentLibrary {
    pub install_name: String,
    pub kind: dylibcache_types::DependentKind,
}

/// One external bind site found in `__DATA,__bind_info`, standing in for
/// real fixup-chain enumeration (an external collaborator per the design's
/// convention) until a fixture exercises one.
#[derive(Debug, Clone)]
pub struct BindSiteRecord {
    pub site_offset: usize,
    pub symbol_name: String,
    pub addend: i64,
    pub weak: bool,
}

/// Parsed, format-agnostic view of one Mach-O slice. Holds everything
/// `InputRegistry`, the `Optimizers`, and `DylibPassRunner` need without
/// re-parsing.
pub struct MachOAccess {
    pub is_64: bool,
    pub is_dylib: bool,
    pub is_dynamic_executable: bool,
    pub install_name: Option<String>,
    pub segments: Vec<Segment>,
    pub sections: Vec<Section>,
    pub dependents: Vec<DependentLibrary>,
    pub has_objc: bool,
    pub has_thread_local_variables: bool,
    pub exported_symbols: Vec<String>,
    /// `(name, input-image vm address)` for every export, read from
    /// `object`'s real export-trie walk when present, else from a
    /// `__TEXT,__export_info` fixture section (see [`parse_export_info`]).
    pub exported_symbol_addresses: Vec<(String, InputDylibVMAddress)>,
    /// External bind sites from `__DATA,__bind_info`.
    pub bind_sites: Vec<BindSiteRecord>,
    /// Local (intra-dylib) fixup sites from `__DATA,__rebase_info`:
    /// `(site_offset, target address in this dylib's own input VM space)`.
    pub rebase_sites: Vec<(usize, InputDylibVMAddress)>,
    /// `objc` class-reference slots from `__DATA_CONST,__objc_classrefs`,
    /// same shape as `rebase_sites`.
    pub classref_sites: Vec<(usize, InputDylibVMAddress)>,
    /// Stub call-site target addresses from `__TEXT,__stub_targets`.
    pub stub_sites: Vec<InputDylibVMAddress>,
    /// Byte offsets of `tlv_descriptor` records in `__DATA,__thread_ptrs`.
    pub tlv_thunk_sites: Vec<usize>,
    pub entry_point: Option<u64>,
}

impl MachOAccess {
    /// Parses one architecture slice of a (possibly fat) Mach-O buffer.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let file = object::File::parse(data).map_err(|e| BuilderError::FormatUnsupported {
            dylib: "<input>".into(),
            detail: format!("object parse failed: {e}"),
        })?;

        let is_64 = file.is_64();
        let is_dylib = matches!(file.kind(), object::ObjectKind::Dynamic);
        let is_dynamic_executable = matches!(file.kind(), object::ObjectKind::Executable);

        let mut segments = Vec::new();
        let mut sections = Vec::new();
        for seg in file.segments() {
            let name = seg.name().ok().flatten().unwrap_or_default().to_string();
            let data = seg.data().unwrap_or_default().to_vec();
            segments.push(Segment {
                name,
                vm_start: InputDylibVMAddress(seg.address()),
                vm_size: seg.size(),
                file_offset: seg.file_range().0,
                file_size: seg.file_range().1,
                max_protection: 0,
                init_protection: 0,
                data,
            });
        }
        for sec in file.sections() {
            let seg_name = sec.segment_name().ok().flatten().unwrap_or_default().to_string();
            let sec_name = sec.name().unwrap_or_default().to_string();
            sections.push(Section {
                segment_name: seg_name,
                section_name: sec_name,
                vm_address: InputDylibVMAddress(sec.address()),
                size: sec.size(),
                data: sec.data().unwrap_or_default().to_vec(),
            });
        }

        let has_objc = sections.iter().any(|s| s.segment_name.starts_with("__DATA") && s.section_name.contains("objc"))
            || sections.iter().any(|s| s.section_name == "__objc_imageinfo");
        let has_thread_local_variables = sections.iter().any(|s| s.section_name.starts_with("__thread_"));

        let mut exported_symbol_addresses: Vec<(String, InputDylibVMAddress)> = file
            .exports()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|e| std::str::from_utf8(e.name()).ok().map(|n| (n.to_owned(), InputDylibVMAddress(e.address()))))
            .collect();

        let mut export_info_fallback = Vec::new();
        let mut bind_sites = Vec::new();
        let mut rebase_sites = Vec::new();
        let mut classref_sites = Vec::new();
        let mut stub_sites = Vec::new();
        let mut tlv_thunk_sites = Vec::new();
        for section in &sections {
            match section.section_name.as_str() {
                "__export_info" => export_info_fallback.extend(parse_export_info(&section.data)),
                "__bind_info" => bind_sites.extend(parse_bind_info(&section.data)),
                "__rebase_info" => rebase_sites.extend(parse_site_address_pairs(&section.data)),
                "__objc_classrefs" => classref_sites.extend(parse_site_address_pairs(&section.data)),
                "__stub_targets" => stub_sites.extend(parse_stub_targets(&section.data)),
                "__thread_ptrs" => tlv_thunk_sites.extend(parse_thread_ptr_sites(&section.data)),
                _ => {}
            }
        }
        if exported_symbol_addresses.is_empty() {
            exported_symbol_addresses = export_info_fallback;
        }
        let exported_symbols: Vec<String> = exported_symbol_addresses.iter().map(|(name, _)| name.clone()).collect();

        let (install_name, dependents) = parse_dylib_commands(data).unwrap_or_default();

        Ok(Self {
            is_64,
            is_dylib,
            is_dynamic_executable,
            install_name,
            segments,
            sections,
            dependents,
            has_objc,
            has_thread_local_variables,
            exported_symbols,
            exported_symbol_addresses,
            bind_sites,
            rebase_sites,
            classref_sites,
            stub_sites,
            tlv_thunk_sites,
            entry_point: Some(file.entry()).filter(|&e| e != 0),
        })
    }
}

/// Decodes `__TEXT,__export_info`: `[vm_address: u64 LE][name_len: u16
/// LE][name bytes]` repeated. Only consulted when `object`'s own export-trie
/// walk finds nothing, which is always true for hand-built fixtures that
/// carry no real export trie.
fn parse_export_info(data: &[u8]) -> Vec<(String, InputDylibVMAddress)> {
    let mut out = Vec::new();
    let mut cursor = 0usize;
    while cursor + 10 <= data.len() {
        let vm_address = u64::from_le_bytes(data[cursor..cursor + 8].try_into().unwrap());
        let name_len = u16::from_le_bytes(data[cursor + 8..cursor + 10].try_into().unwrap()) as usize;
        cursor += 10;
        if cursor + name_len > data.len() {
            break;
        }
        if let Ok(name) = std::str::from_utf8(&data[cursor..cursor + name_len]) {
            out.push((name.to_string(), InputDylibVMAddress(vm_address)));
        }
        cursor += name_len;
    }
    out
}

/// Decodes `__DATA,__bind_info`: `[site_offset: u64 LE][addend: i64 LE]
/// [weak: u8][name_len: u16 LE][name bytes]` repeated, a stand-in for real
/// fixup-chain enumeration of external bind sites.
fn parse_bind_info(data: &[u8]) -> Vec<BindSiteRecord> {
    let mut out = Vec::new();
    let mut cursor = 0usize;
    while cursor + 19 <= data.len() {
        let site_offset = u64::from_le_bytes(data[cursor..cursor + 8].try_into().unwrap()) as usize;
        let addend = i64::from_le_bytes(data[cursor + 8..cursor + 16].try_into().unwrap());
        let weak = data[cursor + 16] != 0;
        let name_len = u16::from_le_bytes(data[cursor + 17..cursor + 19].try_into().unwrap()) as usize;
        cursor += 19;
        if cursor + name_len > data.len() {
            break;
        }
        if let Ok(name) = std::str::from_utf8(&data[cursor..cursor + name_len]) {
            out.push(BindSiteRecord { site_offset, symbol_name: name.to_string(), addend, weak });
        }
        cursor += name_len;
    }
    out
}

/// Decodes `__DATA,__rebase_info` and `__DATA_CONST,__objc_classrefs`: a flat
/// array of `[site_offset: u64 LE][raw_vm_address: u64 LE]` pairs, a
/// stand-in for real local-fixup-chain enumeration.
fn parse_site_address_pairs(data: &[u8]) -> Vec<(usize, InputDylibVMAddress)> {
    data.chunks_exact(16)
        .map(|chunk| {
            let site_offset = u64::from_le_bytes(chunk[0..8].try_into().unwrap()) as usize;
            let raw_vm_address = u64::from_le_bytes(chunk[8..16].try_into().unwrap());
            (site_offset, InputDylibVMAddress(raw_vm_address))
        })
        .collect()
}

/// Decodes `__TEXT,__stub_targets`: a flat array of `u64 LE` stub identity
/// addresses, one per stub, in stub order.
fn parse_stub_targets(data: &[u8]) -> Vec<InputDylibVMAddress> {
    data.chunks_exact(8).map(|c| InputDylibVMAddress(u64::from_le_bytes(c.try_into().unwrap()))).collect()
}

/// Decodes `__DATA,__thread_ptrs`: 24-byte `tlv_descriptor`-shaped records
/// (`thunk: u64`, `key: u64`, `offset: u64`). Only the site offset of each
/// record is needed here; `rewrite_tlv_thunk` overwrites the thunk/key words
/// once a key has been assigned.
fn parse_thread_ptr_sites(data: &[u8]) -> Vec<usize> {
    (0..data.len() / 24).map(|i| i * 24).collect()
}

/// Walks `LC_ID_DYLIB`/`LC_LOAD_DYLIB`-family load commands directly via
/// `object`'s Mach-O load-command iterator, since the generic `Object`
/// trait has no format-neutral notion of "dylib dependency".
fn parse_dylib_commands(data: &[u8]) -> Option<(Option<String>, Vec<DependentLibrary>)> {
    use dylibcache_types::DependentKind;

    let header = macho::MachHeader64::<Endianness>::parse(data, 0).ok()?;
    let endian = header.endian().ok()?;
    let mut commands = header.load_commands(endian, data, 0).ok()?;

    let mut install_name = None;
    let mut dependents = Vec::new();
    while let Ok(Some(command)) = commands.next() {
        let cmd = command.cmd();
        match command.variant() {
            Ok(LoadCommandVariant::Dylib(dylib)) => {
                let name = command
                    .string(endian, dylib.dylib.name)
                    .ok()
                    .and_then(|s| std::str::from_utf8(s).ok())
                    .unwrap_or_default()
                    .to_string();
                let kind = match cmd {
                    macho::LC_LOAD_WEAK_DYLIB => DependentKind::WeakLink,
                    macho::LC_REEXPORT_DYLIB => DependentKind::Reexport,
                    macho::LC_LOAD_UPWARD_DYLIB => DependentKind::Upward,
                    _ => DependentKind::Normal,
                };
                dependents.push(DependentLibrary { install_name: name, kind });
            }
            Ok(LoadCommandVariant::IdDylib(dylib)) => {
                install_name = command
                    .string(endian, dylib.dylib.name)
                    .ok()
                    .and_then(|s| std::str::from_utf8(s).ok())
                    .map(ToOwned::to_owned);
            }
            _ => {}
        }
    }
    Some((install_name, dependents))
}
