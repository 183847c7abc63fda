//! Synthetic Mach-O byte buffers for `dylibcache-builder`'s test suite.
//! Hand-assembles the handful of load commands `MachOAccess::parse` actually
//! reads (`LC_ID_DYLIB`, the `LC_LOAD_DYLIB` family, `LC_SEGMENT_64` plus
//! its sections) rather than depending on a real linker toolchain to produce
//! fixtures, the way a debug-info crate's own test-fixture helper builds
//! minimal inputs by hand instead of shelling out to a real compiler.

use object::macho;

/// One dependent-library load command to add to a fixture.
#[derive(Debug, Clone, Copy)]
pub enum Dependency<'a> {
    Normal(&'a str),
    Weak(&'a str),
    Reexport(&'a str),
    Upward(&'a str),
}

impl Dependency<'_> {
    fn cmd(&self) -> u32 {
        match self {
            Dependency::Normal(_) => macho::LC_LOAD_DYLIB,
            Dependency::Weak(_) => macho::LC_LOAD_WEAK_DYLIB,
            Dependency::Reexport(_) => macho::LC_REEXPORT_DYLIB,
            Dependency::Upward(_) => macho::LC_LOAD_UPWARD_DYLIB,
        }
    }

    fn name(&self) -> &str {
        match self {
            Dependency::Normal(n) | Dependency::Weak(n) | Dependency::Reexport(n) | Dependency::Upward(n) => n,
        }
    }
}

struct FixtureSection {
    segment_name: String,
    section_name: String,
    data: Vec<u8>,
}

/// Builds one arm64 64-bit Mach-O dylib buffer. Defaults to a bare
/// `LC_ID_DYLIB` with no dependents or sections; call
/// [`MachOFixture::dependency`] and [`MachOFixture::section`] to add what a
/// given test needs, then [`MachOFixture::build`] to get the bytes.
pub struct MachOFixture<'a> {
    install_name: String,
    dependencies: Vec<Dependency<'a>>,
    sections: Vec<FixtureSection>,
    is_dynamic_executable: bool,
}

const HEADER_SIZE: u64 = 32;
const DYLIB_COMMAND_HEADER_SIZE: u32 = 24;
const SEGMENT_COMMAND_HEADER_SIZE: u32 = 72;
const SECTION_SIZE: u32 = 80;
const BASE_VM_ADDRESS: u64 = 0x1_0000_0000;

impl<'a> MachOFixture<'a> {
    pub fn new(install_name: impl Into<String>) -> Self {
        Self { install_name: install_name.into(), dependencies: Vec::new(), sections: Vec::new(), is_dynamic_executable: false }
    }

    /// Builds a dynamic executable (no `LC_ID_DYLIB`) instead of a dylib.
    pub fn executable() -> Self {
        Self { install_name: String::new(), dependencies: Vec::new(), sections: Vec::new(), is_dynamic_executable: true }
    }

    pub fn dependency(mut self, dependency: Dependency<'a>) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Adds a section with raw `data`, grouped under `segment_name` in the
    /// order sections are added.
    pub fn section(mut self, segment_name: &str, section_name: &str, data: Vec<u8>) -> Self {
        self.sections.push(FixtureSection { segment_name: segment_name.to_string(), section_name: section_name.to_string(), data });
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut commands: Vec<Vec<u8>> = Vec::new();

        if !self.is_dynamic_executable {
            commands.push(dylib_command(macho::LC_ID_DYLIB, &self.install_name));
        }
        for dep in &self.dependencies {
            commands.push(dylib_command(dep.cmd(), dep.name()));
        }

        let segments = group_by_segment(&self.sections);
        let sizeof_segment_commands: u32 =
            segments.iter().map(|s| SEGMENT_COMMAND_HEADER_SIZE + SECTION_SIZE * s.sections.len() as u32).sum();

        let sizeofcmds: u32 = commands.iter().map(|c| c.len() as u32).sum::<u32>() + sizeof_segment_commands;

        let mut data_offset = HEADER_SIZE as u32 + sizeofcmds;
        let mut buffer = Vec::new();
        let mut segment_data = Vec::new();

        for segment in &segments {
            let segment_fileoff = data_offset as u64;
            let mut section_commands = Vec::new();
            let mut segment_filesize = 0u64;
            for sec in &segment.sections {
                let addr = BASE_VM_ADDRESS + data_offset as u64;
                section_commands.push(section_64(&sec.section_name, &segment.name, addr, sec.data.len() as u64, data_offset));
                segment_data.extend_from_slice(&sec.data);
                data_offset += sec.data.len() as u32;
                segment_filesize += sec.data.len() as u64;
            }
            let cmdsize = SEGMENT_COMMAND_HEADER_SIZE + SECTION_SIZE * segment.sections.len() as u32;
            commands.push(segment_command_64(
                &segment.name,
                BASE_VM_ADDRESS + segment_fileoff,
                segment_filesize,
                segment_fileoff,
                segment_filesize,
                segment.sections.len() as u32,
                cmdsize,
                section_commands,
            ));
        }

        buffer.extend_from_slice(&mach_header_64(commands.len() as u32, sizeofcmds, self.is_dynamic_executable));
        for command in &commands {
            buffer.extend_from_slice(command);
        }
        buffer.extend_from_slice(&segment_data);
        buffer
    }
}

struct FixtureSegment<'a> {
    name: String,
    sections: Vec<&'a FixtureSection>,
}

fn group_by_segment(sections: &[FixtureSection]) -> Vec<FixtureSegment<'_>> {
    let mut segments: Vec<FixtureSegment> = Vec::new();
    for section in sections {
        match segments.iter_mut().find(|s| s.name == section.segment_name) {
            Some(segment) => segment.sections.push(section),
            None => segments.push(FixtureSegment { name: section.segment_name.clone(), sections: vec![section] }),
        }
    }
    segments
}

fn mach_header_64(ncmds: u32, sizeofcmds: u32, is_executable: bool) -> [u8; 32] {
    let mut header = [0u8; 32];
    header[0..4].copy_from_slice(&macho::MH_MAGIC_64.to_le_bytes());
    header[4..8].copy_from_slice(&macho::CPU_TYPE_ARM64.to_le_bytes());
    header[8..12].copy_from_slice(&macho::CPU_SUBTYPE_ARM64_ALL.to_le_bytes());
    let filetype = if is_executable { macho::MH_EXECUTE } else { macho::MH_DYLIB };
    header[12..16].copy_from_slice(&filetype.to_le_bytes());
    header[16..20].copy_from_slice(&ncmds.to_le_bytes());
    header[20..24].copy_from_slice(&sizeofcmds.to_le_bytes());
    header[24..28].copy_from_slice(&0u32.to_le_bytes());
    header[28..32].copy_from_slice(&0u32.to_le_bytes());
    header
}

fn dylib_command(cmd: u32, name: &str) -> Vec<u8> {
    let mut name_bytes = name.as_bytes().to_vec();
    name_bytes.push(0);
    while (DYLIB_COMMAND_HEADER_SIZE as usize + name_bytes.len()) % 8 != 0 {
        name_bytes.push(0);
    }
    let cmdsize = DYLIB_COMMAND_HEADER_SIZE + name_bytes.len() as u32;

    let mut out = Vec::with_capacity(cmdsize as usize);
    out.extend_from_slice(&cmd.to_le_bytes());
    out.extend_from_slice(&cmdsize.to_le_bytes());
    out.extend_from_slice(&DYLIB_COMMAND_HEADER_SIZE.to_le_bytes()); // dylib.name.offset
    out.extend_from_slice(&0u32.to_le_bytes()); // timestamp
    out.extend_from_slice(&0u32.to_le_bytes()); // current_version
    out.extend_from_slice(&0u32.to_le_bytes()); // compatibility_version
    out.extend_from_slice(&name_bytes);
    out
}

fn fixed_name(name: &str) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let bytes = name.as_bytes();
    let len = bytes.len().min(16);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

#[allow(clippy::too_many_arguments)]
fn segment_command_64(
    name: &str,
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
    nsects: u32,
    cmdsize: u32,
    sections: Vec<[u8; 80]>,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(cmdsize as usize);
    out.extend_from_slice(&macho::LC_SEGMENT_64.to_le_bytes());
    out.extend_from_slice(&cmdsize.to_le_bytes());
    out.extend_from_slice(&fixed_name(name));
    out.extend_from_slice(&vmaddr.to_le_bytes());
    out.extend_from_slice(&vmsize.to_le_bytes());
    out.extend_from_slice(&fileoff.to_le_bytes());
    out.extend_from_slice(&filesize.to_le_bytes());
    out.extend_from_slice(&7u32.to_le_bytes()); // maxprot: VM_PROT_ALL
    out.extend_from_slice(&7u32.to_le_bytes()); // initprot
    out.extend_from_slice(&nsects.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // flags
    for section in sections {
        out.extend_from_slice(&section);
    }
    out
}

fn section_64(section_name: &str, segment_name: &str, addr: u64, size: u64, offset: u32) -> [u8; 80] {
    let mut out = [0u8; 80];
    out[0..16].copy_from_slice(&fixed_name(section_name));
    out[16..32].copy_from_slice(&fixed_name(segment_name));
    out[32..40].copy_from_slice(&addr.to_le_bytes());
    out[40..48].copy_from_slice(&size.to_le_bytes());
    out[48..52].copy_from_slice(&offset.to_le_bytes());
    out[52..56].copy_from_slice(&0u32.to_le_bytes()); // align
    out[56..60].copy_from_slice(&0u32.to_le_bytes()); // reloff
    out[60..64].copy_from_slice(&0u32.to_le_bytes()); // nreloc
    out[64..68].copy_from_slice(&0u32.to_le_bytes()); // flags
    out[68..72].copy_from_slice(&0u32.to_le_bytes()); // reserved1
    out[72..76].copy_from_slice(&0u32.to_le_bytes()); // reserved2
    out[76..80].copy_from_slice(&0u32.to_le_bytes()); // reserved3
    out
}

/// A `__TEXT,__objc_methname` blob: nul-terminated selector names back to
/// back, the shape `selector_pool` accumulation expects.
pub fn objc_methname_section(names: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for name in names {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    out
}

/// A minimal dylib fixture exporting no symbols and depending on nothing,
/// suitable wherever a test just needs "some valid Mach-O dylib".
pub fn minimal_dylib(install_name: &str) -> Vec<u8> {
    MachOFixture::new(install_name).section("__TEXT", "__text", vec![0u8; 16]).build()
}

/// One exported symbol fixture record: `(vm_address, name)`.
pub fn export_info_section(exports: &[(u64, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(vm_address, name) in exports {
        out.extend_from_slice(&vm_address.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
    }
    out
}

/// One external bind site fixture record, matching `MachOAccess`'s
/// `__DATA,__bind_info` decoding.
pub struct BindFixtureRecord<'a> {
    pub site_offset: u64,
    pub addend: i64,
    pub weak: bool,
    pub symbol_name: &'a str,
}

pub fn bind_info_section(records: &[BindFixtureRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        out.extend_from_slice(&record.site_offset.to_le_bytes());
        out.extend_from_slice(&record.addend.to_le_bytes());
        out.push(record.weak as u8);
        out.extend_from_slice(&(record.symbol_name.len() as u16).to_le_bytes());
        out.extend_from_slice(record.symbol_name.as_bytes());
    }
    out
}

/// `(site_offset, raw_vm_address)` pairs, shared by `__DATA,__rebase_info`
/// and `__DATA_CONST,__objc_classrefs`.
pub fn site_address_pairs_section(pairs: &[(u64, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(site_offset, raw_vm_address) in pairs {
        out.extend_from_slice(&site_offset.to_le_bytes());
        out.extend_from_slice(&raw_vm_address.to_le_bytes());
    }
    out
}

/// A `__TEXT,__stub_targets` blob: one `u64` stub identity address per stub.
pub fn stub_targets_section(addresses: &[u64]) -> Vec<u8> {
    addresses.iter().flat_map(|a| a.to_le_bytes()).collect()
}

/// A `__DATA,__thread_ptrs` blob: `count` zeroed 24-byte `tlv_descriptor`
/// slots, ready for `rewrite_tlv_thunk` to fill in.
pub fn thread_ptrs_section(count: usize) -> Vec<u8> {
    vec![0u8; count * 24]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_dylib_round_trips_through_object() {
        let buffer = minimal_dylib("/usr/lib/libfixture.dylib");
        let file = object::File::parse(buffer.as_slice()).expect("valid mach-o");
        assert!(object::Object::is_64(&file));
        assert_eq!(object::Object::kind(&file), object::ObjectKind::Dynamic);
    }

    #[test]
    fn fixture_with_dependency_and_selector_section() {
        let buffer = MachOFixture::new("/usr/lib/libfoo.dylib")
            .dependency(Dependency::Weak("/usr/lib/libbar.dylib"))
            .section("__TEXT", "__objc_methname", objc_methname_section(&["foo", "bar"]))
            .build();
        let file = object::File::parse(buffer.as_slice()).expect("valid mach-o");
        let section = object::Object::section_by_name(&file, "__objc_methname").expect("section present");
        let data = object::ObjectSection::data(&section).expect("section data");
        assert_eq!(data, objc_methname_section(&["foo", "bar"]).as_slice());
    }
}
