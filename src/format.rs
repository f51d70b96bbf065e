//! Firmware image loading
use std::borrow::Cow;
use std::path::Path;
use std::str;

use anyhow::Result;
use object::{
    Endianness, elf::FileHeader32, elf::PT_LOAD, read::elf::FileHeader, read::elf::ProgramHeader,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareFormat {
    PlainHex,
    IntelHex,
    ELF,
    Binary,
}

/// Firmware contents placed at an absolute address. Gaps between sections
/// are filled with 0xFF so they stay erased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Load address of the first byte, `None` for formats without addresses
    pub address: Option<u32>,
    pub data: Vec<u8>,
}

impl Image {
    fn flat(data: Vec<u8>) -> Self {
        Image {
            address: None,
            data,
        }
    }
}

pub fn read_firmware_from_file<P: AsRef<Path>>(path: P) -> Result<Image> {
    let p = path.as_ref();
    let raw = std::fs::read(p)?;
    anyhow::ensure!(!raw.is_empty(), "{} is empty", p.display());

    let format = guess_format(p, &raw);
    log::info!("Read {} as {:?} format", p.display(), format);
    match format {
        FirmwareFormat::PlainHex => read_hex(str::from_utf8(&raw)?),
        FirmwareFormat::IntelHex => read_ihex(str::from_utf8(&raw)?),
        FirmwareFormat::ELF => read_elf(&raw),
        FirmwareFormat::Binary => Ok(Image::flat(raw)),
    }
}

pub fn guess_format(path: &Path, raw: &[u8]) -> FirmwareFormat {
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .to_lowercase();
    if ["ihex", "ihe", "h86", "hex", "a43", "a90"].contains(&&*ext) {
        return FirmwareFormat::IntelHex;
    }

    if raw.starts_with(&[0x7f, b'E', b'L', b'F']) {
        FirmwareFormat::ELF
    } else if raw.first() == Some(&b':')
        && raw
            .iter()
            .all(|&c| c.is_ascii_hexdigit() || c == b':' || c == b'\n' || c == b'\r')
    {
        FirmwareFormat::IntelHex
    } else if raw
        .iter()
        .all(|&c| c.is_ascii_hexdigit() || c.is_ascii_whitespace())
    {
        FirmwareFormat::PlainHex
    } else {
        FirmwareFormat::Binary
    }
}

pub fn read_hex(data: &str) -> Result<Image> {
    let digits: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(Image::flat(hex::decode(digits)?))
}

pub fn read_ihex(data: &str) -> Result<Image> {
    use ihex::Record;

    let mut base_address = 0;

    let mut sections = vec![];
    for record in ihex::Reader::new(data) {
        match record? {
            Record::Data { offset, value } => {
                sections.push((base_address + offset as u32, Cow::Owned(value)));
            }
            Record::ExtendedSegmentAddress(address) => {
                base_address = (address as u32) * 16;
            }
            Record::ExtendedLinearAddress(address) => {
                base_address = (address as u32) << 16;
            }
            Record::EndOfFile
            | Record::StartSegmentAddress { .. }
            | Record::StartLinearAddress(_) => (),
        }
    }
    merge_sections(sections)
}

/// Loadable segments of an ELF32 file, placed at their physical addresses.
pub fn read_elf(elf_data: &[u8]) -> Result<Image> {
    match object::FileKind::parse(elf_data)? {
        object::FileKind::Elf32 => (),
        _ => anyhow::bail!("cannot read file as ELF32 format"),
    }
    let elf_header = FileHeader32::<Endianness>::parse(elf_data)?;
    let endian = elf_header.endian()?;

    let mut sections = vec![];
    for segment in elf_header.program_headers(endian, elf_data)? {
        if segment.p_type(endian) != PT_LOAD {
            continue;
        }
        let segment_data = segment
            .data(endian, elf_data)
            .map_err(|_| anyhow::format_err!("Failed to access data for an ELF segment."))?;
        if segment_data.is_empty() {
            continue;
        }
        let p_paddr = segment.p_paddr(endian);
        log::debug!(
            "loadable segment: paddr {:#010x}, vaddr {:#010x}, {} bytes",
            p_paddr,
            segment.p_vaddr(endian),
            segment_data.len()
        );
        sections.push((p_paddr, Cow::Borrowed(segment_data)));
    }

    anyhow::ensure!(!sections.is_empty(), "empty ELF file");
    merge_sections(sections)
}

fn merge_sections(mut sections: Vec<(u32, Cow<[u8]>)>) -> Result<Image> {
    sections.sort_by_key(|(addr, _)| *addr);

    let (Some(first), Some(last)) = (sections.first(), sections.last()) else {
        anyhow::bail!("no data in firmware image");
    };
    let start_address = first.0;
    let end_address = sections
        .iter()
        .map(|(addr, data)| *addr as u64 + data.len() as u64)
        .max()
        .unwrap_or(last.0 as u64);
    anyhow::ensure!(end_address <= u32::MAX as u64 + 1, "image exceeds 32-bit address space");

    let mut binary = vec![0xFFu8; (end_address - start_address as u64) as usize];
    for (addr, sect) in &sections {
        let start = (addr - start_address) as usize;
        let dst = &mut binary[start..start + sect.len()];
        if dst.iter().any(|&b| b != 0xFF) {
            log::warn!("overlapping section at 0x{:08x}", addr);
        }
        dst.copy_from_slice(sect);
    }
    Ok(Image {
        address: Some(start_address),
        data: binary,
    })
}
