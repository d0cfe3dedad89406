/* ART oat files: an ELF shared object whose `oatdata` symbol points at the oat header */

use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use log::{debug, warn};
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::combinator::all_consuming;
use nom::multi::many0;
use nom::sequence::{pair, terminated};
use nom::IResult;
use std::collections::BTreeMap;
use std::path::Path;

use crate::classpath::error::ClassPathError;
use crate::container::{DexContainer, DexEntry};
use crate::dex::dex_file::{is_dex, HEADER_SIZE};
use crate::dex::{read_u4, DexError};

pub const OAT_MAGIC: &[u8; 4] = b"oat\n";
pub const OATDATA_SYMBOL: &str = "oatdata";
pub const BOOT_CLASS_PATH_KEY: &str = "bootclasspath";

/// Oat versions before this one do not record the boot classpath.
pub const MIN_BOOT_CLASS_PATH_VERSION: u32 = 75;

// magic, version, adler32 checksum, instruction set, instruction set features
const DEX_FILE_COUNT_OFFSET: usize = 20;
// The key/value store sits behind a version dependent run of u32 header fields
const KEY_VALUE_SEARCH_LIMIT: usize = 256;

pub struct OatContainer {
    version: Option<u32>,
    key_values: BTreeMap<String, String>,
    entries: Vec<DexEntry>,
}

impl OatContainer {
    pub fn parse(path: &Path, bytes: &[u8]) -> Result<Self, ClassPathError> {
        let elf = Elf::parse(bytes).map_err(|e| ClassPathError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: format!("bad ELF image: {}", e),
        })?;
        let Some((start, end)) = oatdata_range(&elf, bytes.len()) else {
            return Err(ClassPathError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: format!("ELF image has no {} symbol", OATDATA_SYMBOL),
            });
        };
        let oat = &bytes[start..end];
        if oat.get(..4) != Some(&OAT_MAGIC[..]) {
            return Err(ClassPathError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: "oatdata does not start with an oat header".to_string(),
            });
        }
        OatContainer::from_oat_data(oat).map_err(|e| ClassPathError::dex(path, e))
    }

    /// Parse the oat header, key/value store and embedded dex images.
    pub fn from_oat_data(oat: &[u8]) -> Result<Self, DexError> {
        let version = parse_version(oat);
        let mut ix = DEX_FILE_COUNT_OFFSET;
        let dex_file_count = read_u4(oat, &mut ix)? as usize;

        let (key_values, store_end) = match find_key_value_store(oat) {
            Some((pairs, end)) => (pairs, end),
            None => {
                warn!("oat header carries no readable key/value store");
                (BTreeMap::new(), DEX_FILE_COUNT_OFFSET + 4)
            }
        };

        let entries = scan_dex_images(oat, store_end, dex_file_count);
        if entries.len() < dex_file_count {
            // Newer oat files keep their dex code in a separate vdex
            debug!("oat header lists {} dex files, {} embedded", dex_file_count, entries.len());
        }
        Ok(OatContainer { version, key_values, entries })
    }

    pub fn oat_version(&self) -> Option<u32> {
        self.version
    }

    pub fn key_value(&self, key: &str) -> Option<&str> {
        self.key_values.get(key).map(String::as_str)
    }
}

impl DexContainer for OatContainer {
    fn entry_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    fn entry(&self, name: &str) -> Option<DexEntry> {
        self.entries.iter().find(|e| e.name == name).cloned()
    }

    fn is_boot_image(&self) -> bool {
        true
    }

    fn boot_class_path(&self) -> Vec<String> {
        match self.version {
            Some(v) if v >= MIN_BOOT_CLASS_PATH_VERSION => {}
            _ => return Vec::new(),
        }
        match self.key_value(BOOT_CLASS_PATH_KEY) {
            Some(value) if !value.is_empty() => value.split(':').map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }
}

/// File range of the `oatdata` symbol, translated through the PT_LOAD segments.
fn oatdata_range(elf: &Elf, file_len: usize) -> Option<(usize, usize)> {
    let symbol = elf
        .dynsyms
        .iter()
        .find(|s| elf.dynstrtab.get_at(s.st_name) == Some(OATDATA_SYMBOL))
        .or_else(|| {
            elf.syms.iter().find(|s| elf.strtab.get_at(s.st_name) == Some(OATDATA_SYMBOL))
        })?;

    let vaddr = symbol.st_value;
    let mut offset = vaddr;
    for ph in elf.program_headers.iter().filter(|ph| ph.p_type == PT_LOAD) {
        // Header fields come straight from the file, an overflow means a forged segment
        let segment_end = ph.p_vaddr.checked_add(ph.p_filesz)?;
        if vaddr >= ph.p_vaddr && vaddr < segment_end {
            offset = (vaddr - ph.p_vaddr).checked_add(ph.p_offset)?;
            break;
        }
    }
    let offset = usize::try_from(offset).ok()?;
    if offset >= file_len {
        return None;
    }
    let end = match symbol.st_size as usize {
        0 => file_len,
        size => offset.saturating_add(size).min(file_len),
    };
    Some((offset, end))
}

fn parse_version(oat: &[u8]) -> Option<u32> {
    let digits = oat.get(4..7)?;
    if oat.get(7) != Some(&0) || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(digits.iter().fold(0, |acc, d| acc * 10 + (d - b'0') as u32))
}

type KeyValuePairs<'a> = Vec<(&'a [u8], &'a [u8])>;

/// `key\0value\0` pairs filling the whole store.
fn key_value_pairs(input: &[u8]) -> IResult<&[u8], KeyValuePairs<'_>> {
    all_consuming(many0(pair(
        terminated(take_while1(|b: u8| b.is_ascii_graphic()), tag(&b"\0"[..])),
        terminated(take_while(|b: u8| b != 0), tag(&b"\0"[..])),
    )))(input)
}

/// Locate the key/value store by its length prefix: the first u32 aligned slot
/// whose length is followed by exactly that many bytes of well formed pairs.
fn find_key_value_store(oat: &[u8]) -> Option<(BTreeMap<String, String>, usize)> {
    let limit = oat.len().min(KEY_VALUE_SEARCH_LIMIT);
    let mut ix = DEX_FILE_COUNT_OFFSET + 4;
    while ix + 4 <= limit {
        let mut cursor = ix;
        let size = read_u4(oat, &mut cursor).ok()? as usize;
        let end = cursor.saturating_add(size);
        if size > 0 && end <= oat.len() {
            if let Ok((_, pairs)) = key_value_pairs(&oat[cursor..end]) {
                if !pairs.is_empty() {
                    let store = pairs
                        .into_iter()
                        .map(|(k, v)| {
                            let key = String::from_utf8_lossy(k).into_owned();
                            (key, String::from_utf8_lossy(v).into_owned())
                        })
                        .collect();
                    return Some((store, end));
                }
            }
        }
        ix += 4;
    }
    None
}

fn scan_dex_images(oat: &[u8], from: usize, expected: usize) -> Vec<DexEntry> {
    let mut entries = Vec::new();
    let mut ix = (from + 3) & !3;
    while ix + HEADER_SIZE <= oat.len() && entries.len() < expected {
        let candidate = &oat[ix..];
        if is_dex(candidate) {
            let mut size_ix = 0x20;
            let size = read_u4(candidate, &mut size_ix).map(|s| s as usize).unwrap_or(0);
            if size >= HEADER_SIZE && size <= candidate.len() {
                let name = match entries.len() {
                    0 => "classes.dex".to_string(),
                    n => format!("classes{}.dex", n + 1),
                };
                entries.push(DexEntry::new(name, candidate[..size].to_vec()));
                ix = (ix + size + 3) & !3;
                continue;
            }
        }
        ix += 4;
    }
    entries
}
