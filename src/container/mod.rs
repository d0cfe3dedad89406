//! Dex containers: the files a classpath is built from.
//!
//! A container is anything that holds one or more dex images under entry names:
//! a bare `.dex`, an APK/JAR archive, an `.odex` wrapper or an ART `.oat` boot
//! image. [`FileContainerOpener`] sniffs the magic number and picks the reader.

pub mod oat;
pub mod zip;

use log::{debug, warn};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::classpath::config::Opcodes;
use crate::classpath::error::ClassPathError;
use crate::dex::dex_file::{is_dex, Header};
use crate::dex::{read_u4, DexError, DexFile};

pub use self::oat::OatContainer;
pub use self::zip::ZipDexContainer;

const ODEX_MAGIC_PREFIX: &[u8; 4] = b"dey\n";
const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";
const EMPTY_ZIP_MAGIC: &[u8; 4] = b"PK\x05\x06";
const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// One dex image inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexEntry {
    pub name: String,
    pub bytes: Arc<[u8]>,
}

impl DexEntry {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        DexEntry { name: name.into(), bytes: bytes.into() }
    }

    pub fn parse(&self) -> Result<DexFile, DexError> {
        DexFile::from_bytes(&self.bytes).map_err(|e| DexError::with_context(e, self.name.clone()))
    }
}

/// An opened container. Entry names are stable for the lifetime of the value.
pub trait DexContainer {
    fn entry_names(&self) -> Vec<String>;

    fn entry(&self, name: &str) -> Option<DexEntry>;

    /// True for ART boot images, whose dependencies are listed in
    /// [`DexContainer::boot_class_path`].
    fn is_boot_image(&self) -> bool {
        false
    }

    fn boot_class_path(&self) -> Vec<String> {
        Vec::new()
    }
}

pub trait ContainerOpener {
    fn open(&self, path: &Path, opcodes: &Opcodes) -> Result<Box<dyn DexContainer>, ClassPathError>;
}

/// Reads containers from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileContainerOpener;

impl ContainerOpener for FileContainerOpener {
    fn open(
        &self,
        path: &Path,
        opcodes: &Opcodes,
    ) -> Result<Box<dyn DexContainer>, ClassPathError> {
        let bytes = fs::read(path).map_err(|e| ClassPathError::io(path, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        open_bytes(path, &name, bytes, opcodes)
    }
}

/// Pick a container reader for `bytes` by magic number.
pub fn open_bytes(
    path: &Path,
    name: &str,
    bytes: Vec<u8>,
    opcodes: &Opcodes,
) -> Result<Box<dyn DexContainer>, ClassPathError> {
    let magic = bytes.get(..4).unwrap_or(&[]);
    if is_dex(&bytes) {
        check_dex_version(name, &bytes, opcodes);
        debug!("{} is a raw dex file", path.display());
        Ok(Box::new(RawDexContainer::new(name, bytes)))
    } else if magic == ODEX_MAGIC_PREFIX {
        let container =
            OdexContainer::parse(name, &bytes).map_err(|e| ClassPathError::dex(path, e))?;
        debug!("{} is an odex file", path.display());
        Ok(Box::new(container))
    } else if magic == ZIP_MAGIC || magic == EMPTY_ZIP_MAGIC {
        let container = ZipDexContainer::from_bytes(path, bytes)?;
        for entry in container.entry_names() {
            if let Some(e) = container.entry(&entry) {
                check_dex_version(&entry, &e.bytes, opcodes);
            }
        }
        Ok(Box::new(container))
    } else if magic == ELF_MAGIC {
        let container = OatContainer::parse(path, &bytes)?;
        if let Some(version) = container.oat_version() {
            debug!("{} is an oat file, version {:03}", path.display(), version);
        }
        Ok(Box::new(container))
    } else {
        Err(ClassPathError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: format!("unknown magic {:02x?}", magic),
        })
    }
}

fn check_dex_version(name: &str, bytes: &[u8], opcodes: &Opcodes) {
    let mut ix = 0;
    if let Ok(header) = Header::read(bytes, &mut ix) {
        if !opcodes.supports_dex_version(header.version()) {
            warn!(
                "{} is dex version {:03}, newer than API level {} supports",
                name, header.version(), opcodes.api_level
            );
        }
    }
}

/// A single bare dex file, exposed as one entry named after the file.
#[derive(Debug, Clone)]
pub struct RawDexContainer {
    entry: DexEntry,
}

impl RawDexContainer {
    pub fn new(name: &str, bytes: Vec<u8>) -> Self {
        RawDexContainer { entry: DexEntry::new(name, bytes) }
    }
}

impl DexContainer for RawDexContainer {
    fn entry_names(&self) -> Vec<String> {
        vec![self.entry.name.clone()]
    }

    fn entry(&self, name: &str) -> Option<DexEntry> {
        (name == self.entry.name).then(|| self.entry.clone())
    }
}

/// A pre-optimized dex file: a small `dey\n` header followed by the embedded dex image.
#[derive(Debug, Clone)]
pub struct OdexContainer {
    entry: Option<DexEntry>,
}

impl OdexContainer {
    pub fn parse(name: &str, bytes: &[u8]) -> Result<Self, DexError> {
        let mut ix = 8;
        let dex_offset = read_u4(bytes, &mut ix)? as usize;
        let dex_length = read_u4(bytes, &mut ix)? as usize;
        let end = dex_offset.checked_add(dex_length).unwrap_or(usize::MAX);
        if end > bytes.len() {
            return Err(err!(
                "odex dex section {}..{} exceeds file size {}",
                dex_offset,
                end,
                bytes.len()
            ));
        }
        let image = &bytes[dex_offset..end];
        // An odex whose payload is not a dex image has nothing to offer
        let entry = is_dex(image).then(|| DexEntry::new(name, image.to_vec()));
        Ok(OdexContainer { entry })
    }
}

impl DexContainer for OdexContainer {
    fn entry_names(&self) -> Vec<String> {
        self.entry.iter().map(|e| e.name.clone()).collect()
    }

    fn entry(&self, name: &str) -> Option<DexEntry> {
        self.entry.as_ref().filter(|e| e.name == name).cloned()
    }
}
