use log::debug;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Component, Path};
use zip::read::ZipArchive;

use crate::classpath::error::ClassPathError;
use crate::container::{DexContainer, DexEntry};
use crate::dex::dex_file::is_dex;

/// The dex images of an APK or JAR archive.
///
/// Only top level `*.dex` entries whose contents carry a dex magic are kept.
/// They are ordered the way the runtime loads multidex archives: `classes.dex`,
/// `classes2.dex`, `classes3.dex`, ... and then any other dex entries by name.
pub struct ZipDexContainer {
    entries: BTreeMap<EntryOrder, DexEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum EntryOrder {
    Classes(u32),
    Other(String),
}

impl EntryOrder {
    fn of(name: &str) -> EntryOrder {
        let index = name
            .strip_prefix("classes")
            .and_then(|rest| rest.strip_suffix(".dex"))
            .and_then(|n| match n {
                "" => Some(1),
                n => n.parse::<u32>().ok().filter(|n| *n > 1),
            });
        match index {
            Some(n) => EntryOrder::Classes(n),
            None => EntryOrder::Other(name.to_string()),
        }
    }
}

impl ZipDexContainer {
    pub fn from_bytes(path: &Path, bytes: Vec<u8>) -> Result<Self, ClassPathError> {
        let zip_error = |e: zip::result::ZipError| ClassPathError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: format!("zip error: {}", e),
        };
        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(zip_error)?;
        let mut entries = BTreeMap::new();
        for idx in 0..archive.len() {
            let mut entry = archive.by_index(idx).map_err(zip_error)?;
            if entry.is_dir() {
                continue;
            }
            let Some(name) = entry.enclosed_name().and_then(|p| top_level_dex_name(&p)) else {
                continue;
            };
            let mut data = Vec::new();
            entry.read_to_end(&mut data).map_err(|e| ClassPathError::io(path, e))?;
            if !is_dex(&data) {
                debug!("skipping {} in {}: not a dex image", name, path.display());
                continue;
            }
            entries.insert(EntryOrder::of(&name), DexEntry::new(name, data));
        }
        debug!("{} holds {} dex entries", path.display(), entries.len());
        Ok(ZipDexContainer { entries })
    }
}

fn top_level_dex_name(path: &Path) -> Option<String> {
    let mut components = path.components();
    let name = match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => name.to_string_lossy().into_owned(),
        _ => return None,
    };
    name.ends_with(".dex").then_some(name)
}

impl DexContainer for ZipDexContainer {
    fn entry_names(&self) -> Vec<String> {
        self.entries.values().map(|e| e.name.clone()).collect()
    }

    fn entry(&self, name: &str) -> Option<DexEntry> {
        self.entries.get(&EntryOrder::of(name)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{DexFixture, FixtureClass};
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn dex_with(class: &str) -> Vec<u8> {
        let mut fixture = DexFixture::new();
        fixture.add_class(FixtureClass::new(class));
        fixture.build()
    }

    fn archive(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn multidex_entries_are_ordered() {
        let bytes = archive(&[
            ("classes10.dex", dex_with("LJ;")),
            ("classes2.dex", dex_with("LB;")),
            ("AndroidManifest.xml", b"<manifest/>".to_vec()),
            ("classes.dex", dex_with("LA;")),
            ("assets/extra.dex", dex_with("LX;")),
        ]);
        let container = ZipDexContainer::from_bytes(Path::new("app.apk"), bytes).unwrap();
        assert_eq!(container.entry_names(), vec!["classes.dex", "classes2.dex", "classes10.dex"]);

        let dex = container.entry("classes2.dex").unwrap().parse().unwrap();
        assert_eq!(dex.type_descriptor(dex.class_defs[0].class_idx).unwrap(), "LB;");
        assert!(container.entry("assets/extra.dex").is_none());
    }

    #[test]
    fn jar_without_dex_has_no_entries() {
        let bytes = archive(&[("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n".to_vec())]);
        let container = ZipDexContainer::from_bytes(Path::new("core.jar"), bytes).unwrap();
        assert!(container.entry_names().is_empty());
    }

    #[test]
    fn fake_dex_entry_is_skipped() {
        let bytes = archive(&[("classes.dex", b"not really".to_vec())]);
        let container = ZipDexContainer::from_bytes(Path::new("odd.apk"), bytes).unwrap();
        assert!(container.entry_names().is_empty());
    }

    #[test]
    fn entry_order_naming() {
        assert_eq!(EntryOrder::of("classes.dex"), EntryOrder::Classes(1));
        assert_eq!(EntryOrder::of("classes7.dex"), EntryOrder::Classes(7));
        assert_eq!(EntryOrder::of("classes1.dex"), EntryOrder::Other("classes1.dex".to_string()));
        assert!(EntryOrder::Classes(99) < EntryOrder::Other("a.dex".to_string()));
    }
}
