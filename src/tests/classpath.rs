use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use crate::classpath::{
    dependency_file_name, ClassPathConfig, ClassPathError, ClassPathResolver, Opcodes,
};
use crate::container::{ContainerOpener, DexContainer, DexEntry};

#[derive(Debug, Clone, Default)]
struct FakeContainer {
    entries: Vec<String>,
    boot_image: bool,
    boot_class_path: Vec<String>,
    // Listed by entry_names but never handed out
    unreadable: Vec<String>,
}

impl FakeContainer {
    fn dex(entries: &[&str]) -> Self {
        FakeContainer {
            entries: entries.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
    }

    fn oat(entries: &[&str], boot_class_path: &[&str]) -> Self {
        FakeContainer {
            entries: entries.iter().map(|e| e.to_string()).collect(),
            boot_image: true,
            boot_class_path: boot_class_path.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
    }
}

impl DexContainer for FakeContainer {
    fn entry_names(&self) -> Vec<String> {
        self.entries.clone()
    }

    fn entry(&self, name: &str) -> Option<DexEntry> {
        self.entries
            .iter()
            .find(|e| *e == name && !self.unreadable.contains(e))
            .map(|e| DexEntry::new(e.as_str(), b"dex\n035\0".to_vec()))
    }

    fn is_boot_image(&self) -> bool {
        self.boot_image
    }

    fn boot_class_path(&self) -> Vec<String> {
        self.boot_class_path.clone()
    }
}

/// Serves containers by file name and records every open.
#[derive(Clone, Default)]
struct FakeOpener {
    containers: HashMap<String, FakeContainer>,
    opened: Rc<RefCell<Vec<String>>>,
}

impl ContainerOpener for FakeOpener {
    fn open(
        &self,
        path: &Path,
        _opcodes: &Opcodes,
    ) -> Result<Box<dyn DexContainer>, ClassPathError> {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        self.opened.borrow_mut().push(name.clone());
        match self.containers.get(&name) {
            Some(container) => Ok(Box::new(container.clone())),
            None => Err(ClassPathError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: "unknown test file".to_string(),
            }),
        }
    }
}

/// A directory of placeholder files plus an opener that knows their contents.
struct Workspace {
    dir: TempDir,
    opener: FakeOpener,
}

impl Workspace {
    fn new() -> Self {
        Workspace { dir: tempfile::tempdir().unwrap(), opener: FakeOpener::default() }
    }

    fn add(&mut self, relative: &str, container: FakeContainer) -> PathBuf {
        let path = self.dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"placeholder").unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        self.opener.containers.insert(name, container);
        path
    }

    fn resolver(&self) -> ClassPathResolver {
        ClassPathResolver::with_opener(Opcodes::default(), Box::new(self.opener.clone()))
    }

    fn open_count(&self, name: &str) -> usize {
        self.opener.opened.borrow().iter().filter(|n| *n == name).count()
    }
}

fn provider_names(resolver: &ClassPathResolver) -> Vec<String> {
    resolver
        .class_providers()
        .iter()
        .map(|p| {
            let container = p.container().file_name().unwrap().to_string_lossy();
            format!("{}:{}", container, p.entry_name())
        })
        .collect()
}

#[test]
fn loading_is_idempotent() {
    let mut ws = Workspace::new();
    let apk = ws.add("app.apk", FakeContainer::dex(&["classes.dex", "classes2.dex"]));
    let mut resolver = ws.resolver();

    resolver.load_entry(&apk, true).unwrap();
    resolver.load_entry(&apk, true).unwrap();

    assert_eq!(provider_names(&resolver), vec!["app.apk:classes.dex", "app.apk:classes2.dex"]);
    assert_eq!(resolver.loaded_files().len(), 1);
    assert_eq!(ws.open_count("app.apk"), 1);
}

#[test]
fn oat_dependencies_load_one_level_deep() {
    let mut ws = Workspace::new();
    let boot = ws.add(
        "boot.oat",
        FakeContainer::oat(&["core.dex"], &["/system/framework/boot-framework.art"]),
    );
    ws.add(
        "boot-framework.oat",
        FakeContainer::oat(&["framework.dex"], &["/system/framework/boot-extra.art"]),
    );
    let mut resolver = ws.resolver();

    resolver.load_entry(&boot, true).unwrap();

    assert_eq!(
        provider_names(&resolver),
        vec!["boot.oat:core.dex", "boot-framework.oat:framework.dex"]
    );
    assert_eq!(ws.open_count("boot-extra.oat"), 0);
}

#[test]
fn dependency_cycle_terminates() {
    let mut ws = Workspace::new();
    let x = ws.add("x.oat", FakeContainer::oat(&["x.dex"], &["y.art"]));
    let y = ws.add("y.oat", FakeContainer::oat(&["y.dex"], &["x.art"]));
    let mut resolver = ws.resolver();

    resolver.load_entry(&x, true).unwrap();
    resolver.load_entry(&y, true).unwrap();

    assert_eq!(provider_names(&resolver), vec!["x.oat:x.dex", "y.oat:y.dex"]);
    assert_eq!(resolver.loaded_files().len(), 2);
    assert_eq!(ws.open_count("x.oat"), 1);
    assert_eq!(ws.open_count("y.oat"), 1);
}

#[test]
fn dependencies_are_skipped_when_not_requested() {
    let mut ws = Workspace::new();
    let boot = ws.add("boot.oat", FakeContainer::oat(&["core.dex"], &["missing.art"]));
    let mut resolver = ws.resolver();

    resolver.load_entry(&boot, false).unwrap();
    assert_eq!(provider_names(&resolver), vec!["boot.oat:core.dex"]);
}

#[test]
fn dependency_name_transform() {
    assert_eq!(dependency_file_name("/system/framework/boot.art"), "boot.oat");
    assert_eq!(dependency_file_name("boot.art"), "boot.oat");
    assert_eq!(dependency_file_name("/apex/com.android.art/javalib/core-oj.jar"), "core-oj.jar");
    assert_eq!(dependency_file_name("dir/"), "");
    assert_eq!(dependency_file_name("/system/framework/dependency.oat"), "dependency.oat");
    assert_eq!(dependency_file_name("dependency.oat"), "dependency.oat");
    // Only the lower case extension is rewritten
    assert_eq!(dependency_file_name("/system/framework/name.ART"), "name.ART");
}

#[test]
fn empty_container_fails_and_stays_unloaded() {
    let mut ws = Workspace::new();
    let jar = ws.add("empty.jar", FakeContainer::dex(&[]));
    let mut resolver = ws.resolver();

    let first = resolver.load_entry(&jar, true).unwrap_err();
    assert!(first.is_no_dex_entries());
    assert!(resolver.loaded_files().is_empty());

    let second = resolver.load_entry(&jar, true).unwrap_err();
    assert!(second.is_no_dex_entries());
    assert_eq!(ws.open_count("empty.jar"), 2);
    assert!(resolver.class_providers().is_empty());
}

#[test]
fn unreadable_entry_leaves_container_unloaded() {
    let mut ws = Workspace::new();
    let apk = ws.add(
        "broken.apk",
        FakeContainer {
            unreadable: vec!["classes2.dex".to_string()],
            ..FakeContainer::dex(&["classes.dex", "classes2.dex"])
        },
    );
    let mut resolver = ws.resolver();

    let err = resolver.load_entry(&apk, true).unwrap_err();
    assert!(matches!(err, ClassPathError::Dex { .. }));
    assert!(resolver.loaded_files().is_empty());
    assert!(resolver.class_providers().is_empty());

    // Nothing was recorded, so a second attempt opens the file again
    assert!(resolver.load_entry(&apk, true).is_err());
    assert_eq!(ws.open_count("broken.apk"), 2);
}

#[test]
fn missing_dependency_is_wrapped() {
    let mut ws = Workspace::new();
    let boot =
        ws.add("boot.oat", FakeContainer::oat(&["core.dex"], &["/system/framework/gone.art"]));
    let mut resolver = ws.resolver();

    let err = resolver.load_entry(&boot, true).unwrap_err();
    match &err {
        ClassPathError::Resolution { message, .. } => {
            assert_eq!(message, &format!("error while loading oat file {}", boot.display()));
        }
        other => panic!("unexpected error {:?}", other),
    }
    match err.root_cause() {
        ClassPathError::DependencyNotFound { name, .. } => assert_eq!(name, "gone.oat"),
        other => panic!("unexpected root cause {:?}", other),
    }
    // The image itself was registered before its dependencies were examined
    assert_eq!(provider_names(&resolver), vec!["boot.oat:core.dex"]);
}

#[test]
fn empty_dependency_is_wrapped() {
    let mut ws = Workspace::new();
    let boot = ws.add("boot.oat", FakeContainer::oat(&["core.dex"], &["hollow.art"]));
    ws.add("hollow.oat", FakeContainer::oat(&[], &[]));
    let mut resolver = ws.resolver();

    let err = resolver.load_entry(&boot, true).unwrap_err();
    match &err {
        ClassPathError::Resolution { message, .. } => assert_eq!(
            message,
            &format!("error while loading dependencies for oat file {}", boot.display())
        ),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.root_cause().is_no_dex_entries());
}

#[test]
fn unsupported_format_is_a_resolution_error() {
    let ws = Workspace::new();
    let path = ws.dir.path().join("readme.txt");
    fs::write(&path, b"text").unwrap();
    let mut resolver = ws.resolver();

    let err = resolver.load_entry(&path, true).unwrap_err();
    assert!(matches!(err, ClassPathError::Resolution { .. }));
    assert!(matches!(err.root_cause(), ClassPathError::UnsupportedFormat { .. }));
}

fn base_config(ws: &Workspace) -> ClassPathConfig {
    ClassPathConfig {
        boot_class_path_dirs: vec![ws.dir.path().to_path_buf()],
        ..Default::default()
    }
}

#[test]
fn device_paths_are_found_by_suffix() {
    let mut ws = Workspace::new();
    ws.add("framework/core.jar", FakeContainer::dex(&["classes.dex"]));
    ws.add("framework/ext.jar", FakeContainer::dex(&["classes.dex"]));
    let app = ws.add("app.apk", FakeContainer::dex(&["classes.dex"]));

    let config = ClassPathConfig {
        boot_class_path: Some(vec![
            "/system/framework/core.jar".to_string(),
            "/system/framework/ext.jar".to_string(),
        ]),
        input: Some(app),
        ..base_config(&ws)
    };
    let resolver = ClassPathResolver::resolve(&config, Box::new(ws.opener.clone())).unwrap();

    assert_eq!(
        provider_names(&resolver),
        vec!["core.jar:classes.dex", "ext.jar:classes.dex", "app.apk:classes.dex"]
    );
}

#[test]
fn unknown_boot_entry_is_reported() {
    let ws = Workspace::new();
    let config = ClassPathConfig {
        boot_class_path: Some(vec!["/system/framework/nowhere.jar".to_string()]),
        ..base_config(&ws)
    };
    let err = ClassPathResolver::resolve(&config, Box::new(ws.opener.clone())).err().unwrap();
    match err.root_cause() {
        ClassPathError::DependencyNotFound { name, .. } => {
            assert_eq!(name, "/system/framework/nowhere.jar")
        }
        other => panic!("unexpected root cause {:?}", other),
    }
}

#[test]
fn jar_without_dex_falls_back_to_odex() {
    let mut ws = Workspace::new();
    ws.add("framework/services.jar", FakeContainer::dex(&[]));
    ws.add("framework/services.odex", FakeContainer::dex(&["services.odex"]));

    let config = ClassPathConfig {
        boot_class_path: Some(vec!["/system/framework/services.jar".to_string()]),
        ..base_config(&ws)
    };
    let resolver = ClassPathResolver::resolve(&config, Box::new(ws.opener.clone())).unwrap();
    assert_eq!(provider_names(&resolver), vec!["services.odex:services.odex"]);
}

#[test]
fn neither_jar_nor_odex_has_dex() {
    let mut ws = Workspace::new();
    ws.add("framework/services.jar", FakeContainer::dex(&[]));
    ws.add("framework/services.odex", FakeContainer::dex(&[]));

    let config = ClassPathConfig {
        boot_class_path: Some(vec!["/system/framework/services.jar".to_string()]),
        ..base_config(&ws)
    };
    let err = ClassPathResolver::resolve(&config, Box::new(ws.opener.clone())).err().unwrap();
    assert_eq!(
        err.to_string(),
        "neither /system/framework/services.jar nor /system/framework/services.odex \
         contain a dex file"
    );
}

#[test]
fn extra_entries_must_exist() {
    let ws = Workspace::new();
    let missing = ws.dir.path().join("lib.jar");
    let config = ClassPathConfig {
        boot_class_path: Some(vec![]),
        extra_class_path: vec![missing.clone()],
        ..base_config(&ws)
    };
    let err = ClassPathResolver::resolve(&config, Box::new(ws.opener.clone())).err().unwrap();
    let expected = format!("classpath entry {} could not be found", missing.display());
    assert_eq!(err.to_string(), expected);
}

#[test]
fn boot_image_input_supplies_the_boot_class_path() {
    let mut ws = Workspace::new();
    ws.add("framework/arm/boot-core.oat", FakeContainer::oat(&["core.dex"], &[]));
    let input = ws.add(
        "framework/arm/boot-framework.oat",
        FakeContainer::oat(
            &["framework.dex"],
            &["/system/framework/arm/boot-core.art", "/system/framework/arm/boot-framework.art"],
        ),
    );

    let config = ClassPathConfig { input: Some(input), ..base_config(&ws) };
    let resolver = ClassPathResolver::resolve(&config, Box::new(ws.opener.clone())).unwrap();

    assert_eq!(
        provider_names(&resolver),
        vec!["boot-core.oat:core.dex", "boot-framework.oat:framework.dex"]
    );
    assert_eq!(resolver.loaded_files().len(), 2);
}
