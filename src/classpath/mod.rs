//! Classpath resolution: turn a set of container files into an ordered list of class providers.
//!
//! Containers are loaded at most once per session, keyed by file identity. ART
//! boot images (`*.oat`) name the other images they were compiled against; those
//! are looked up next to the image and loaded one level deep.

pub mod config;
pub mod error;

use log::{debug, info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::container::{ContainerOpener, DexEntry, FileContainerOpener};
use crate::dex::{DexError, DexFile};

pub use self::config::{default_boot_class_path, ClassPathConfig, Opcodes};
pub use self::error::ClassPathError;

/// One dex image on the classpath, tagged with the container it came from.
#[derive(Debug, Clone)]
pub struct ClassProvider {
    container: PathBuf,
    entry: DexEntry,
}

impl ClassProvider {
    pub fn new(container: impl Into<PathBuf>, entry: DexEntry) -> Self {
        ClassProvider { container: container.into(), entry }
    }

    pub fn container(&self) -> &Path {
        &self.container
    }

    pub fn entry_name(&self) -> &str {
        &self.entry.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.entry.bytes
    }

    pub fn dex_file(&self) -> Result<DexFile, DexError> {
        self.entry
            .parse()
            .map_err(|e| DexError::with_context(e, self.container.display().to_string()))
    }
}

/// Name of the file a boot image dependency is stored in, next to the image.
///
/// Only the last path segment is kept and an `.art` image maps to its `.oat`.
///
/// ```
/// use dexlink::classpath::dependency_file_name;
///
/// assert_eq!(dependency_file_name("/system/framework/boot-core.art"), "boot-core.oat");
/// assert_eq!(dependency_file_name("core-libart.jar"), "core-libart.jar");
/// ```
pub fn dependency_file_name(entry: &str) -> String {
    let leaf = entry.rsplit('/').next().unwrap_or(entry);
    match leaf.strip_suffix(".art") {
        Some(stem) => format!("{}.oat", stem),
        None => leaf.to_string(),
    }
}

fn file_identity(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

pub struct ClassPathResolver {
    opener: Box<dyn ContainerOpener>,
    opcodes: Opcodes,
    loaded_files: HashSet<PathBuf>,
    class_providers: Vec<ClassProvider>,
}

impl ClassPathResolver {
    pub fn new(opcodes: Opcodes) -> Self {
        ClassPathResolver::with_opener(opcodes, Box::new(FileContainerOpener))
    }

    pub fn with_opener(opcodes: Opcodes, opener: Box<dyn ContainerOpener>) -> Self {
        ClassPathResolver {
            opener,
            opcodes,
            loaded_files: HashSet::new(),
            class_providers: Vec::new(),
        }
    }

    /// Run a whole session: boot classpath, then extra entries, then the input file.
    pub fn resolve(
        config: &ClassPathConfig,
        opener: Box<dyn ContainerOpener>,
    ) -> Result<Self, ClassPathError> {
        let mut resolver = ClassPathResolver::with_opener(config.opcodes, opener);

        let mut load_input_dependencies = config.check_oat_dependencies;
        let boot_class_path = match &config.boot_class_path {
            Some(entries) => entries.clone(),
            None => match &config.input {
                Some(input) => {
                    let (entries, from_image) = resolver.input_boot_class_path(input)?;
                    if from_image {
                        // The image's own dependencies are already on the boot classpath
                        load_input_dependencies = false;
                    }
                    entries
                }
                None => default_boot_class_path(config.opcodes.api_level),
            },
        };

        for entry in &boot_class_path {
            resolver.load_boot_class_path_entry(&config.boot_class_path_dirs, entry)?;
        }
        for entry in &config.extra_class_path {
            resolver.load_extra_class_path_entry(entry)?;
        }
        if let Some(input) = &config.input {
            resolver.load_entry(input, load_input_dependencies)?;
        }

        info!(
            "classpath resolved: {} containers, {} dex entries",
            resolver.loaded_files.len(),
            resolver.class_providers.len()
        );
        Ok(resolver)
    }

    /// Load every dex entry of one container.
    ///
    /// A container already loaded in this session is skipped. When
    /// `load_oat_dependencies` is set and the container is a boot image, the
    /// images it depends on are loaded from the same directory, without
    /// following their own dependencies.
    pub fn load_entry(
        &mut self,
        path: &Path,
        load_oat_dependencies: bool,
    ) -> Result<(), ClassPathError> {
        let identity = file_identity(path);
        if self.loaded_files.contains(&identity) {
            debug!("{} already loaded", path.display());
            return Ok(());
        }

        let container = self.opener.open(path, &self.opcodes).map_err(|e| match e {
            e @ ClassPathError::UnsupportedFormat { .. } => {
                ClassPathError::resolution(format!("cannot open {}", path.display()), e)
            }
            e => e,
        })?;

        let entry_names = container.entry_names();
        if entry_names.is_empty() {
            return Err(ClassPathError::NoDexEntries { path: path.to_path_buf() });
        }

        let entries = entry_names
            .iter()
            .map(|name| {
                container.entry(name).ok_or_else(|| {
                    let reason = format!("listed entry {} is missing", name);
                    ClassPathError::dex(path, DexError::new(&reason))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Only a container whose every entry could be read counts as loaded
        self.loaded_files.insert(identity);
        self.class_providers
            .extend(entries.into_iter().map(|entry| ClassProvider::new(path, entry)));
        debug!("loaded {} dex entries from {}", entry_names.len(), path.display());

        if load_oat_dependencies && container.is_boot_image() {
            let dependencies = container.boot_class_path();
            let directory = path.parent().unwrap_or_else(|| Path::new(""));
            self.load_oat_dependencies(directory, &dependencies).map_err(|e| {
                let context = if e.is_no_dex_entries() {
                    format!("error while loading dependencies for oat file {}", path.display())
                } else {
                    format!("error while loading oat file {}", path.display())
                };
                ClassPathError::resolution(context, e)
            })?;
        }
        Ok(())
    }

    fn load_oat_dependencies(
        &mut self,
        directory: &Path,
        dependencies: &[String],
    ) -> Result<(), ClassPathError> {
        for dependency in dependencies {
            let name = dependency_file_name(dependency);
            let file = directory.join(&name);
            if !file.exists() {
                return Err(ClassPathError::DependencyNotFound {
                    name,
                    location: directory.display().to_string(),
                });
            }
            self.load_entry(&file, false)?;
        }
        Ok(())
    }

    /// The boot classpath implied by the input file, and whether it came from a boot image.
    fn input_boot_class_path(&self, input: &Path) -> Result<(Vec<String>, bool), ClassPathError> {
        let container = match self.opener.open(input, &self.opcodes) {
            Ok(container) => container,
            Err(e) => {
                warn!("cannot inspect {} for a boot classpath: {}", input.display(), e);
                return Ok((default_boot_class_path(self.opcodes.api_level), false));
            }
        };
        if !container.is_boot_image() {
            return Ok((default_boot_class_path(self.opcodes.api_level), false));
        }
        let entries = container.boot_class_path();
        if entries.is_empty() {
            return Ok((vec!["boot.oat".to_string()], true));
        }
        let entries = entries
            .into_iter()
            .map(|entry| match entry.strip_suffix(".art") {
                Some(stem) => format!("{}.oat", stem),
                None => entry,
            })
            .collect();
        Ok((entries, true))
    }

    fn load_boot_class_path_entry(
        &mut self,
        dirs: &[PathBuf],
        entry: &str,
    ) -> Result<(), ClassPathError> {
        let error = match self.load_local_or_device_entry(dirs, entry) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        let Some(stem) = entry.strip_suffix(".jar").filter(|_| error.is_no_dex_entries()) else {
            return Err(ClassPathError::resolution(
                format!("error while loading boot classpath entry {}", entry),
                error,
            ));
        };

        let odex = format!("{}.odex", stem);
        debug!("{} has no dex, trying {}", entry, odex);
        self.load_local_or_device_entry(dirs, &odex).map_err(|e| {
            if e.is_no_dex_entries() {
                let message = format!("neither {} nor {} contain a dex file", entry, odex);
                ClassPathError::resolution(message, e)
            } else {
                let message = format!("error while loading boot classpath entry {}", odex);
                ClassPathError::resolution(message, e)
            }
        })
    }

    /// Load `entry` as a local file, or find it under one of `dirs` by progressively
    /// shorter suffixes of its device path.
    fn load_local_or_device_entry(
        &mut self,
        dirs: &[PathBuf],
        entry: &str,
    ) -> Result<(), ClassPathError> {
        let local = Path::new(entry);
        if local.is_file() {
            return self.load_entry(local, true);
        }

        let components: Vec<&str> = entry.split(['/', '\\']).filter(|c| !c.is_empty()).collect();
        for dir in dirs.iter().filter(|d| d.is_dir()) {
            for start in 0..components.len() {
                let candidate = components[start..].iter().fold(dir.clone(), |p, c| p.join(c));
                if candidate.is_file() {
                    debug!("found {} at {}", entry, candidate.display());
                    return self.load_entry(&candidate, true);
                }
            }
        }

        let searched: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
        Err(ClassPathError::DependencyNotFound {
            name: entry.to_string(),
            location: searched.join(":"),
        })
    }

    fn load_extra_class_path_entry(&mut self, entry: &Path) -> Result<(), ClassPathError> {
        if !entry.is_file() {
            return Err(ClassPathError::resolution_msg(format!(
                "classpath entry {} could not be found",
                entry.display()
            )));
        }
        self.load_entry(entry, true).map_err(|e| match e {
            e @ ClassPathError::NoDexEntries { .. } => ClassPathError::resolution(
                format!("classpath entry {} does not contain a dex file", entry.display()),
                e,
            ),
            e => e,
        })
    }

    pub fn class_providers(&self) -> &[ClassProvider] {
        &self.class_providers
    }

    pub fn into_class_providers(self) -> Vec<ClassProvider> {
        self.class_providers
    }

    pub fn opcodes(&self) -> &Opcodes {
        &self.opcodes
    }

    pub fn loaded_files(&self) -> &HashSet<PathBuf> {
        &self.loaded_files
    }
}
