//! # dexlink
//!
//! Build a symbol universe from Android dex containers and check that it links.
//!
//! * [`classpath`] loads APKs, JARs, raw dex, odex and ART boot images into an
//!   ordered list of class providers, following boot image dependencies.
//! * [`repository`] turns those providers into a symbol table and reports field
//!   and method references that a resolved class does not expose.
//! * [`dex::method_body`] edits instruction streams while labels, debug entries
//!   and try boundaries stay anchored through [`dex::location`].
//!
use crate::classpath::{ClassPathConfig, ClassPathError, ClassPathResolver};
use crate::container::FileContainerOpener;
use crate::repository::{DexClassRepository, LinkageReport};
use std::path::{Path, PathBuf};

#[macro_use]
pub mod dex;
pub mod classpath;
pub mod container;
pub mod repository;
pub mod types;

#[cfg(test)]
mod tests;

const CONTAINER_EXTENSIONS: [&str; 6] = ["apk", "jar", "dex", "odex", "oat", "zip"];

/// Recurses a base path returning every file that looks like a dex container, sorted by path
///
/// # Examples
///
/// ```no_run
///  use dexlink::find_dex_containers;
///  use std::path::Path;
///
///  let containers = find_dex_containers(Path::new("system/framework")).unwrap();
///  println!("{:} containers found.", containers.len());
/// ```
pub fn find_dex_containers(dir: &Path) -> Result<Vec<PathBuf>, ClassPathError> {
    let mut results = vec![];

    let entries = dir
        .read_dir()
        .map_err(|e| ClassPathError::Io { path: dir.to_path_buf(), source: e })?;
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if file_type.is_dir() {
            // Directory: recurse sub-directory
            results.extend(find_dex_containers(&path)?);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| CONTAINER_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        {
            results.push(path);
        }
    }

    results.sort();
    Ok(results)
}

/// Resolve the classpath described by `config` from disk and check its linkage.
pub fn check_linkage(config: &ClassPathConfig) -> Result<LinkageReport, ClassPathError> {
    let resolver = ClassPathResolver::resolve(config, Box::new(FileContainerOpener))?;
    let repository =
        DexClassRepository::from_providers(resolver.class_providers()).map_err(|e| {
            ClassPathError::Dex { path: config.input.clone().unwrap_or_default(), source: e }
        })?;
    Ok(LinkageReport::build(&repository))
}
