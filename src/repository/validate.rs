/* Linkage checks: references to members a resolved class does not expose */

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::repository::{ClassRepository, DeclaredClass};
use crate::types::{FieldKey, MethodKey};

/// Field references whose declaring class resolves but does not expose the field.
///
/// References to types the repository cannot resolve are left out; a dangling
/// type is a different problem.
pub fn find_missing_or_inaccessible_fields<R: ClassRepository>(
    repository: &R,
) -> HashSet<FieldKey> {
    let mut seen: HashSet<&FieldKey> = HashSet::new();
    let mut missing = HashSet::new();
    for key in repository.field_references() {
        if !seen.insert(key) {
            continue;
        }
        let Some(class) = repository.resolve_class(&key.defining_class) else {
            continue;
        };
        if !class.has_field(key) {
            debug!("{} is missing or inaccessible", key);
            missing.insert(key.clone());
        }
    }
    missing
}

/// Method references whose declaring class resolves but does not expose the method.
pub fn find_missing_or_inaccessible_methods<R: ClassRepository>(
    repository: &R,
) -> HashSet<MethodKey> {
    let mut seen: HashSet<&MethodKey> = HashSet::new();
    let mut missing = HashSet::new();
    for key in repository.method_references() {
        if !seen.insert(key) {
            continue;
        }
        let Some(class) = repository.resolve_class(&key.defining_class) else {
            continue;
        };
        if !class.has_method(key) {
            debug!("{} is missing or inaccessible", key);
            missing.insert(key.clone());
        }
    }
    missing
}

/// Both checks, sorted for stable output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkageReport {
    pub missing_fields: Vec<FieldKey>,
    pub missing_methods: Vec<MethodKey>,
}

impl LinkageReport {
    pub fn build<R: ClassRepository>(repository: &R) -> LinkageReport {
        let mut missing_fields: Vec<FieldKey> =
            find_missing_or_inaccessible_fields(repository).into_iter().collect();
        let mut missing_methods: Vec<MethodKey> =
            find_missing_or_inaccessible_methods(repository).into_iter().collect();
        missing_fields.sort();
        missing_methods.sort();
        info!(
            "linkage check: {} missing fields, {} missing methods",
            missing_fields.len(),
            missing_methods.len()
        );
        LinkageReport { missing_fields, missing_methods }
    }

    pub fn is_clean(&self) -> bool {
        self.missing_fields.is_empty() && self.missing_methods.is_empty()
    }
}

impl fmt::Display for LinkageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for field in &self.missing_fields {
            writeln!(f, "missing field {}", field)?;
        }
        for method in &self.missing_methods {
            writeln!(f, "missing method {}", method)?;
        }
        Ok(())
    }
}
