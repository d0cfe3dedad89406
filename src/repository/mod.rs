//! Symbol tables over a resolved classpath.
//!
//! [`ClassRepository`] is what the linkage checks in [`validate`] consume: the
//! field and method references found in the loaded dex images, and a way to
//! resolve a type descriptor to the class that defines it.

pub mod validate;

use log::debug;
use std::collections::{HashMap, HashSet};

use crate::classpath::ClassProvider;
use crate::dex::dex_file::ClassDefItem;
use crate::dex::{DexError, DexFile};
use crate::types::{AccessFlags, FieldKey, MethodKey};

pub use self::validate::{
    find_missing_or_inaccessible_fields, find_missing_or_inaccessible_methods, LinkageReport,
};

/// A class as seen by reference checks.
pub trait DeclaredClass {
    fn descriptor(&self) -> &str;

    /// True if a reference to `key`, made through this class, reaches an accessible field.
    fn has_field(&self, key: &FieldKey) -> bool;

    /// True if a reference to `key`, made through this class, reaches an accessible method.
    fn has_method(&self, key: &MethodKey) -> bool;
}

pub trait ClassRepository {
    type Class<'a>: DeclaredClass
    where
        Self: 'a;

    fn field_references(&self) -> Box<dyn Iterator<Item = &FieldKey> + '_>;

    fn method_references(&self) -> Box<dyn Iterator<Item = &MethodKey> + '_>;

    fn resolve_class(&self, descriptor: &str) -> Option<Self::Class<'_>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub descriptor: String,
    pub access_flags: AccessFlags,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<(FieldKey, AccessFlags)>,
    pub methods: Vec<(MethodKey, AccessFlags)>,
}

impl ClassDef {
    pub fn new(descriptor: impl Into<String>) -> Self {
        ClassDef {
            descriptor: descriptor.into(),
            access_flags: AccessFlags::PUBLIC,
            superclass: None,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
        }
    }

    pub fn with_superclass(mut self, descriptor: impl Into<String>) -> Self {
        self.superclass = Some(descriptor.into());
        self
    }

    pub fn with_interface(mut self, descriptor: impl Into<String>) -> Self {
        self.interfaces.push(descriptor.into());
        self
    }

    pub fn with_field(mut self, name: &str, field_type: &str, access_flags: AccessFlags) -> Self {
        let key = FieldKey::new(self.descriptor.as_str(), name, field_type);
        self.fields.push((key, access_flags));
        self
    }

    pub fn with_method(mut self, name: &str, prototype: &str, access_flags: AccessFlags) -> Self {
        let key = MethodKey::new(self.descriptor.as_str(), name, prototype);
        self.methods.push((key, access_flags));
        self
    }

    pub fn field_flags(&self, key: &FieldKey) -> Option<AccessFlags> {
        self.fields.iter().find(|(f, _)| f.same_member(key)).map(|(_, flags)| *flags)
    }

    pub fn method_flags(&self, key: &MethodKey) -> Option<AccessFlags> {
        self.methods.iter().find(|(m, _)| m.same_member(key)).map(|(_, flags)| *flags)
    }

    fn read(dex: &DexFile, class_def: &ClassDefItem) -> Result<ClassDef, DexError> {
        let mut class = ClassDef::new(dex.type_descriptor(class_def.class_idx)?);
        class.access_flags = class_def.access_flags;
        class.superclass = class_def
            .superclass_idx
            .map(|t| dex.type_descriptor(t))
            .transpose()?
            .map(str::to_string);
        for t in &class_def.interfaces.0 {
            class.interfaces.push(dex.type_descriptor(*t)?.to_string());
        }
        if let Some(data) = &class_def.class_data {
            for field in data.fields() {
                class.fields.push((dex.field_key(field.field_idx)?, field.access_flags));
            }
            for method in data.methods() {
                class.methods.push((dex.method_key(method.method_idx)?, method.access_flags));
            }
        }
        Ok(class)
    }
}

/// Classes and references gathered from any number of dex images.
///
/// Classes keep their first definition: a later image defining the same type is
/// shadowed, as the runtime does along a classpath.
#[derive(Debug, Default)]
pub struct DexClassRepository {
    classes: HashMap<String, ClassDef>,
    field_references: Vec<FieldKey>,
    method_references: Vec<MethodKey>,
}

impl DexClassRepository {
    pub fn new() -> Self {
        DexClassRepository::default()
    }

    pub fn from_providers(providers: &[ClassProvider]) -> Result<Self, DexError> {
        let mut repository = DexClassRepository::new();
        for provider in providers {
            let dex = provider.dex_file()?;
            repository.add_dex_file(&dex).map_err(|e| {
                let container = provider.container().display();
                let context = format!("{} in {}", provider.entry_name(), container);
                DexError::with_context(e, context)
            })?;
        }
        debug!(
            "repository holds {} classes, {} field refs, {} method refs",
            repository.classes.len(),
            repository.field_references.len(),
            repository.method_references.len()
        );
        Ok(repository)
    }

    pub fn add_dex_file(&mut self, dex: &DexFile) -> Result<(), DexError> {
        for id in 0..dex.fields.len() {
            self.field_references.push(dex.field_key(id)?);
        }
        for id in 0..dex.methods.len() {
            self.method_references.push(dex.method_key(id)?);
        }
        for (i, class_def) in dex.class_defs.iter().enumerate() {
            let class =
                ClassDef::read(dex, class_def).map_err(|e| err!(e, "class_def_item #{}", i))?;
            self.add_class(class);
        }
        Ok(())
    }

    /// Add a class unless its type is already defined. Returns whether it was added.
    pub fn add_class(&mut self, class: ClassDef) -> bool {
        if self.classes.contains_key(&class.descriptor) {
            debug!("{} is already defined, ignoring later definition", class.descriptor);
            return false;
        }
        self.classes.insert(class.descriptor.clone(), class);
        true
    }

    pub fn add_field_reference(&mut self, key: FieldKey) {
        self.field_references.push(key);
    }

    pub fn add_method_reference(&mut self, key: MethodKey) {
        self.method_references.push(key);
    }

    pub fn class(&self, descriptor: &str) -> Option<&ClassDef> {
        self.classes.get(descriptor)
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Direct supertypes of `class` that are defined here, superclass first.
    fn supertypes<'a>(&'a self, class: &'a ClassDef) -> impl Iterator<Item = &'a ClassDef> + 'a {
        class
            .superclass
            .iter()
            .chain(class.interfaces.iter())
            .filter_map(move |t| self.classes.get(t))
    }

    /// Field resolution order: the class, its superinterfaces, then its superclass.
    fn find_field<'a>(
        &'a self,
        class: &'a ClassDef,
        key: &FieldKey,
        visited: &mut HashSet<&'a str>,
    ) -> Option<AccessFlags> {
        if !visited.insert(class.descriptor.as_str()) {
            return None;
        }
        if let Some(flags) = class.field_flags(key) {
            return Some(flags);
        }
        for iface in class.interfaces.iter().filter_map(|t| self.classes.get(t)) {
            if let Some(flags) = self.find_field(iface, key, visited) {
                return Some(flags);
            }
        }
        let superclass = class.superclass.as_ref().and_then(|t| self.classes.get(t))?;
        self.find_field(superclass, key, visited)
    }

    /// Method resolution order: the superclass chain, then every interface reachable from it.
    fn find_method(&self, class: &ClassDef, key: &MethodKey) -> Option<AccessFlags> {
        let mut chain = vec![class];
        let mut current = class;
        while let Some(superclass) = current.superclass.as_ref().and_then(|t| self.classes.get(t)) {
            if chain.iter().any(|c| c.descriptor == superclass.descriptor) {
                break;
            }
            chain.push(superclass);
            current = superclass;
        }
        if let Some(flags) = chain.iter().find_map(|c| c.method_flags(key)) {
            return Some(flags);
        }

        let mut visited: HashSet<&str> = chain.iter().map(|c| c.descriptor.as_str()).collect();
        let mut pending: Vec<&ClassDef> = chain
            .iter()
            .flat_map(|c| c.interfaces.iter())
            .filter_map(|t| self.classes.get(t))
            .collect();
        while let Some(iface) = pending.pop() {
            if !visited.insert(iface.descriptor.as_str()) {
                continue;
            }
            if let Some(flags) = iface.method_flags(key) {
                return Some(flags);
            }
            pending.extend(self.supertypes(iface));
        }
        None
    }
}

fn is_accessible_inherited(flags: AccessFlags) -> bool {
    !flags.contains(AccessFlags::PRIVATE)
}

/// A class of a [`DexClassRepository`], able to look through its supertypes.
#[derive(Debug, Clone, Copy)]
pub struct DexClass<'a> {
    repository: &'a DexClassRepository,
    class: &'a ClassDef,
}

impl<'a> DexClass<'a> {
    pub fn definition(&self) -> &'a ClassDef {
        self.class
    }
}

impl DeclaredClass for DexClass<'_> {
    fn descriptor(&self) -> &str {
        &self.class.descriptor
    }

    fn has_field(&self, key: &FieldKey) -> bool {
        if self.class.field_flags(key).is_some() {
            return true;
        }
        let mut visited = HashSet::new();
        visited.insert(self.class.descriptor.as_str());
        self.repository
            .supertypes(self.class)
            .find_map(|ancestor| self.repository.find_field(ancestor, key, &mut visited))
            .is_some_and(is_accessible_inherited)
    }

    fn has_method(&self, key: &MethodKey) -> bool {
        if self.class.method_flags(key).is_some() {
            return true;
        }
        // Constructors and static initializers are never inherited
        if key.name.starts_with('<') {
            return false;
        }
        self.repository
            .supertypes(self.class)
            .find_map(|ancestor| self.repository.find_method(ancestor, key))
            .is_some_and(is_accessible_inherited)
    }
}

impl ClassRepository for DexClassRepository {
    type Class<'a> = DexClass<'a>;

    fn field_references(&self) -> Box<dyn Iterator<Item = &FieldKey> + '_> {
        Box::new(self.field_references.iter())
    }

    fn method_references(&self) -> Box<dyn Iterator<Item = &MethodKey> + '_> {
        Box::new(self.method_references.iter())
    }

    fn resolve_class(&self, descriptor: &str) -> Option<DexClass<'_>> {
        self.classes.get(descriptor).map(|class| DexClass { repository: self, class })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::ClassProvider;
    use crate::container::DexEntry;
    use crate::tests::fixtures::{DexFixture, FixtureClass};

    fn repository(classes: Vec<ClassDef>) -> DexClassRepository {
        let mut repo = DexClassRepository::new();
        for class in classes {
            repo.add_class(class);
        }
        repo
    }

    #[test]
    fn declared_members_are_found() {
        let repo = repository(vec![ClassDef::new("LFoo;")
            .with_field("secret", "I", AccessFlags::PRIVATE)
            .with_method("run", "()V", AccessFlags::PUBLIC)]);
        let foo = repo.resolve_class("LFoo;").unwrap();
        assert!(foo.has_field(&FieldKey::new("LFoo;", "secret", "I")));
        assert!(!foo.has_field(&FieldKey::new("LFoo;", "secret", "J")));
        assert!(foo.has_method(&MethodKey::new("LFoo;", "run", "()V")));
        assert!(!foo.has_method(&MethodKey::new("LFoo;", "run", "(I)V")));
        assert!(repo.resolve_class("LBar;").is_none());
    }

    #[test]
    fn inherited_members_follow_supertypes() {
        let repo = repository(vec![
            ClassDef::new("LBase;")
                .with_interface("LConstants;")
                .with_field("count", "I", AccessFlags::PROTECTED)
                .with_field("hidden", "I", AccessFlags::PRIVATE)
                .with_method("run", "()V", AccessFlags::PUBLIC)
                .with_method("helper", "()V", AccessFlags::PRIVATE)
                .with_method("<init>", "()V", AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR),
            ClassDef::new("LConstants;")
                .with_field("MAX", "I", AccessFlags::PUBLIC | AccessFlags::STATIC)
                .with_interface("LRunner;"),
            ClassDef::new("LRunner;")
                .with_method("go", "()V", AccessFlags::PUBLIC | AccessFlags::ABSTRACT),
            ClassDef::new("LChild;").with_superclass("LBase;"),
        ]);
        let child = repo.resolve_class("LChild;").unwrap();
        assert!(child.has_field(&FieldKey::new("LChild;", "count", "I")));
        assert!(child.has_field(&FieldKey::new("LChild;", "MAX", "I")));
        assert!(!child.has_field(&FieldKey::new("LChild;", "hidden", "I")));
        assert!(child.has_method(&MethodKey::new("LChild;", "run", "()V")));
        assert!(child.has_method(&MethodKey::new("LChild;", "go", "()V")));
        assert!(!child.has_method(&MethodKey::new("LChild;", "helper", "()V")));
        assert!(!child.has_method(&MethodKey::new("LChild;", "<init>", "()V")));
    }

    #[test]
    fn cyclic_hierarchy_terminates() {
        let repo = repository(vec![
            ClassDef::new("LA;").with_superclass("LB;").with_interface("LB;"),
            ClassDef::new("LB;").with_superclass("LA;").with_interface("LA;"),
        ]);
        let a = repo.resolve_class("LA;").unwrap();
        assert!(!a.has_field(&FieldKey::new("LA;", "x", "I")));
        assert!(!a.has_method(&MethodKey::new("LA;", "m", "()V")));
    }

    #[test]
    fn first_definition_wins() {
        let mut repo = DexClassRepository::new();
        assert!(repo.add_class(ClassDef::new("LFoo;").with_field("a", "I", AccessFlags::PUBLIC)));
        assert!(!repo.add_class(ClassDef::new("LFoo;").with_field("b", "I", AccessFlags::PUBLIC)));
        let foo = repo.resolve_class("LFoo;").unwrap();
        assert!(foo.has_field(&FieldKey::new("LFoo;", "a", "I")));
        assert!(!foo.has_field(&FieldKey::new("LFoo;", "b", "I")));
        assert_eq!(repo.class_count(), 1);
    }

    #[test]
    fn builds_from_class_providers() {
        let mut fixture = DexFixture::new();
        fixture.add_class(
            FixtureClass::new("LFoo;")
                .superclass("Ljava/lang/Object;")
                .interface("Ljava/lang/Runnable;")
                .field("count", "I", AccessFlags::PUBLIC)
                .method("run", &[], "V", AccessFlags::PUBLIC),
        );
        fixture.add_class(
            FixtureClass::new("LRunner;")
                .access(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
                .method("go", &[], "V", AccessFlags::PUBLIC | AccessFlags::ABSTRACT),
        );
        fixture.reference_method("LBar;", "go", &["I"], "Z");
        let provider = ClassProvider::new("app.apk", DexEntry::new("classes.dex", fixture.build()));

        let repo = DexClassRepository::from_providers(&[provider]).unwrap();
        let foo = repo.class("LFoo;").unwrap();
        assert_eq!(foo.superclass.as_deref(), Some("Ljava/lang/Object;"));
        assert_eq!(foo.interfaces, vec!["Ljava/lang/Runnable;".to_string()]);
        assert_eq!(foo.fields, vec![(FieldKey::new("LFoo;", "count", "I"), AccessFlags::PUBLIC)]);
        let runner = repo.class("LRunner;").unwrap();
        assert!(runner.access_flags.contains(AccessFlags::INTERFACE));
        assert!(runner.superclass.is_none());

        let methods: Vec<&MethodKey> = repo.method_references().collect();
        assert!(methods.contains(&&MethodKey::new("LBar;", "go", "(I)Z")));
        assert!(methods.contains(&&MethodKey::new("LFoo;", "run", "()V")));
        assert_eq!(repo.field_references().count(), 1);
    }

    #[test]
    fn unreadable_provider_is_an_error() {
        let entry = DexEntry::new("classes.dex", b"dex\n035\0".to_vec());
        let provider = ClassProvider::new("app.apk", entry);
        let err = DexClassRepository::from_providers(&[provider]).unwrap_err();
        assert!(err.to_string().contains("app.apk"));
    }
}
