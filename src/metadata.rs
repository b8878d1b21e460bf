//! Declarative metadata attached to bean definitions
//!
//! Components describe themselves with a small set of named annotations
//! (`component`, `scope`, `lazy`, ...). The reader turns them into
//! definition attributes; conditions and annotation queries read them back.

use std::collections::BTreeMap;

/// Attribute key holding an annotation's primary value
pub const VALUE_ATTRIBUTE: &str = "value";

/// Well-known annotation names
pub mod names {
    pub const COMPONENT: &str = "component";
    pub const SCOPE: &str = "scope";
    pub const LAZY: &str = "lazy";
    pub const PRIMARY: &str = "primary";
    pub const QUALIFIER: &str = "qualifier";
    pub const DEPENDS_ON: &str = "depends_on";
    pub const PROFILE: &str = "profile";
    pub const DESCRIPTION: &str = "description";
    pub const ROLE: &str = "role";
}

/// One named annotation with string attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    name: String,
    attributes: BTreeMap<String, String>,
}

impl Annotation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Annotation with a single `value` attribute
    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name).attribute(VALUE_ATTRIBUTE, value)
    }

    /// Add an attribute
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> Option<&str> {
        self.get(VALUE_ATTRIBUTE)
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

/// Annotations declared on a component type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationMetadata {
    type_name: Option<&'static str>,
    annotations: Vec<Annotation>,
}

impl AnnotationMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata introspected from type `T`
    pub fn for_type<T: ?Sized + 'static>() -> Self {
        Self {
            type_name: Some(std::any::type_name::<T>()),
            annotations: Vec::new(),
        }
    }

    /// Add an annotation
    pub fn with(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn push(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    /// Fully qualified name of the introspected type
    #[inline]
    pub fn type_name(&self) -> Option<&'static str> {
        self.type_name
    }

    #[inline]
    pub fn has_annotation(&self, name: &str) -> bool {
        self.annotations.iter().any(|a| a.name == name)
    }

    /// First annotation with the given name
    pub fn annotation(&self, name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.name == name)
    }

    /// Every annotation with the given name, in declaration order
    pub fn annotations_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Annotation> + 'a {
        self.annotations.iter().filter(move |a| a.name == name)
    }

    /// The `value` attribute of the first annotation with the given name
    pub fn value_of(&self, name: &str) -> Option<&str> {
        self.annotation(name).and_then(Annotation::value)
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }
}
