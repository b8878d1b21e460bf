//! Message resolution
//!
//! Localized messages are looked up by code with a locale fallback chain
//! (`en_US` → `en` → root) and `{0}`-style argument substitution. A
//! context without its own message source uses a
//! [`DelegatingMessageSource`] that forwards to the parent context.

use crate::error::{ContextError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// =============================================================================
// Locale
// =============================================================================

/// Language plus optional country, e.g. `en_US`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Locale {
    language: String,
    country: Option<String>,
}

impl Locale {
    /// The root locale; matches messages registered without a locale
    pub const ROOT: Locale = Locale {
        language: String::new(),
        country: None,
    };

    pub fn new(language: impl Into<String>, country: Option<&str>) -> Self {
        Self {
            language: language.into().to_ascii_lowercase(),
            country: country
                .filter(|c| !c.is_empty())
                .map(|c| c.to_ascii_uppercase()),
        }
    }

    /// Parse `en`, `en_US` or `en-US`
    pub fn parse(tag: &str) -> Self {
        let tag = tag.trim();
        match tag.split_once(['_', '-']) {
            Some((language, country)) => Self::new(language, Some(country)),
            None => Self::new(tag, None),
        }
    }

    #[inline]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[inline]
    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.language.is_empty() && self.country.is_none()
    }

    /// This locale, then the language alone, then root
    pub fn fallback_chain(&self) -> Vec<Locale> {
        let mut chain = vec![self.clone()];
        if self.country.is_some() {
            chain.push(Locale::new(self.language.clone(), None));
        }
        if !self.is_root() {
            chain.push(Locale::ROOT);
        }
        chain
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.country {
            Some(country) => write!(f, "{}_{}", self.language, country),
            None => f.write_str(&self.language),
        }
    }
}

/// Replace `{0}`, `{1}`, ... with the matching argument.
///
/// Indexes without an argument are left as written.
pub fn format_message(pattern: &str, args: &[&str]) -> String {
    if args.is_empty() {
        return pattern.to_string();
    }
    let mut result = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let substituted = after.find('}').and_then(|close| {
            let index: usize = after[..close].trim().parse().ok()?;
            Some((args.get(index)?, close))
        });
        match substituted {
            Some((arg, close)) => {
                result.push_str(arg);
                rest = &after[close + 1..];
            }
            None => {
                result.push('{');
                rest = after;
            }
        }
    }
    result.push_str(rest);
    result
}

// =============================================================================
// Message Sources
// =============================================================================

/// Resolves message codes to text
pub trait MessageSource: Send + Sync {
    /// The message for `code`, or `None` if neither this source nor its
    /// parents know it
    fn resolve_message(&self, code: &str, args: &[&str], locale: &Locale) -> Option<String>;

    /// The message, else `default` formatted with `args`
    fn get_message(&self, code: &str, args: &[&str], default: Option<&str>, locale: &Locale) -> Option<String> {
        self.resolve_message(code, args, locale)
            .or_else(|| default.map(|d| format_message(d, args)))
    }

    /// The message, else [`ContextError::NoSuchMessage`]
    fn get_message_required(&self, code: &str, args: &[&str], locale: &Locale) -> Result<String> {
        self.resolve_message(code, args, locale)
            .ok_or_else(|| ContextError::NoSuchMessage {
                code: code.to_string(),
                locale: locale.to_string(),
            })
    }

    /// This source as a hierarchical one, if it supports a parent
    fn as_hierarchical(&self) -> Option<&dyn HierarchicalMessageSource> {
        None
    }
}

/// Message source that falls back to a parent
pub trait HierarchicalMessageSource: MessageSource {
    fn set_parent_message_source(&self, parent: Option<Arc<dyn MessageSource>>);

    fn parent_message_source(&self) -> Option<Arc<dyn MessageSource>>;
}

/// Forwards every lookup to its parent; empty without one
#[derive(Default)]
pub struct DelegatingMessageSource {
    parent: RwLock<Option<Arc<dyn MessageSource>>>,
}

impl DelegatingMessageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: Option<Arc<dyn MessageSource>>) -> Self {
        Self {
            parent: RwLock::new(parent),
        }
    }
}

impl MessageSource for DelegatingMessageSource {
    fn resolve_message(&self, code: &str, args: &[&str], locale: &Locale) -> Option<String> {
        let parent = self.parent.read().clone()?;
        parent.resolve_message(code, args, locale)
    }

    fn as_hierarchical(&self) -> Option<&dyn HierarchicalMessageSource> {
        Some(self)
    }
}

impl HierarchicalMessageSource for DelegatingMessageSource {
    fn set_parent_message_source(&self, parent: Option<Arc<dyn MessageSource>>) {
        *self.parent.write() = parent;
    }

    fn parent_message_source(&self) -> Option<Arc<dyn MessageSource>> {
        self.parent.read().clone()
    }
}

impl fmt::Debug for DelegatingMessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatingMessageSource")
            .field("has_parent", &self.parent.read().is_some())
            .finish()
    }
}

/// In-memory messages keyed by code and locale
#[derive(Default)]
pub struct StaticMessageSource {
    messages: RwLock<HashMap<(String, Locale), String>>,
    parent: RwLock<Option<Arc<dyn MessageSource>>>,
    use_code_as_default_message: AtomicBool,
}

impl StaticMessageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&self, code: impl Into<String>, locale: &Locale, message: impl Into<String>) {
        self.messages
            .write()
            .insert((code.into(), locale.clone()), message.into());
    }

    /// Add several messages for one locale
    pub fn add_messages<I, C, M>(&self, locale: &Locale, messages: I)
    where
        I: IntoIterator<Item = (C, M)>,
        C: Into<String>,
        M: Into<String>,
    {
        let mut map = self.messages.write();
        for (code, message) in messages {
            map.insert((code.into(), locale.clone()), message.into());
        }
    }

    /// Return the code itself when nothing else matches
    pub fn set_use_code_as_default_message(&self, use_code: bool) {
        self.use_code_as_default_message.store(use_code, Ordering::Release);
    }

    fn lookup(&self, code: &str, locale: &Locale) -> Option<String> {
        let messages = self.messages.read();
        locale
            .fallback_chain()
            .into_iter()
            .find_map(|candidate| messages.get(&(code.to_string(), candidate)).cloned())
    }
}

impl MessageSource for StaticMessageSource {
    fn resolve_message(&self, code: &str, args: &[&str], locale: &Locale) -> Option<String> {
        if let Some(pattern) = self.lookup(code, locale) {
            return Some(format_message(&pattern, args));
        }
        let parent = self.parent.read().clone();
        parent.and_then(|p| p.resolve_message(code, args, locale))
    }

    fn get_message(&self, code: &str, args: &[&str], default: Option<&str>, locale: &Locale) -> Option<String> {
        self.resolve_message(code, args, locale)
            .or_else(|| default.map(|d| format_message(d, args)))
            .or_else(|| {
                self.use_code_as_default_message
                    .load(Ordering::Acquire)
                    .then(|| code.to_string())
            })
    }

    fn as_hierarchical(&self) -> Option<&dyn HierarchicalMessageSource> {
        Some(self)
    }
}

impl HierarchicalMessageSource for StaticMessageSource {
    fn set_parent_message_source(&self, parent: Option<Arc<dyn MessageSource>>) {
        *self.parent.write() = parent;
    }

    fn parent_message_source(&self) -> Option<Arc<dyn MessageSource>> {
        self.parent.read().clone()
    }
}

impl fmt::Debug for StaticMessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticMessageSource")
            .field("messages", &self.messages.read().len())
            .field("has_parent", &self.parent.read().is_some())
            .finish()
    }
}
