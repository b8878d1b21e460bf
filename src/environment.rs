//! Property sources, placeholder resolution and profiles
//!
//! An [`Environment`] holds an ordered list of [`PropertySource`]s; the
//! first source containing a key wins. Values may reference other
//! properties with `${key}` or `${key:default}`.

use crate::conversion::{ConversionService, DefaultConversionService};
use crate::error::{ContextError, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Name of the process facts source
pub const SYSTEM_PROPERTIES_SOURCE: &str = "systemProperties";
/// Name of the environment variables source
pub const SYSTEM_ENVIRONMENT_SOURCE: &str = "systemEnvironment";
/// Comma-separated active profiles
pub const ACTIVE_PROFILES_PROPERTY: &str = "profiles.active";
/// Comma-separated default profiles
pub const DEFAULT_PROFILES_PROPERTY: &str = "profiles.default";
/// Profile that is active when nothing else is
pub const DEFAULT_PROFILE: &str = "default";

const PLACEHOLDER_PREFIX: &str = "${";
const PLACEHOLDER_SUFFIX: char = '}';
const VALUE_SEPARATOR: char = ':';

// =============================================================================
// Property Sources
// =============================================================================

/// A named set of key/value properties
pub trait PropertySource: Send + Sync {
    fn name(&self) -> &str;

    fn get_property(&self, key: &str) -> Option<String>;

    fn contains_property(&self, key: &str) -> bool {
        self.get_property(key).is_some()
    }

    /// Every key, in a stable order
    fn property_names(&self) -> Vec<String>;
}

/// Property source backed by an in-memory map
#[derive(Debug, Clone, Default)]
pub struct MapPropertySource {
    name: String,
    properties: BTreeMap<String, String>,
}

impl MapPropertySource {
    pub fn new<K, V>(name: impl Into<String>, properties: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse TOML and flatten nested tables into dotted keys.
    ///
    /// Arrays become `key[0]`, `key[1]`, ... and, when all items are
    /// scalars, also a comma-joined `key`.
    pub fn from_toml_str(name: impl Into<String>, content: &str) -> Result<Self> {
        let name = name.into();
        let table: toml::Table = toml::from_str(content).map_err(|e| ContextError::Resource {
            location: name.clone(),
            reason: e.to_string(),
        })?;
        let mut properties = BTreeMap::new();
        flatten_table("", &table, &mut properties);
        Ok(Self { name, properties })
    }

    /// Read and flatten a TOML file; the source is named after the path
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let location = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| ContextError::Resource {
            location: location.clone(),
            reason: e.to_string(),
        })?;

        #[cfg(feature = "logging")]
        debug!(target: "application_context", path = %location, "Loading TOML property source");

        Self::from_toml_str(location, &content)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

fn flatten_table(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        flatten_value(key, value, out);
    }
}

fn flatten_value(key: String, value: &toml::Value, out: &mut BTreeMap<String, String>) {
    match value {
        toml::Value::Table(table) => flatten_table(&key, table, out),
        toml::Value::Array(items) => {
            let mut scalars = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                if let Some(scalar) = scalar_to_string(item) {
                    scalars.push(scalar);
                }
                flatten_value(format!("{key}[{i}]"), item, out);
            }
            if scalars.len() == items.len() {
                out.insert(key, scalars.join(","));
            }
        }
        scalar => {
            if let Some(s) = scalar_to_string(scalar) {
                out.insert(key, s);
            }
        }
    }
}

fn scalar_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

impl PropertySource for MapPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_property(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned()
    }

    fn property_names(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }
}

/// Snapshot of the process environment variables.
///
/// Lookups are relaxed: `server.port` also matches `server_port`,
/// `SERVER_PORT` and `SERVER-PORT`.
#[derive(Debug, Clone)]
pub struct SystemEnvironment {
    vars: HashMap<String, String>,
}

impl SystemEnvironment {
    /// Capture the current process environment
    pub fn capture() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    fn resolve_key(&self, key: &str) -> Option<&String> {
        if let Some(value) = self.vars.get(key) {
            return Some(value);
        }
        let underscored = key.replace(['.', '-'], "_");
        let candidates = [
            underscored.clone(),
            key.replace('.', "-"),
            underscored.to_ascii_uppercase(),
            key.to_ascii_uppercase().replace('.', "-"),
        ];
        candidates.iter().find_map(|candidate| self.vars.get(candidate))
    }
}

impl PropertySource for SystemEnvironment {
    fn name(&self) -> &str {
        SYSTEM_ENVIRONMENT_SOURCE
    }

    fn get_property(&self, key: &str) -> Option<String> {
        self.resolve_key(key).cloned()
    }

    fn property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vars.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Facts about the running process: OS, architecture, working directory
#[derive(Debug, Clone)]
pub struct SystemProperties {
    properties: BTreeMap<String, String>,
}

impl SystemProperties {
    pub fn capture() -> Self {
        let mut properties = BTreeMap::new();
        properties.insert("os.name".to_string(), std::env::consts::OS.to_string());
        properties.insert("os.arch".to_string(), std::env::consts::ARCH.to_string());
        properties.insert("os.family".to_string(), std::env::consts::FAMILY.to_string());
        properties.insert("process.id".to_string(), std::process::id().to_string());
        properties.insert(
            "available.processors".to_string(),
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .to_string(),
        );
        if let Ok(dir) = std::env::current_dir() {
            properties.insert("user.dir".to_string(), dir.display().to_string());
        }
        if let Ok(exe) = std::env::current_exe() {
            properties.insert("process.exe".to_string(), exe.display().to_string());
        }
        if let Ok(dir) = std::env::temp_dir().into_os_string().into_string() {
            properties.insert("tmp.dir".to_string(), dir);
        }
        Self { properties }
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl PropertySource for SystemProperties {
    fn name(&self) -> &str {
        SYSTEM_PROPERTIES_SOURCE
    }

    fn get_property(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned()
    }

    fn property_names(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Ordered property sources plus profile state
pub struct Environment {
    sources: RwLock<Vec<Arc<dyn PropertySource>>>,
    active_profiles: RwLock<Option<Vec<String>>>,
    default_profiles: RwLock<Vec<String>>,
    required: RwLock<Vec<String>>,
    ignore_unresolvable_nested: AtomicBool,
    conversion_service: RwLock<Arc<dyn ConversionService>>,
}

impl Environment {
    /// Environment with the system properties and environment variables
    pub fn new() -> Self {
        let env = Self::empty();
        env.add_last(Arc::new(SystemProperties::capture()));
        env.add_last(Arc::new(SystemEnvironment::capture()));
        env
    }

    /// Environment without any property source
    pub fn empty() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            active_profiles: RwLock::new(None),
            default_profiles: RwLock::new(vec![DEFAULT_PROFILE.to_string()]),
            required: RwLock::new(Vec::new()),
            ignore_unresolvable_nested: AtomicBool::new(false),
            conversion_service: RwLock::new(DefaultConversionService::shared()),
        }
    }

    // ===== Property sources =====

    /// Add a source with the highest precedence, replacing one of the same name
    pub fn add_first(&self, source: Arc<dyn PropertySource>) {
        let mut sources = self.sources.write();
        sources.retain(|s| s.name() != source.name());
        sources.insert(0, source);
    }

    /// Add a source with the lowest precedence, replacing one of the same name
    pub fn add_last(&self, source: Arc<dyn PropertySource>) {
        let mut sources = self.sources.write();
        sources.retain(|s| s.name() != source.name());
        sources.push(source);
    }

    /// Insert `source` right before the source named `relative`
    pub fn add_before(&self, relative: &str, source: Arc<dyn PropertySource>) -> Result<()> {
        let mut sources = self.sources.write();
        sources.retain(|s| s.name() != source.name());
        let index = sources
            .iter()
            .position(|s| s.name() == relative)
            .ok_or_else(|| ContextError::illegal_state(format!("PropertySource named '{relative}' does not exist")))?;
        sources.insert(index, source);
        Ok(())
    }

    pub fn remove_property_source(&self, name: &str) -> Option<Arc<dyn PropertySource>> {
        let mut sources = self.sources.write();
        let index = sources.iter().position(|s| s.name() == name)?;
        Some(sources.remove(index))
    }

    pub fn property_source(&self, name: &str) -> Option<Arc<dyn PropertySource>> {
        self.sources.read().iter().find(|s| s.name() == name).cloned()
    }

    /// Source names in precedence order
    pub fn property_source_names(&self) -> Vec<String> {
        self.sources.read().iter().map(|s| s.name().to_string()).collect()
    }

    // ===== Properties =====

    fn raw_property(&self, key: &str) -> Option<String> {
        let sources = self.sources.read().clone();
        for source in sources {
            if let Some(value) = source.get_property(key) {
                #[cfg(feature = "logging")]
                trace!(
                    target: "application_context",
                    key,
                    source = source.name(),
                    "Found property"
                );
                return Some(value);
            }
        }
        None
    }

    pub fn contains_property(&self, key: &str) -> bool {
        self.sources.read().iter().any(|s| s.contains_property(key))
    }

    /// Property value with nested placeholders resolved.
    ///
    /// A value whose placeholders cannot be resolved comes back raw; with
    /// [`Environment::set_ignore_unresolvable_nested_placeholders`] only the
    /// unresolvable placeholders stay as written.
    pub fn get_property(&self, key: &str) -> Option<String> {
        let raw = self.raw_property(key)?;
        let strict = !self.ignore_unresolvable_nested.load(Ordering::Acquire);
        let mut visiting = vec![key.to_string()];
        match self.resolve(&raw, strict, &mut visiting) {
            Ok(resolved) => Some(resolved),
            Err(_) => Some(raw),
        }
    }

    pub fn get_property_or(&self, key: &str, default: &str) -> String {
        self.get_property(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_required_property(&self, key: &str) -> Result<String> {
        self.get_property(key)
            .ok_or_else(|| ContextError::MissingRequiredProperty {
                keys: vec![key.to_string()],
            })
    }

    /// Property converted with the environment's conversion service
    pub fn get_property_as<T: Send + Sync + 'static>(&self, key: &str) -> Result<Option<T>> {
        match self.get_property(key) {
            Some(value) => {
                let service = self.conversion_service.read().clone();
                service.convert_to::<T>(&value).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn set_conversion_service(&self, service: Arc<dyn ConversionService>) {
        *self.conversion_service.write() = service;
    }

    pub fn set_ignore_unresolvable_nested_placeholders(&self, ignore: bool) {
        self.ignore_unresolvable_nested.store(ignore, Ordering::Release);
    }

    /// Keys that [`Environment::validate_required_properties`] checks
    pub fn set_required_properties<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut required = self.required.write();
        for key in keys {
            let key = key.into();
            if !required.contains(&key) {
                required.push(key);
            }
        }
    }

    /// Fail with every required key that has no value
    pub fn validate_required_properties(&self) -> Result<()> {
        let required = self.required.read().clone();
        let missing: Vec<String> = required
            .into_iter()
            .filter(|key| self.get_property(key).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ContextError::MissingRequiredProperty { keys: missing })
        }
    }

    // ===== Placeholders =====

    /// Resolve `${...}` placeholders, leaving unresolvable ones as written
    pub fn resolve_placeholders(&self, text: &str) -> Result<String> {
        self.resolve(text, false, &mut Vec::new())
    }

    /// Resolve `${...}` placeholders, failing on any unresolvable one
    pub fn resolve_required_placeholders(&self, text: &str) -> Result<String> {
        self.resolve(text, true, &mut Vec::new())
    }

    fn resolve(&self, text: &str, strict: bool, visiting: &mut Vec<String>) -> Result<String> {
        let mut result = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find(PLACEHOLDER_PREFIX) {
            result.push_str(&rest[..start]);
            let after = &rest[start + PLACEHOLDER_PREFIX.len()..];
            let Some(end) = find_placeholder_end(after) else {
                // No closing brace: the remainder is literal text
                result.push_str(&rest[start..]);
                return Ok(result);
            };

            let placeholder = &after[..end];
            let whole = &rest[start..start + PLACEHOLDER_PREFIX.len() + end + 1];
            let placeholder = self.resolve(placeholder, strict, visiting)?;
            let (key, default) = match placeholder.split_once(VALUE_SEPARATOR) {
                Some((key, default)) => (key.to_string(), Some(default.to_string())),
                None => (placeholder.clone(), None),
            };

            if visiting.contains(&key) {
                return Err(ContextError::illegal_state(format!(
                    "Circular placeholder reference '{key}' in property definitions"
                )));
            }

            let value = self.raw_property(&key).or(default);
            match value {
                Some(value) => {
                    visiting.push(key);
                    let resolved = self.resolve(&value, strict, visiting);
                    visiting.pop();
                    result.push_str(&resolved?);
                }
                None if strict => {
                    return Err(ContextError::UnresolvablePlaceholder {
                        placeholder: key,
                        value: text.to_string(),
                    });
                }
                None => result.push_str(whole),
            }
            rest = &rest[start + PLACEHOLDER_PREFIX.len() + end + 1..];
        }

        result.push_str(rest);
        Ok(result)
    }

    // ===== Profiles =====

    /// Explicitly set profiles, else those named by `profiles.active`
    pub fn active_profiles(&self) -> Vec<String> {
        if let Some(profiles) = self.active_profiles.read().as_ref() {
            return profiles.clone();
        }
        self.get_property(ACTIVE_PROFILES_PROPERTY)
            .map(|value| split_profiles(&value))
            .unwrap_or_default()
    }

    pub fn set_active_profiles<I, S>(&self, profiles: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let profiles: Vec<String> = profiles.into_iter().map(Into::into).collect();

        #[cfg(feature = "logging")]
        debug!(target: "application_context", ?profiles, "Activating profiles");

        *self.active_profiles.write() = Some(profiles);
    }

    pub fn add_active_profile(&self, profile: impl Into<String>) {
        let profile = profile.into();
        let mut current = self.active_profiles();
        if !current.contains(&profile) {
            current.push(profile);
        }
        *self.active_profiles.write() = Some(current);
    }

    /// Profiles active when no profile is explicitly active
    pub fn default_profiles(&self) -> Vec<String> {
        if let Some(value) = self.get_property(DEFAULT_PROFILES_PROPERTY) {
            return split_profiles(&value);
        }
        self.default_profiles.read().clone()
    }

    pub fn set_default_profiles<I, S>(&self, profiles: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.default_profiles.write() = profiles.into_iter().map(Into::into).collect();
    }

    fn is_profile_active(&self, profile: &str) -> bool {
        let active = self.active_profiles();
        if active.is_empty() {
            self.default_profiles().iter().any(|p| p == profile)
        } else {
            active.iter().any(|p| p == profile)
        }
    }

    /// True if any expression matches; `!name` matches when `name` is inactive
    pub fn accepts_profiles(&self, profiles: &[&str]) -> bool {
        profiles.iter().any(|expression| {
            let expression = expression.trim();
            match expression.strip_prefix('!') {
                Some(negated) => !negated.is_empty() && !self.is_profile_active(negated),
                None => !expression.is_empty() && self.is_profile_active(expression),
            }
        })
    }

    /// Append the parent's sources (unless present by name) and profiles
    pub fn merge(&self, parent: &Environment) {
        let parent_sources = parent.sources.read().clone();
        {
            let mut sources = self.sources.write();
            for source in parent_sources {
                if !sources.iter().any(|s| s.name() == source.name()) {
                    sources.push(source);
                }
            }
        }

        let parent_active = parent.active_profiles();
        if !parent_active.is_empty() {
            let mut active = self.active_profiles();
            for profile in parent_active {
                if !active.contains(&profile) {
                    active.push(profile);
                }
            }
            *self.active_profiles.write() = Some(active);
        }

        let parent_defaults = parent.default_profiles();
        let mut defaults = self.default_profiles.write();
        for profile in parent_defaults {
            if !defaults.contains(&profile) {
                defaults.push(profile);
            }
        }
    }

    /// The system properties source, if still present
    pub fn system_properties(&self) -> Option<Arc<dyn PropertySource>> {
        self.property_source(SYSTEM_PROPERTIES_SOURCE)
    }

    /// The system environment source, if still present
    pub fn system_environment(&self) -> Option<Arc<dyn PropertySource>> {
        self.property_source(SYSTEM_ENVIRONMENT_SOURCE)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("sources", &self.property_source_names())
            .field("active_profiles", &self.active_profiles())
            .field("default_profiles", &self.default_profiles())
            .finish()
    }
}

/// Index of the `}` closing a placeholder whose `${` was just consumed
fn find_placeholder_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(PLACEHOLDER_PREFIX.as_bytes()) {
            depth += 1;
            i += PLACEHOLDER_PREFIX.len();
            continue;
        }
        if bytes[i] == PLACEHOLDER_SUFFIX as u8 {
            if depth == 0 {
                return Some(i);
            }
            depth -= 1;
        }
        i += 1;
    }
    None
}

fn split_profiles(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        let env = Environment::empty();
        env.add_last(Arc::new(MapPropertySource::new("test", pairs.iter().copied())));
        env
    }

    #[test]
    fn test_source_precedence() {
        let env = env(&[("port", "8080")]);
        env.add_first(Arc::new(MapPropertySource::new("override", [("port", "9090")])));
        assert_eq!(env.get_property("port").as_deref(), Some("9090"));
        assert_eq!(env.property_source_names(), ["override", "test"]);

        env.remove_property_source("override");
        assert_eq!(env.get_property("port").as_deref(), Some("8080"));
    }

    #[test]
    fn test_placeholders() {
        let env = env(&[("host", "localhost"), ("port", "8080"), ("url", "http://${host}:${port}")]);
        assert_eq!(env.get_property("url").as_deref(), Some("http://localhost:8080"));
        assert_eq!(env.resolve_placeholders("${missing:fallback}").unwrap(), "fallback");
        assert_eq!(env.resolve_placeholders("${missing}").unwrap(), "${missing}");
        assert!(matches!(
            env.resolve_required_placeholders("x=${missing}"),
            Err(ContextError::UnresolvablePlaceholder { ref placeholder, .. }) if placeholder == "missing"
        ));
    }

    #[test]
    fn test_nested_placeholder_keys() {
        let env = env(&[("stage", "prod"), ("db.prod", "pg"), ("db.dev", "sqlite")]);
        assert_eq!(env.resolve_placeholders("${db.${stage}}").unwrap(), "pg");
        assert_eq!(env.resolve_placeholders("${db.${none:dev}}").unwrap(), "sqlite");
    }

    #[test]
    fn test_circular_placeholder() {
        let env = env(&[("a", "${b}"), ("b", "${a}")]);
        assert!(env.resolve_placeholders("${a}").is_err());
        // raw value when the reference cannot be resolved
        assert_eq!(env.get_property("a").as_deref(), Some("${b}"));
    }

    #[test]
    fn test_required_properties() {
        let env = env(&[("present", "yes")]);
        env.set_required_properties(["present", "absent", "gone"]);
        match env.validate_required_properties() {
            Err(ContextError::MissingRequiredProperty { keys }) => assert_eq!(keys, ["absent", "gone"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_typed_properties() {
        let env = env(&[("port", "8080"), ("timeout", "30s"), ("flag", "on")]);
        assert_eq!(env.get_property_as::<u16>("port").unwrap(), Some(8080));
        assert_eq!(env.get_property_as::<Duration>("timeout").unwrap(), Some(Duration::from_secs(30)));
        assert_eq!(env.get_property_as::<bool>("flag").unwrap(), Some(true));
        assert_eq!(env.get_property_as::<u16>("none").unwrap(), None);
        assert!(env.get_property_as::<u8>("port").is_err());
    }

    #[test]
    fn test_profiles() {
        let env = env(&[]);
        assert!(env.accepts_profiles(&["default"]));
        assert!(env.accepts_profiles(&["!prod"]));

        env.set_active_profiles(["prod"]);
        assert!(env.accepts_profiles(&["prod"]));
        assert!(!env.accepts_profiles(&["default"]));
        assert!(!env.accepts_profiles(&["!prod"]));
        assert!(env.accepts_profiles(&["dev", "prod"]));
    }

    #[test]
    fn test_profiles_from_property() {
        let env = env(&[("profiles.active", "dev, cloud")]);
        assert_eq!(env.active_profiles(), ["dev", "cloud"]);
        env.add_active_profile("local");
        assert_eq!(env.active_profiles(), ["dev", "cloud", "local"]);
    }

    #[test]
    fn test_relaxed_environment_names() {
        let source = SystemEnvironment::from_vars([("SERVER_PORT", "9090"), ("log_level", "debug")]);
        assert_eq!(source.get_property("server.port").as_deref(), Some("9090"));
        assert_eq!(source.get_property("log-level").as_deref(), Some("debug"));
        assert_eq!(source.get_property("missing"), None);
    }

    #[test]
    fn test_system_sources() {
        let env = Environment::new();
        assert_eq!(env.property_source_names(), [SYSTEM_PROPERTIES_SOURCE, SYSTEM_ENVIRONMENT_SOURCE]);
        assert_eq!(env.get_property("os.name").as_deref(), Some(std::env::consts::OS));
        if let Ok(path) = std::env::var("PATH") {
            assert_eq!(env.get_property("PATH"), Some(path));
        }
    }

    #[test]
    fn test_toml_source() {
        let source = MapPropertySource::from_toml_str(
            "app",
            r#"
            name = "demo"
            [server]
            port = 8080
            hosts = ["a", "b"]
            [server.tls]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(source.get_property("name").as_deref(), Some("demo"));
        assert_eq!(source.get_property("server.port").as_deref(), Some("8080"));
        assert_eq!(source.get_property("server.hosts").as_deref(), Some("a,b"));
        assert_eq!(source.get_property("server.hosts[1]").as_deref(), Some("b"));
        assert_eq!(source.get_property("server.tls.enabled").as_deref(), Some("true"));
        assert!(MapPropertySource::from_toml_str("bad", "= nope").is_err());
    }

    #[test]
    fn test_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(&path, "[db]\nurl = \"pg://${db.host:localhost}\"\n").unwrap();

        let env = Environment::empty();
        env.add_last(Arc::new(MapPropertySource::from_toml_file(&path).unwrap()));
        assert_eq!(env.get_property("db.url").as_deref(), Some("pg://localhost"));
        assert!(MapPropertySource::from_toml_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_merge_parent() {
        let parent = env(&[("shared", "parent")]);
        parent.set_active_profiles(["prod"]);
        let child = Environment::empty();
        child.add_last(Arc::new(MapPropertySource::new("child", [("shared", "child")])));
        child.merge(&parent);

        assert_eq!(child.get_property("shared").as_deref(), Some("child"));
        assert_eq!(child.property_source_names(), ["child", "test"]);
        assert_eq!(child.active_profiles(), ["prod"]);
    }
}
