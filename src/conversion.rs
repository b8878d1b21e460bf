//! String-to-value conversion
//!
//! Property values and resolved `${...}` expressions are strings; the
//! conversion service turns them into typed values.

use crate::error::{ContextError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Boxed converted value
pub type Converted = Box<dyn Any + Send + Sync>;

type ConverterFn = Arc<dyn Fn(&str) -> Option<Converted> + Send + Sync>;

/// Converts strings to typed values
pub trait ConversionService: Send + Sync {
    /// True if a converter exists for the target type
    fn can_convert(&self, target: TypeId) -> bool;

    /// Convert `value` to the type identified by `target`
    fn convert(&self, value: &str, target: TypeId, target_name: &'static str) -> Result<Converted>;
}

impl dyn ConversionService {
    /// Typed convenience over [`ConversionService::convert`]
    pub fn convert_to<T: Send + Sync + 'static>(&self, value: &str) -> Result<T> {
        let converted = self.convert(value, TypeId::of::<T>(), std::any::type_name::<T>())?;
        converted
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| ContextError::ConversionFailed {
                value: value.to_string(),
                target: std::any::type_name::<T>(),
            })
    }
}

/// Conversion service with converters for the common scalar types
pub struct DefaultConversionService {
    converters: DashMap<TypeId, ConverterFn, RandomState>,
}

static SHARED: Lazy<Arc<DefaultConversionService>> =
    Lazy::new(|| Arc::new(DefaultConversionService::new()));

impl DefaultConversionService {
    pub fn new() -> Self {
        let service = Self {
            converters: DashMap::with_capacity_and_hasher_and_shard_amount(32, RandomState::new(), 8),
        };
        service.add_from_str::<String>();
        service.add_from_str::<char>();
        service.add_from_str::<i8>();
        service.add_from_str::<i16>();
        service.add_from_str::<i32>();
        service.add_from_str::<i64>();
        service.add_from_str::<isize>();
        service.add_from_str::<u8>();
        service.add_from_str::<u16>();
        service.add_from_str::<u32>();
        service.add_from_str::<u64>();
        service.add_from_str::<usize>();
        service.add_from_str::<f32>();
        service.add_from_str::<f64>();
        service.add_converter::<bool, _>(parse_bool);
        service.add_converter::<Duration, _>(parse_duration);
        service.add_converter::<Vec<String>, _>(|s| {
            Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect(),
            )
        });
        service
    }

    /// Lazily created process-wide instance
    pub fn shared() -> Arc<DefaultConversionService> {
        Arc::clone(&SHARED)
    }

    /// Register a converter, replacing any existing one for `T`
    pub fn add_converter<T, F>(&self, f: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&str) -> Option<T> + Send + Sync + 'static,
    {
        self.converters.insert(
            TypeId::of::<T>(),
            Arc::new(move |s: &str| f(s).map(|v| Box::new(v) as Converted)),
        );
    }

    /// Register a converter backed by `FromStr`
    pub fn add_from_str<T>(&self)
    where
        T: FromStr + Send + Sync + 'static,
    {
        self.add_converter::<T, _>(|s| s.trim().parse::<T>().ok());
    }
}

impl Default for DefaultConversionService {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionService for DefaultConversionService {
    fn can_convert(&self, target: TypeId) -> bool {
        self.converters.contains_key(&target)
    }

    fn convert(&self, value: &str, target: TypeId, target_name: &'static str) -> Result<Converted> {
        let converter = self
            .converters
            .get(&target)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| ContextError::ConversionFailed {
                value: value.to_string(),
                target: target_name,
            })?;
        converter(value).ok_or_else(|| ContextError::ConversionFailed {
            value: value.to_string(),
            target: target_name,
        })
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parse `250ms`, `30s`, `5m`, `2h` or a bare number of milliseconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "ms" => Some(Duration::from_millis(amount)),
        "s" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_secs(amount.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(amount.checked_mul(3600)?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        let service: Arc<dyn ConversionService> = Arc::new(DefaultConversionService::new());
        assert_eq!(service.convert_to::<u16>(" 8080 ").unwrap(), 8080);
        assert_eq!(service.convert_to::<f64>("2.5").unwrap(), 2.5);
        assert_eq!(service.convert_to::<String>("abc").unwrap(), "abc");
        assert!(service.convert_to::<bool>("on").unwrap());
        assert!(!service.convert_to::<bool>("No").unwrap());
        assert_eq!(
            service.convert_to::<Vec<String>>("a, b,,c").unwrap(),
            ["a", "b", "c"]
        );
    }

    #[test]
    fn test_failures() {
        let service: Arc<dyn ConversionService> = Arc::new(DefaultConversionService::new());
        assert!(matches!(
            service.convert_to::<u8>("300"),
            Err(ContextError::ConversionFailed { .. })
        ));
        assert!(service.convert_to::<std::path::PathBuf>("/tmp").is_err());
        assert!(!service.can_convert(TypeId::of::<std::path::PathBuf>()));
    }

    #[test]
    fn test_durations() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1500"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn test_custom_converter() {
        let service = DefaultConversionService::new();
        service.add_converter::<std::path::PathBuf, _>(|s| Some(s.into()));
        let service: Arc<dyn ConversionService> = Arc::new(service);
        assert_eq!(
            service.convert_to::<std::path::PathBuf>("/etc").unwrap(),
            std::path::PathBuf::from("/etc")
        );
    }
}
