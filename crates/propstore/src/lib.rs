//! Named system properties consulted by the render engine.
//!
//! Properties are plain strings keyed by dotted names (`sys.3d.height`). Readers
//! always supply a default, so an unset property is never an error. Numeric
//! readers parse leniently: a malformed value logs a warning and yields the
//! default instead of failing the caller.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse property file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid property file: {0}")]
    Invalid(String),
}

/// Key-value store of named properties.
///
/// Implementations use interior mutability so that the store can be shared
/// between the compositor and whatever process publishes property updates.
pub trait PropertyStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str);

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn get_f32(&self, key: &str, default: f32) -> f32 {
        parse_or(key, self.get(key), default)
    }

    fn get_i32(&self, key: &str, default: i32) -> i32 {
        parse_or(key, self.get(key), default)
    }

    /// Integer-valued switch: any nonzero value is on.
    fn get_flag(&self, key: &str, default: bool) -> bool {
        self.get_i32(key, i32::from(default)) != 0
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy + fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = %raw, %default, "malformed property value; using default");
            default
        }
    }
}

/// In-memory [`PropertyStore`], optionally seeded from a TOML document.
#[derive(Default)]
pub struct MemoryProperties {
    values: RwLock<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct PropertyFile {
    #[serde(default)]
    properties: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PropertyValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl PropertyValue {
    fn into_string(self) -> String {
        match self {
            PropertyValue::Str(value) => value,
            PropertyValue::Int(value) => value.to_string(),
            PropertyValue::Float(value) => value.to_string(),
            PropertyValue::Bool(true) => "1".to_string(),
            PropertyValue::Bool(false) => "0".to_string(),
        }
    }
}

impl MemoryProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a document with a single `[properties]` table.
    ///
    /// ```toml
    /// [properties]
    /// "sys.3d.height" = 0.5
    /// "sys.hwc.force3d.primary" = "2"
    /// ```
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let file: PropertyFile = toml::from_str(input)?;
        let mut values = BTreeMap::new();
        for (key, value) in file.properties {
            validate_key(&key)?;
            values.insert(key, value.into_string());
        }
        Ok(Self {
            values: RwLock::new(values),
        })
    }

    pub fn with(self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.values.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PropertyStore for MemoryProperties {
    fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self
            .values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        values.insert(key.to_string(), value.to_string());
    }
}

impl fmt::Debug for MemoryProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.read().iter()).finish()
    }
}

fn validate_key(key: &str) -> Result<(), ConfigError> {
    if key.trim().is_empty() {
        return Err(ConfigError::Invalid("property name may not be empty".into()));
    }
    if key.chars().any(char::is_whitespace) {
        return Err(ConfigError::Invalid(format!(
            "property name '{key}' may not contain whitespace"
        )));
    }
    Ok(())
}
