//! Struct/header layout resolution.
//!
//! Test cases that build C structures in sandbox memory ask a resolver for
//! sizes and field offsets instead of hard-coding them per ABI. The resolver is
//! optional: without one, cases that need it are disabled.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub trait LayoutResolver: Send + Sync + std::fmt::Debug {
    fn size_of(&self, type_name: &str) -> Option<u64>;
    fn field_offset(&self, type_name: &str, field: &str) -> Option<u64>;

    fn has_type(&self, type_name: &str) -> bool {
        self.size_of(type_name).is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StructLayout {
    pub size: u64,
    #[serde(default)]
    pub fields: HashMap<String, u64>,
}

/// Layouts read from a JSON document of the form
/// `{"tm": {"size": 36, "fields": {"tm_sec": 0, "tm_min": 4}}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct StaticLayouts {
    types: HashMap<String, StructLayout>,
}

impl StaticLayouts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, name: impl Into<String>, layout: StructLayout) -> Self {
        self.types.insert(name.into(), layout);
        self
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let layouts: Self = serde_json::from_str(raw)
            .map_err(|e| ConfigError::InvalidConfig(format!("layout JSON: {e}")))?;
        for (name, layout) in &layouts.types {
            if let Some((field, offset)) = layout.fields.iter().find(|(_, off)| **off >= layout.size) {
                return Err(ConfigError::InvalidConfig(format!(
                    "layout `{name}`: field `{field}` at offset {offset} is outside size {}",
                    layout.size
                )));
            }
        }
        Ok(layouts)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::MissingConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }
}

impl LayoutResolver for StaticLayouts {
    fn size_of(&self, type_name: &str) -> Option<u64> {
        self.types.get(type_name).map(|l| l.size)
    }

    fn field_offset(&self, type_name: &str, field: &str) -> Option<u64> {
        self.types.get(type_name)?.fields.get(field).copied()
    }
}
