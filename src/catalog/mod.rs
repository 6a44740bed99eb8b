//! Behavioral contracts for known functions.

pub mod string;

use crate::error::ConstructionError;
use crate::probe::case::TestCase;

/// Every catalog shipped with the crate, in probing order.
pub fn default_catalog() -> Result<Vec<TestCase>, ConstructionError> {
    let catalog = string::string_catalog()?;
    tracing::debug!("[CATALOG] loaded {} cases", catalog.len());
    Ok(catalog)
}
