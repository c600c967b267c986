//! Element name to device name index
//!
//! Built once at startup from the engine's element listing and name
//! conversion, then read-only for the rest of the run.

use std::collections::{BTreeSet, HashMap};
use tracing::{info, instrument};

use crate::engine::ModelEngine;
use crate::value::EngineName;
use crate::EngineError;

/// Mapping from model element name to device name.
///
/// An empty device name means the element has no mapped device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementDeviceIndex {
    devices: HashMap<String, String>,
}

impl ElementDeviceIndex {
    /// Build the index from the engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if either engine call fails or the conversion
    /// result is not aligned with the element list. No partial index is
    /// returned.
    #[instrument(skip(engine), fields(engine = engine.name()))]
    pub async fn build(
        engine: &dyn ModelEngine,
        pattern: &str,
        convention: &str,
    ) -> Result<Self, EngineError> {
        let raw = engine.list_elements(pattern, convention).await?;
        let elements = distinct_names(raw);
        let converted = engine.convert_names(&elements).await?;
        let index = Self::from_conversion(elements, converted)?;
        info!(elements = index.len(), "Element index built");
        Ok(index)
    }

    /// Pair elements with their converted names; non-string results map to `""`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ParseError`] when the two lists differ in length.
    pub fn from_conversion(
        elements: Vec<String>,
        converted: Vec<EngineName>,
    ) -> Result<Self, EngineError> {
        if elements.len() != converted.len() {
            return Err(EngineError::ParseError(format!(
                "name conversion returned {} entries for {} elements",
                converted.len(),
                elements.len()
            )));
        }

        let devices = elements
            .into_iter()
            .zip(converted)
            .map(|(element, device)| (element, device.into_name().unwrap_or_default()))
            .collect();
        Ok(Self { devices })
    }

    /// Mapped device name, if the element is indexed
    pub fn get(&self, element: &str) -> Option<&str> {
        self.devices.get(element).map(String::as_str)
    }

    /// Device name for an element, falling back to the element name itself
    pub fn device_for<'a>(&'a self, element: &'a str) -> &'a str {
        self.get(element).unwrap_or(element)
    }

    /// Device names for a list of elements, in order
    pub fn devices(&self, elements: &[String]) -> Vec<String> {
        elements
            .iter()
            .map(|e| self.device_for(e).to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl FromIterator<(String, String)> for ElementDeviceIndex {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            devices: iter.into_iter().collect(),
        }
    }
}

/// Deduplicated string names; non-string entries are dropped
pub fn distinct_names(raw: Vec<EngineName>) -> Vec<String> {
    raw.into_iter()
        .filter_map(EngineName::into_name)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
