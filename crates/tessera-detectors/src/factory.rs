//! Factory for creating detector adapters.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use tessera_core::{AdapterSpec, DetectError, DetectResult, DetectionConfig, DetectorAdapter};

use crate::{PrecomputedAdapter, TextStructureAdapter};

/// Factory for creating detector adapters.
pub struct DetectorFactory;

impl DetectorFactory {
    /// Create a text-structure adapter.
    pub fn text_structure(name: impl Into<String>) -> Arc<dyn DetectorAdapter> {
        Arc::new(TextStructureAdapter::new(name))
    }

    /// Create an adapter replaying detections from a file.
    pub fn precomputed(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        class_map: &BTreeMap<String, String>,
    ) -> DetectResult<Arc<dyn DetectorAdapter>> {
        Ok(Arc::new(PrecomputedAdapter::from_file(name, path, class_map)?))
    }

    /// Create an adapter from its configuration entry.
    pub fn from_spec(spec: &AdapterSpec) -> DetectResult<Arc<dyn DetectorAdapter>> {
        match spec {
            AdapterSpec::TextStructure { name } => Ok(Self::text_structure(name.clone())),
            AdapterSpec::Precomputed {
                name,
                path,
                class_map,
            } => Self::precomputed(name.clone(), path, class_map),
        }
    }

    /// Create every configured adapter, in declaration order.
    ///
    /// Adapter names end up in zone ids and `source_adapters`, so they must
    /// be unique.
    pub fn from_config(config: &DetectionConfig) -> DetectResult<Vec<Arc<dyn DetectorAdapter>>> {
        let mut seen = BTreeSet::new();
        for spec in &config.adapters {
            if !seen.insert(spec.name()) {
                return Err(DetectError::InvalidInput(format!(
                    "adapter name '{}' is configured more than once",
                    spec.name()
                )));
            }
        }
        config.adapters.iter().map(Self::from_spec).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_builds_text_structure() {
        let adapters = DetectorFactory::from_config(&DetectionConfig::default()).unwrap();
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].name(), "text-structure");
    }

    #[test]
    fn test_precomputed_from_config() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"detections": []}"#).unwrap();

        let config = DetectionConfig {
            adapters: vec![
                AdapterSpec::TextStructure {
                    name: "text".to_string(),
                },
                AdapterSpec::Precomputed {
                    name: "vision".to_string(),
                    path: file.path().to_path_buf(),
                    class_map: BTreeMap::new(),
                },
            ],
            ..Default::default()
        };
        let adapters = DetectorFactory::from_config(&config).unwrap();
        let names: Vec<&str> = adapters.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["text", "vision"]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let spec = AdapterSpec::Precomputed {
            name: "vision".to_string(),
            path: "/nonexistent/detections.json".into(),
            class_map: BTreeMap::new(),
        };
        assert!(matches!(DetectorFactory::from_spec(&spec), Err(DetectError::Io(_))));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let spec = AdapterSpec::TextStructure {
            name: "same".to_string(),
        };
        let config = DetectionConfig {
            adapters: vec![spec.clone(), spec],
            ..Default::default()
        };
        assert!(DetectorFactory::from_config(&config).is_err());
    }
}
