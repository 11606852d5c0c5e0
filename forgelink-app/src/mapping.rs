use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signal::SignalType;

#[derive(Debug, Error)]
pub enum MappingConfigError {
    #[error("Unable to read tag mapping source: {0}")]
    Io(#[from] std::io::Error),
    #[error("Tag mapping source is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Duplicate mapping for source tag '{0}'")]
    DuplicateSourceTag(String),
}

fn default_scale() -> f64 {
    1.0
}

fn default_min_quality() -> u8 {
    forgelink_types::Quality::GOOD_THRESHOLD
}

/// One row of the externally supplied tag-mapping table: how a raw
/// source tag becomes a canonical signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagMapping {
    pub source_tag: String,
    pub signal_type: SignalType,
    pub machine_id: String,
    pub line_id: String,
    pub site_id: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub deadband_absolute: Option<f64>,
    #[serde(default)]
    pub deadband_percent: Option<f64>,
    #[serde(default = "default_min_quality")]
    pub min_quality: u8,
}

/// The tag-mapping table, keyed by source tag name. Read-only to the
/// pipeline at runtime; reloaded wholesale via
/// [PipelineHandle::reload_tag_map](crate::PipelineHandle::reload_tag_map).
#[derive(Debug, Default)]
pub struct TagMap {
    mappings: HashMap<String, TagMapping>,
}

impl TagMap {
    pub fn new(mappings: Vec<TagMapping>) -> Result<Self, MappingConfigError> {
        let mut map = HashMap::with_capacity(mappings.len());
        for mapping in mappings {
            if map.contains_key(&mapping.source_tag) {
                return Err(MappingConfigError::DuplicateSourceTag(mapping.source_tag));
            }
            map.insert(mapping.source_tag.clone(), mapping);
        }
        Ok(Self { mappings: map })
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, MappingConfigError> {
        let mappings: Vec<TagMapping> = serde_json::from_slice(bytes)?;
        Self::new(mappings)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, MappingConfigError> {
        let bytes = std::fs::read(path)?;
        Self::from_json_slice(&bytes)
    }

    pub fn get(&self, source_tag: &str) -> Option<&TagMapping> {
        self.mappings.get(source_tag)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_with_defaults() {
        let json = br#"[
            {
                "source_tag": "Line 1/Counter/Good",
                "signal_type": "counter.good",
                "machine_id": "press-03",
                "line_id": "line-1",
                "site_id": "plant1"
            },
            {
                "source_tag": "Line 1/Temp",
                "signal_type": "process.temperature",
                "machine_id": "press-03",
                "line_id": "line-1",
                "site_id": "plant1",
                "scale": 0.1,
                "offset": -40.0,
                "unit": "degC",
                "deadband_absolute": 0.5,
                "min_quality": 128
            }
        ]"#;

        let map = TagMap::from_json_slice(json).unwrap();
        assert_eq!(map.len(), 2);

        let counter = map.get("Line 1/Counter/Good").unwrap();
        assert_eq!(counter.signal_type, SignalType::CounterGood);
        assert_eq!(counter.scale, 1.0);
        assert_eq!(counter.offset, 0.0);
        assert_eq!(counter.min_quality, 192);

        let temp = map.get("Line 1/Temp").unwrap();
        assert_eq!(
            temp.signal_type,
            SignalType::Process("process.temperature".into())
        );
        assert_eq!(temp.scale, 0.1);
        assert_eq!(temp.min_quality, 128);
    }

    #[test]
    fn duplicate_source_tags_rejected() {
        let json = br#"[
            {"source_tag": "t", "signal_type": "counter.good", "machine_id": "m", "line_id": "l", "site_id": "s"},
            {"source_tag": "t", "signal_type": "counter.total", "machine_id": "m", "line_id": "l", "site_id": "s"}
        ]"#;
        assert!(matches!(
            TagMap::from_json_slice(json),
            Err(MappingConfigError::DuplicateSourceTag(_))
        ));
    }
}
