use std::{collections::HashMap, sync::Arc};

use forgelink_types::{
    payload::{metric, DataType},
    MetricValue, Quality,
};

use crate::{mapping::TagMap, signal::SignalType};

/// The canonical value carried by a [NormalizedMetric]. Numeric values
/// have scale and offset already applied; fault codes and other
/// non-numeric tags flow through as text.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalValue {
    Numeric(f64),
    Text(String),
    Bool(bool),
}

impl SignalValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Numeric(v) => Some(*v),
            SignalValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            SignalValue::Text(_) => None,
        }
    }

    /// Truthiness used for binary state and fault-active signals.
    pub fn is_truthy(&self) -> bool {
        match self {
            SignalValue::Numeric(v) => *v != 0.0,
            SignalValue::Bool(v) => *v,
            SignalValue::Text(v) => !v.is_empty() && v != "0" && v != "false",
        }
    }
}

/// Canonical output of the normalizer. Immutable once emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMetric {
    pub machine_id: String,
    pub line_id: String,
    pub site_id: String,
    pub signal_type: SignalType,
    pub value: SignalValue,
    pub unit: Option<String>,
    pub timestamp_utc: u64,
    pub quality: Quality,
    pub is_valid: bool,
}

/// Why a decoded metric produced no normalized output. Observable only
/// through counters, never through errors on the data path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoMapping,
    LowQuality,
    DeadbandSuppressed,
    NoValue,
}

/// Maps decoded metrics to canonical signals via the tag-mapping
/// table, applying unit scale/offset and deadband suppression.
///
/// The last-value cache used for deadband comparisons is keyed by
/// source tag and survives tag-map reloads.
pub struct Normalizer {
    map: Arc<TagMap>,
    last_values: HashMap<String, f64>,
}

impl Normalizer {
    pub fn new(map: Arc<TagMap>) -> Self {
        Self {
            map,
            last_values: HashMap::new(),
        }
    }

    /// Swap in a reloaded tag-mapping table without restarting the
    /// pipeline.
    pub fn set_tag_map(&mut self, map: Arc<TagMap>) {
        self.map = map;
    }

    fn deadband_suppressed(
        mapping: &crate::mapping::TagMapping,
        last: Option<&f64>,
        raw: f64,
    ) -> bool {
        let last = match last {
            Some(last) => *last,
            // first-ever values always pass
            None => return false,
        };
        let delta = (raw - last).abs();
        if let Some(absolute) = mapping.deadband_absolute {
            if delta < absolute {
                return true;
            }
        }
        if let Some(percent) = mapping.deadband_percent {
            if last != 0.0 && (delta / last.abs()) * 100.0 < percent {
                return true;
            }
        }
        false
    }

    /// Normalize one decoded metric. `source_tag` is the
    /// birth-declared metric name; `datatype` the birth-declared type
    /// (or `Unknown` for metrics that were never birthed by name).
    pub fn normalize(
        &mut self,
        source_tag: &str,
        datatype: DataType,
        value: Option<&MetricValue>,
        quality: Quality,
        timestamp: u64,
    ) -> Result<NormalizedMetric, DropReason> {
        let mapping = self.map.get(source_tag).ok_or(DropReason::NoMapping)?;

        if quality.value() < mapping.min_quality {
            return Err(DropReason::LowQuality);
        }

        let value = value.ok_or(DropReason::NoValue)?;

        // deadband applies to numeric values only; non-numeric values
        // always pass
        let signal_value = match value.to_f64(datatype) {
            Some(raw) => {
                if Self::deadband_suppressed(mapping, self.last_values.get(source_tag), raw) {
                    return Err(DropReason::DeadbandSuppressed);
                }
                self.last_values.insert(source_tag.to_string(), raw);
                SignalValue::Numeric(raw * mapping.scale + mapping.offset)
            }
            None => match &value.0 {
                metric::Value::StringValue(text) => SignalValue::Text(text.clone()),
                _ => return Err(DropReason::NoValue),
            },
        };

        Ok(NormalizedMetric {
            machine_id: mapping.machine_id.clone(),
            line_id: mapping.line_id.clone(),
            site_id: mapping.site_id.clone(),
            signal_type: mapping.signal_type.clone(),
            value: signal_value,
            unit: mapping.unit.clone(),
            timestamp_utc: timestamp,
            quality,
            is_valid: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::TagMapping;

    fn mapping(deadband_absolute: Option<f64>, deadband_percent: Option<f64>) -> TagMapping {
        TagMapping {
            source_tag: "Line 1/Temp".into(),
            signal_type: SignalType::Process("process.temperature".into()),
            machine_id: "press-03".into(),
            line_id: "line-1".into(),
            site_id: "plant1".into(),
            scale: 2.0,
            offset: 1.0,
            unit: Some("degC".into()),
            deadband_absolute,
            deadband_percent,
            min_quality: 192,
        }
    }

    fn normalizer(deadband_absolute: Option<f64>, deadband_percent: Option<f64>) -> Normalizer {
        let map = TagMap::new(vec![mapping(deadband_absolute, deadband_percent)]).unwrap();
        Normalizer::new(Arc::new(map))
    }

    #[test]
    fn applies_scale_offset_and_identity() {
        let mut normalizer = normalizer(None, None);
        let value = MetricValue::from(10.0f64);
        let metric = normalizer
            .normalize("Line 1/Temp", DataType::Double, Some(&value), Quality::GOOD, 1000)
            .unwrap();
        assert_eq!(metric.value, SignalValue::Numeric(21.0));
        assert_eq!(metric.machine_id, "press-03");
        assert_eq!(metric.line_id, "line-1");
        assert_eq!(metric.site_id, "plant1");
        assert_eq!(metric.unit.as_deref(), Some("degC"));
        assert!(metric.is_valid);
    }

    #[test]
    fn unmapped_tag_dropped() {
        let mut normalizer = normalizer(None, None);
        let value = MetricValue::from(1.0f64);
        assert_eq!(
            normalizer.normalize("unknown", DataType::Double, Some(&value), Quality::GOOD, 0),
            Err(DropReason::NoMapping)
        );
    }

    #[test]
    fn low_quality_dropped() {
        let mut normalizer = normalizer(None, None);
        let value = MetricValue::from(1.0f64);
        assert_eq!(
            normalizer.normalize(
                "Line 1/Temp",
                DataType::Double,
                Some(&value),
                Quality::new(100),
                0
            ),
            Err(DropReason::LowQuality)
        );
    }

    #[test]
    fn deadband_idempotence() {
        let mut normalizer = normalizer(Some(0.5), None);
        let value = MetricValue::from(10.0f64);

        // first value always passes
        assert!(normalizer
            .normalize("Line 1/Temp", DataType::Double, Some(&value), Quality::GOOD, 0)
            .is_ok());

        // repeating the same value yields zero additional emissions
        for _ in 0..5 {
            assert_eq!(
                normalizer.normalize(
                    "Line 1/Temp",
                    DataType::Double,
                    Some(&value),
                    Quality::GOOD,
                    1
                ),
                Err(DropReason::DeadbandSuppressed)
            );
        }

        // a change beyond the band passes
        let moved = MetricValue::from(10.6f64);
        assert!(normalizer
            .normalize("Line 1/Temp", DataType::Double, Some(&moved), Quality::GOOD, 2)
            .is_ok());
    }

    #[test]
    fn percent_deadband() {
        let mut normalizer = normalizer(None, Some(10.0));
        let base = MetricValue::from(100.0f64);
        assert!(normalizer
            .normalize("Line 1/Temp", DataType::Double, Some(&base), Quality::GOOD, 0)
            .is_ok());

        // 5% move suppressed, 15% move passes
        let small = MetricValue::from(105.0f64);
        assert_eq!(
            normalizer.normalize(
                "Line 1/Temp",
                DataType::Double,
                Some(&small),
                Quality::GOOD,
                1
            ),
            Err(DropReason::DeadbandSuppressed)
        );
        let large = MetricValue::from(115.0f64);
        assert!(normalizer
            .normalize("Line 1/Temp", DataType::Double, Some(&large), Quality::GOOD, 2)
            .is_ok());
    }

    #[test]
    fn suppressed_values_do_not_move_the_baseline() {
        let mut normalizer = normalizer(Some(1.0), None);
        let base = MetricValue::from(10.0f64);
        assert!(normalizer
            .normalize("Line 1/Temp", DataType::Double, Some(&base), Quality::GOOD, 0)
            .is_ok());

        // creep in steps below the band: each compares against 10.0
        for (i, v) in [10.4, 10.8].iter().enumerate() {
            let value = MetricValue::from(*v);
            assert_eq!(
                normalizer.normalize(
                    "Line 1/Temp",
                    DataType::Double,
                    Some(&value),
                    Quality::GOOD,
                    i as u64 + 1
                ),
                Err(DropReason::DeadbandSuppressed)
            );
        }
        let value = MetricValue::from(11.0f64);
        assert!(normalizer
            .normalize("Line 1/Temp", DataType::Double, Some(&value), Quality::GOOD, 3)
            .is_ok());
    }

    #[test]
    fn text_values_pass_without_deadband() {
        let map = TagMap::new(vec![TagMapping {
            source_tag: "Fault/Code".into(),
            signal_type: SignalType::FaultCode,
            machine_id: "press-03".into(),
            line_id: "line-1".into(),
            site_id: "plant1".into(),
            scale: 1.0,
            offset: 0.0,
            unit: None,
            deadband_absolute: Some(1.0),
            deadband_percent: None,
            min_quality: 192,
        }])
        .unwrap();
        let mut normalizer = Normalizer::new(Arc::new(map));

        let code = MetricValue::from("2001".to_string());
        for _ in 0..2 {
            let metric = normalizer
                .normalize("Fault/Code", DataType::String, Some(&code), Quality::GOOD, 0)
                .unwrap();
            assert_eq!(metric.value, SignalValue::Text("2001".into()));
        }
    }
}
