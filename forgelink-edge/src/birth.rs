use std::{
    collections::HashSet,
    hash::{DefaultHasher, Hash, Hasher},
};

use forgelink_types::{
    payload::{DataType, Metric},
    traits,
    utils::timestamp,
    MetricId, MetricValue, Quality,
};

use crate::{metric::MetricToken, registry::DeviceId};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BirthMetricError {
    #[error("Duplicate metric")]
    DuplicateMetric,
    #[error("The provided type does not support that datatype")]
    MetricValueDatatypeMismatch,
}

/// Details about a metric to be included in a birth message
pub struct BirthMetricDetails<T> {
    name: String,
    use_alias: bool,
    datatype: DataType,
    initial_value: Option<T>,
    quality: Option<Quality>,
    timestamp: u64,
}

impl<T> BirthMetricDetails<T> {
    fn new(name: String, initial_value: Option<T>, datatype: DataType) -> Self {
        Self {
            name,
            use_alias: true,
            datatype,
            initial_value,
            quality: None,
            timestamp: timestamp(),
        }
    }

    pub fn use_alias(mut self, use_alias: bool) -> Self {
        self.use_alias = use_alias;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }

    fn into_metric_value(self, value: Option<MetricValue>) -> Metric {
        let mut birth_metric = Metric::new();
        birth_metric.set_name(self.name).set_datatype(self.datatype);
        birth_metric.timestamp = Some(self.timestamp);
        birth_metric.quality = self.quality.map(|q| q.value() as u32);
        if let Some(value) = value {
            birth_metric.set_value(value.into());
        }
        birth_metric
    }
}

impl<T> BirthMetricDetails<T>
where
    T: traits::MetricValue,
{
    pub fn new_with_initial_value<S: Into<String>>(name: S, initial_value: T) -> Self {
        Self::new(name.into(), Some(initial_value), T::default_datatype())
    }

    fn new_with_explicit_datatype(
        name: String,
        datatype: DataType,
        initial_value: Option<T>,
    ) -> Result<Self, BirthMetricError> {
        if !T::supported_datatypes().contains(&datatype) {
            return Err(BirthMetricError::MetricValueDatatypeMismatch);
        }
        Ok(Self::new(name, initial_value, datatype))
    }

    pub fn new_with_initial_value_explicit_type<S: Into<String>>(
        name: S,
        initial_value: T,
        datatype: DataType,
    ) -> Result<Self, BirthMetricError> {
        Self::new_with_explicit_datatype(name.into(), datatype, Some(initial_value))
    }

    pub fn new_without_initial_value<S: Into<String>>(
        name: S,
        datatype: DataType,
    ) -> Result<Self, BirthMetricError> {
        Self::new_with_explicit_datatype(name.into(), datatype, None)
    }
}

enum AliasType {
    Node,
    Device { id: DeviceId },
}

pub enum BirthObjectType {
    Node,
    Device(DeviceId),
}

/// Collects the metric declarations for one birth certificate,
/// assigning each metric a unique alias scoped to the owning
/// node/device identity.
pub struct BirthInitializer {
    birth_metrics: Vec<Metric>,
    metric_names: HashSet<String>,
    metric_aliases: HashSet<u64>,
    inserter_type: BirthObjectType,
}

impl BirthInitializer {
    pub(crate) fn new(inserter_type: BirthObjectType) -> Self {
        Self {
            birth_metrics: Vec::new(),
            metric_names: HashSet::new(),
            metric_aliases: HashSet::new(),
            inserter_type,
        }
    }

    fn generate_alias(&mut self, alias_type: AliasType, metric_name: &String) -> u64 {
        let mut hasher = DefaultHasher::new();
        metric_name.hash(&mut hasher);
        let hash = hasher.finish() as u32;
        let id_part = match alias_type {
            AliasType::Node => 0,
            AliasType::Device { id } => id,
        };
        let mut alias = ((id_part as u64) << 32) | (hash as u64);
        while self.metric_aliases.contains(&alias) {
            alias += 1;
        }
        self.metric_aliases.insert(alias);
        alias
    }

    fn create_metric_token<T>(
        &mut self,
        name: &String,
        use_alias: bool,
    ) -> Result<MetricToken<T>, BirthMetricError> {
        let metric: String = name.into();

        if self.metric_names.contains(&metric) {
            return Err(BirthMetricError::DuplicateMetric);
        }
        self.metric_names.insert(metric.clone());

        let id = match use_alias {
            true => {
                let alias = match &self.inserter_type {
                    BirthObjectType::Node => self.generate_alias(AliasType::Node, &metric),
                    BirthObjectType::Device(id) => {
                        self.generate_alias(AliasType::Device { id: *id }, &metric)
                    }
                };
                MetricId::Alias(alias)
            }
            false => MetricId::Name(metric),
        };

        Ok(MetricToken::new(id))
    }

    pub fn register_metric<T>(
        &mut self,
        mut details: BirthMetricDetails<T>,
    ) -> Result<MetricToken<T>, BirthMetricError>
    where
        T: traits::MetricValue,
    {
        let tok = self.create_metric_token(&details.name.clone(), details.use_alias)?;
        let value = details.initial_value.take().map(T::into);
        let mut metric = details.into_metric_value(value);
        if let MetricId::Alias(alias) = &tok.id {
            metric.set_alias(*alias);
        }
        self.birth_metrics.push(metric);
        Ok(tok)
    }

    pub(crate) fn finish(self) -> Vec<Metric> {
        self.birth_metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_are_unique_and_scoped() {
        let mut init = BirthInitializer::new(BirthObjectType::Node);
        let a: MetricToken<i64> =
            init.register_metric(BirthMetricDetails::new_with_initial_value("a", 1i64)).unwrap();
        let b: MetricToken<i64> =
            init.register_metric(BirthMetricDetails::new_with_initial_value("b", 2i64)).unwrap();
        let (alias_a, alias_b) = match (&a.id, &b.id) {
            (MetricId::Alias(x), MetricId::Alias(y)) => (*x, *y),
            _ => panic!("expected aliases"),
        };
        assert_ne!(alias_a, alias_b);
        // node-scoped aliases keep the upper word clear
        assert_eq!(alias_a >> 32, 0);

        let mut dev_init = BirthInitializer::new(BirthObjectType::Device(7));
        let c: MetricToken<i64> = dev_init
            .register_metric(BirthMetricDetails::new_with_initial_value("a", 1i64))
            .unwrap();
        if let MetricId::Alias(alias) = c.id {
            assert_eq!(alias >> 32, 7);
        } else {
            panic!("expected alias");
        }
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut init = BirthInitializer::new(BirthObjectType::Node);
        let _: MetricToken<bool> = init
            .register_metric(BirthMetricDetails::new_with_initial_value("dup", true))
            .unwrap();
        let second: Result<MetricToken<bool>, _> =
            init.register_metric(BirthMetricDetails::new_with_initial_value("dup", false));
        assert!(matches!(second, Err(BirthMetricError::DuplicateMetric)));
    }

    #[test]
    fn birth_metrics_carry_name_alias_and_datatype() {
        let mut init = BirthInitializer::new(BirthObjectType::Node);
        let _: MetricToken<f64> = init
            .register_metric(BirthMetricDetails::new_with_initial_value("temp", 20.5f64))
            .unwrap();
        let metrics = init.finish();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name.as_deref(), Some("temp"));
        assert!(metrics[0].alias.is_some());
        assert_eq!(metrics[0].datatype, Some(DataType::Double as u32));
    }
}
