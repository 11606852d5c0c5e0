use std::marker::PhantomData;
use std::vec::IntoIter;

use forgelink_types::payload::{Metric, Payload};
use forgelink_types::utils::timestamp;
use forgelink_types::{traits, MetricId, MetricValue, Quality};
use log::warn;

use thiserror::Error;

use crate::StateError;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("No metrics provided.")]
    NoMetrics,
    #[error("State Error: {0}.")]
    State(StateError),
}

impl From<StateError> for PublishError {
    fn from(value: StateError) -> Self {
        PublishError::State(value)
    }
}

/// How a publish left the node: straight onto the transport, or into
/// the store-and-forward queue because the broker is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Queued,
}

/// A trait for publishing metrics to the network.
///
/// `MetricPublisher` defines a set of methods for publishing single metrics
/// or batches of metrics. It provides "try_" variants that may fail immediately.
/// While the transport is down, publishes are redirected to the node's
/// store-and-forward queue and reported as [Delivery::Queued].
pub trait MetricPublisher {
    /// Attempts to publish a batch of metrics without modifying their order.
    fn try_publish_metrics_unsorted(
        &self,
        metrics: Vec<PublishMetric>,
    ) -> impl std::future::Future<Output = Result<Delivery, PublishError>> + Send;

    /// Attempts to publish a single metric.
    fn try_publish_metric(
        &self,
        metric: PublishMetric,
    ) -> impl std::future::Future<Output = Result<Delivery, PublishError>> + Send {
        self.try_publish_metrics_unsorted(vec![metric])
    }

    /// Attempts to publish a batch of metrics after sorting by timestamp.
    fn try_publish_metrics(
        &self,
        mut metrics: Vec<PublishMetric>,
    ) -> impl std::future::Future<Output = Result<Delivery, PublishError>> + Send {
        metrics.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        self.try_publish_metrics_unsorted(metrics)
    }

    /// Publish a batch of metrics without modifying their order.
    fn publish_metrics_unsorted(
        &self,
        metrics: Vec<PublishMetric>,
    ) -> impl std::future::Future<Output = Result<Delivery, PublishError>> + Send;

    /// Publish a single metric.
    fn publish_metric(
        &self,
        metric: PublishMetric,
    ) -> impl std::future::Future<Output = Result<Delivery, PublishError>> + Send {
        self.publish_metrics_unsorted(vec![metric])
    }

    /// Publish a batch of metrics after sorting by timestamp.
    fn publish_metrics(
        &self,
        mut metrics: Vec<PublishMetric>,
    ) -> impl std::future::Future<Output = Result<Delivery, PublishError>> + Send {
        metrics.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        self.publish_metrics_unsorted(metrics)
    }
}

/// A structure for creating a metric to be published.
///
/// Provides a builder pattern for configuring metric publications:
/// custom timestamps and quality codes.
pub struct PublishMetric {
    metric_identifier: MetricId,
    value: Option<MetricValue>,
    quality: Option<Quality>,
    timestamp: u64,
}

impl PublishMetric {
    pub(crate) fn new<T: traits::MetricValue>(
        metric_identifier: MetricId,
        value: Option<T>,
    ) -> Self {
        Self {
            metric_identifier,
            value: value.map(T::into),
            quality: None,
            timestamp: timestamp(),
        }
    }

    /// Create a metric for publishing from a raw value, bypassing the
    /// typed token api. Used by samplers that deal in dynamic values.
    pub fn new_raw(metric_identifier: MetricId, value: Option<MetricValue>) -> Self {
        Self {
            metric_identifier,
            value,
            quality: None,
            timestamp: timestamp(),
        }
    }

    /// Sets a custom timestamp for the metric.
    ///
    /// By default, the current system time is used.
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the quality code for the metric.
    ///
    /// Metrics published without an explicit quality are treated as good.
    pub fn quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }
}

impl From<PublishMetric> for Metric {
    fn from(value: PublishMetric) -> Self {
        let mut metric = Metric::new();
        match value.metric_identifier {
            MetricId::Name(name) => metric.set_name(name),
            MetricId::Alias(alias) => metric.set_alias(alias),
        };

        if let Some(val) = value.value {
            metric.set_value(val.into());
        }
        if let Some(quality) = value.quality {
            metric.set_quality(quality);
        }

        metric.set_timestamp(value.timestamp);
        metric
    }
}

/// A token representing a birthed metric
///
/// Used to create a [PublishMetric] for publishing and match a [MessageMetric] identifier
pub struct MetricToken<T> {
    phantom: PhantomData<T>,
    /// The unique identifier of the metric
    pub id: MetricId,
}

impl<T> MetricToken<T> {
    pub(crate) fn new(id: MetricId) -> Self {
        Self {
            phantom: PhantomData,
            id,
        }
    }
}

impl<T> MetricToken<T>
where
    T: traits::MetricValue,
{
    /// Create a new [PublishMetric]
    pub fn create_publish_metric(&self, value: Option<T>) -> PublishMetric {
        PublishMetric::new(self.id.clone(), value)
    }
}

/// A collection of metrics from a message
pub struct MessageMetrics {
    /// The timestamp of the payload
    pub timestamp: u64,
    metrics: Vec<Metric>,
}

impl MessageMetrics {
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// A metric from a message
pub struct MessageMetric {
    /// The unique identifier of the metric
    pub id: MetricId,
    pub timestamp: Option<u64>,
    pub value: Option<MetricValue>,
    pub quality: Quality,
}

impl TryFrom<Metric> for MessageMetric {
    type Error = ();

    fn try_from(value: Metric) -> Result<Self, Self::Error> {
        let id = if let Some(alias) = value.alias {
            MetricId::Alias(alias)
        } else if let Some(name) = value.name {
            MetricId::Name(name)
        } else {
            return Err(());
        };

        let metric_value = if value.value.is_some() {
            value.value.map(MetricValue::from)
        } else if let Some(is_null) = value.is_null {
            if !is_null {
                return Err(());
            }
            None
        } else {
            return Err(());
        };

        let quality = match value.quality {
            Some(code) => Quality::try_from(code).map_err(|_| ())?,
            None => Quality::default(),
        };

        Ok(MessageMetric {
            id,
            timestamp: value.timestamp,
            value: metric_value,
            quality,
        })
    }
}

pub struct MessageMetricsIterator {
    metric_iter: IntoIter<Metric>,
}

impl Iterator for MessageMetricsIterator {
    type Item = MessageMetric;

    fn next(&mut self) -> Option<Self::Item> {
        let metric = self.metric_iter.next();
        match metric {
            Some(metric) => match metric.try_into() {
                Ok(message_metric) => Some(message_metric),
                Err(_) => {
                    warn!("Got invalid or badly formed metric - skipping");
                    self.next()
                }
            },
            None => None,
        }
    }
}

impl IntoIterator for MessageMetrics {
    type Item = MessageMetric;

    type IntoIter = MessageMetricsIterator;

    fn into_iter(self) -> Self::IntoIter {
        MessageMetricsIterator {
            metric_iter: self.metrics.into_iter(),
        }
    }
}

impl TryFrom<Payload> for MessageMetrics {
    type Error = ();

    fn try_from(value: Payload) -> Result<Self, Self::Error> {
        /* command messages must carry a payload timestamp */
        let timestamp = match value.timestamp {
            Some(timestamp) => timestamp,
            None => return Err(()),
        };

        Ok(MessageMetrics {
            timestamp,
            metrics: value.metrics,
        })
    }
}
