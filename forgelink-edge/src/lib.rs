//! The publish side of forgelink: an edge node session manager that
//! births and deaths node/device identities, assigns metric aliases,
//! sequences data messages, and keeps publishing through broker
//! outages via a durable store-and-forward queue with
//! backpressure-adaptive sampling.

mod backpressure;
mod birth;
mod builder;
mod connector;
mod device;
mod error;
mod metric;
mod metric_manager;
mod node;
mod registry;
mod sampler;
mod store_forward;

pub use backpressure::{BackpressureConfig, BackpressureController};
pub use birth::{BirthInitializer, BirthMetricDetails, BirthMetricError};
pub use builder::EdgeNodeBuilder;
pub use connector::{Connector, ConnectorConfig, ConnectorError, ConnectorRegistry, DataPoint, DynConnector};
pub use device::DeviceHandle;
pub use error::{DeviceRegistrationError, QueueError, StateError};
pub use metric::*;
pub use metric_manager::{DeviceMetricManager, MetricManager, NoMetricManager, NodeMetricManager};
pub use node::{EdgeNode, NodeHandle};
pub use sampler::{SamplerConfig, TagSampler};
pub use store_forward::{QueuedMessage, QueuedTopic, ReplayOutcome, StoreForwardQueue};

#[derive(Debug, PartialEq)]
pub(crate) enum BirthType {
    Birth,
    Rebirth,
}
