//! The subscribe side of forgelink: decodes the birth/death telemetry
//! namespace through an alias cache, normalizes raw tag values into
//! canonical signals, and drives the OEE and fault-lifecycle
//! calculators off the normalized stream.

mod alias;
mod app;
mod config;
mod events;
mod fault;
mod mapping;
mod normalizer;
mod oee;
mod pipeline;
mod sequence;
mod signal;
mod stats;

pub use alias::{AliasCache, ResolvedMetric};
pub use app::{AppClient, AppEvent, AppEventLoop, PublishMetric, PublishTopic};
pub use config::{NamespaceSubConfig, SubscriptionConfig};
pub use events::*;
pub use fault::{Fault, FaultConfig, FaultEvent, FaultSeverity, FaultState, FaultTracker};
pub use mapping::{MappingConfigError, TagMap, TagMapping};
pub use normalizer::{DropReason, NormalizedMetric, Normalizer, SignalValue};
pub use oee::{OeeCalculator, OeeConfig, OeeResult};
pub use pipeline::{
    PipelineConfig, PipelineHandle, StreamOrchestrator, TelemetryRecord,
};
pub use sequence::{SeqCheck, SequenceTracker};
pub use signal::SignalType;
pub use stats::{PipelineStats, StatsSnapshot};

/// Used to uniquely identify a node
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct NodeIdentifier {
    pub group: String,
    pub node: String,
}

/// A full birth/death lifecycle identity: a node, or a device nested
/// under one. Alias scopes and lifecycle state are keyed by this.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Identity {
    pub node: NodeIdentifier,
    pub device: Option<String>,
}

impl Identity {
    pub fn node(node: NodeIdentifier) -> Self {
        Self { node, device: None }
    }

    pub fn device(node: NodeIdentifier, device: String) -> Self {
        Self {
            node,
            device: Some(device),
        }
    }
}
