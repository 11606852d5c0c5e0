use std::{collections::HashMap, sync::Arc, time::Duration};

use log::{debug, info, warn};
use forgelink_client::{Client, EventLoop};
use forgelink_types::{utils::timestamp, MetricId};
use tokio::{
    select,
    sync::mpsc::{self, Receiver},
    time::interval,
};

use crate::{
    alias::AliasCache,
    app::{AppClient, AppEvent, AppEventLoop},
    config::SubscriptionConfig,
    events::{DeviceEvent, MetricBirthDetails, MetricDetails, NodeEvent},
    fault::{FaultConfig, FaultEvent, FaultTracker},
    mapping::TagMap,
    normalizer::{DropReason, NormalizedMetric, Normalizer},
    oee::{OeeCalculator, OeeConfig},
    sequence::{SeqCheck, SequenceTracker},
    stats::PipelineStats,
    Identity, NodeIdentifier,
};

/// Configuration for the [StreamOrchestrator].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub oee: OeeConfig,
    pub fault: FaultConfig,
    /// Alias-cache eviction TTL for inactive identities.
    pub alias_ttl: Duration,
    /// Cadence of the maintenance sweep (alias TTL, fault retention).
    pub maintenance_interval: Duration,
    /// Capacity of the telemetry and event output channels.
    pub output_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            oee: OeeConfig::default(),
            fault: FaultConfig::default(),
            alias_ttl: Duration::from_secs(3600),
            maintenance_interval: Duration::from_secs(60),
            output_capacity: 1024,
        }
    }
}

/// Records emitted on the telemetry output channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryRecord {
    Metric(NormalizedMetric),
    Oee(crate::oee::OeeResult),
}

enum PipelineCommand {
    AcknowledgeFault(String),
    ReloadTagMap(Arc<TagMap>),
}

/// External control surface of a running pipeline: fault
/// acknowledgement and tag-map reload without a restart.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<PipelineCommand>,
}

impl PipelineHandle {
    /// Move a fault to ACKNOWLEDGED by id, leaving lifecycle timing
    /// untouched.
    pub async fn acknowledge_fault<S: Into<String>>(&self, fault_id: S) {
        _ = self
            .tx
            .send(PipelineCommand::AcknowledgeFault(fault_id.into()))
            .await;
    }

    /// Swap in a reloaded tag-mapping table.
    pub async fn reload_tag_map(&self, map: Arc<TagMap>) {
        _ = self.tx.send(PipelineCommand::ReloadTagMap(map)).await;
    }
}

/// Wires the decode path to the calculators: transport events flow in
/// through the [AppEventLoop], get resolved against the alias cache,
/// sequence-checked, normalized, and fanned out to the OEE calculator
/// and fault tracker; results land on two bounded output channels
/// ("telemetry": metrics + OEE results, "events": fault lifecycle).
pub struct StreamOrchestrator {
    app: AppEventLoop,
    alias_cache: AliasCache,
    sequencers: HashMap<NodeIdentifier, SequenceTracker>,
    normalizer: Normalizer,
    oee: OeeCalculator,
    faults: FaultTracker,
    stats: Arc<PipelineStats>,
    telemetry_tx: mpsc::Sender<TelemetryRecord>,
    events_tx: mpsc::Sender<FaultEvent>,
    command_rx: Receiver<PipelineCommand>,
    maintenance_interval: Duration,
}

impl StreamOrchestrator {
    /// Create the orchestrator together with its control handles and
    /// the two output channel receivers.
    #[allow(clippy::type_complexity)]
    pub fn new<
        S: Into<String>,
        E: EventLoop + Send + 'static,
        C: Client + Send + Sync + 'static,
    >(
        host_id: S,
        subscription_config: SubscriptionConfig,
        eventloop: E,
        client: C,
        tag_map: Arc<TagMap>,
        config: PipelineConfig,
    ) -> Result<
        (
            Self,
            AppClient,
            PipelineHandle,
            Receiver<TelemetryRecord>,
            Receiver<FaultEvent>,
        ),
        String,
    > {
        let (app, app_client) = AppEventLoop::new(host_id, subscription_config, eventloop, client)?;
        let (telemetry_tx, telemetry_rx) = mpsc::channel(config.output_capacity);
        let (events_tx, events_rx) = mpsc::channel(config.output_capacity);
        let (command_tx, command_rx) = mpsc::channel(16);

        let orchestrator = Self {
            app,
            alias_cache: AliasCache::new(config.alias_ttl.as_millis() as u64),
            sequencers: HashMap::new(),
            normalizer: Normalizer::new(tag_map),
            oee: OeeCalculator::new(config.oee),
            faults: FaultTracker::new(config.fault),
            stats: Arc::new(PipelineStats::default()),
            telemetry_tx,
            events_tx,
            command_rx,
            maintenance_interval: config.maintenance_interval,
        };
        let handle = PipelineHandle { tx: command_tx };
        Ok((orchestrator, app_client, handle, telemetry_rx, events_rx))
    }

    /// Install the fault-code description table.
    pub fn with_fault_descriptions(mut self, descriptions: HashMap<String, String>) -> Self {
        self.faults = self.faults.with_descriptions(descriptions);
        self
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    fn check_sequence(&mut self, node: &NodeIdentifier, seq: u8) {
        let tracker = self.sequencers.entry(node.clone()).or_default();
        if let SeqCheck::Gap { expected, got } = tracker.check_data(seq) {
            PipelineStats::incr(&self.stats.sequence_gaps);
            warn!(
                "Sequence gap for {}/{}: expected {expected}, got {got} - resuming from new baseline",
                node.group, node.node
            );
        }
    }

    fn normalize_one(
        &mut self,
        identity: &Identity,
        id: &MetricId,
        details: &MetricDetails,
    ) -> Option<NormalizedMetric> {
        let resolved = match self.alias_cache.resolve(identity, id, timestamp()) {
            Ok(resolved) => resolved,
            Err(alias) => {
                // never guess at an unresolved alias: drop and count
                PipelineStats::incr(&self.stats.unresolved_aliases);
                debug!(
                    "Unresolved alias {alias} for {}/{} - dropping metric",
                    identity.node.group, identity.node.node
                );
                return None;
            }
        };

        match self.normalizer.normalize(
            &resolved.name,
            resolved.datatype,
            details.value.as_ref(),
            details.quality,
            details.timestamp,
        ) {
            Ok(metric) => Some(metric),
            Err(reason) => {
                let counter = match reason {
                    DropReason::NoMapping => &self.stats.dropped_no_mapping,
                    DropReason::LowQuality => &self.stats.dropped_low_quality,
                    DropReason::DeadbandSuppressed => &self.stats.deadband_suppressed,
                    DropReason::NoValue => &self.stats.dropped_no_value,
                };
                PipelineStats::incr(counter);
                None
            }
        }
    }

    async fn emit(&mut self, metric: NormalizedMetric) {
        let closed_window = self.oee.process(&metric);
        let fault_events = if metric.signal_type.is_fault_signal() {
            self.faults.process(&metric)
        } else {
            Vec::new()
        };

        if self
            .telemetry_tx
            .send(TelemetryRecord::Metric(metric))
            .await
            .is_err()
        {
            debug!("Telemetry sink receiver dropped");
        }

        if let Some(result) = closed_window {
            PipelineStats::incr(&self.stats.oee_windows_closed);
            _ = self.telemetry_tx.send(TelemetryRecord::Oee(result)).await;
        }

        for event in fault_events {
            match &event {
                FaultEvent::Raised(_) => PipelineStats::incr(&self.stats.faults_raised),
                FaultEvent::Resolved(_) => PipelineStats::incr(&self.stats.faults_resolved),
                FaultEvent::Updated(_) => (),
            }
            _ = self.events_tx.send(event).await;
        }
        self.stats
            .faults_deduplicated
            .store(self.faults.deduplicated(), std::sync::atomic::Ordering::Relaxed);
    }

    async fn process_metrics(&mut self, identity: &Identity, metrics: Vec<(MetricId, MetricDetails)>) {
        for (id, details) in metrics {
            if let Some(metric) = self.normalize_one(identity, &id, &details) {
                self.emit(metric).await;
            }
        }
        PipelineStats::incr(&self.stats.messages_processed);
    }

    async fn on_birth(
        &mut self,
        identity: Identity,
        birth_metrics: Vec<(MetricBirthDetails, MetricDetails)>,
    ) {
        PipelineStats::incr(&self.stats.births);
        self.alias_cache
            .install_from_birth(&identity, &birth_metrics, timestamp());

        // birth certificates carry initial values: run them through
        // the pipeline like any data message
        let as_data: Vec<(MetricId, MetricDetails)> = birth_metrics
            .into_iter()
            .map(|(birth, details)| (MetricId::Name(birth.name), details))
            .collect();
        self.process_metrics(&identity, as_data).await;
    }

    async fn handle_node_event(&mut self, id: NodeIdentifier, event: NodeEvent) {
        PipelineStats::incr(&self.stats.messages_received);
        match event {
            NodeEvent::Birth(birth) => {
                self.sequencers
                    .entry(id.clone())
                    .or_default()
                    .reset_from_birth();
                self.on_birth(Identity::node(id), birth.metrics).await;
            }
            NodeEvent::Death(_) => {
                PipelineStats::incr(&self.stats.deaths);
                // a node death invalidates the node and every device under it
                self.alias_cache.clear_node(&id);
                self.sequencers.remove(&id);
            }
            NodeEvent::Data(data) => {
                self.check_sequence(&id, data.seq);
                self.process_metrics(&Identity::node(id), data.metrics).await;
            }
        }
    }

    async fn handle_device_event(&mut self, id: NodeIdentifier, device: String, event: DeviceEvent) {
        PipelineStats::incr(&self.stats.messages_received);
        match event {
            DeviceEvent::Birth(birth) => {
                self.check_sequence(&id, birth.seq);
                self.on_birth(Identity::device(id, device), birth.metrics).await;
            }
            DeviceEvent::Death(death) => {
                PipelineStats::incr(&self.stats.deaths);
                self.check_sequence(&id, death.seq);
                self.alias_cache
                    .clear_identity(&Identity::device(id, device));
            }
            DeviceEvent::Data(data) => {
                self.check_sequence(&id, data.seq);
                self.process_metrics(&Identity::device(id, device), data.metrics)
                    .await;
            }
        }
    }

    async fn handle_command(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::AcknowledgeFault(fault_id) => {
                match self.faults.acknowledge(&fault_id) {
                    Some(fault) => {
                        _ = self.events_tx.send(FaultEvent::Updated(fault)).await;
                    }
                    None => debug!("Acknowledge for unknown or non-active fault {fault_id}"),
                }
            }
            PipelineCommand::ReloadTagMap(map) => {
                info!("Tag mapping table reloaded ({} mappings)", map.len());
                self.normalizer.set_tag_map(map);
            }
        }
    }

    fn maintenance(&mut self) {
        let now = timestamp();
        let evicted = self.alias_cache.sweep(now);
        if evicted > 0 {
            self.stats
                .aliases_evicted
                .fetch_add(evicted as u64, std::sync::atomic::Ordering::Relaxed);
        }
        self.faults.maintain(now);
        self.stats
            .tracked_identities
            .store(self.alias_cache.len(), std::sync::atomic::Ordering::Relaxed);
    }

    /// Run the pipeline until [AppClient::cancel()] is called.
    pub async fn run(mut self) {
        info!("Stream pipeline running");
        let mut maintenance = interval(self.maintenance_interval);
        loop {
            select! {
                event = self.app.poll() => match event {
                    AppEvent::Online => (),
                    AppEvent::Offline => (),
                    AppEvent::Node(node_event) => {
                        self.handle_node_event(node_event.id, node_event.event).await
                    }
                    AppEvent::Device(device_event) => {
                        self.handle_device_event(
                            device_event.id,
                            device_event.device,
                            device_event.event,
                        )
                        .await
                    }
                    AppEvent::InvalidPayload(details) => {
                        PipelineStats::incr(&self.stats.invalid_payloads);
                        warn!(
                            "Invalid payload from {}/{}: {:?}",
                            details.node_id.group, details.node_id.node, details.error
                        );
                    }
                    AppEvent::InvalidWire(reason) => {
                        PipelineStats::incr(&self.stats.messages_failed);
                        debug!("Invalid wire message: {reason}");
                    }
                    AppEvent::Cancelled => break,
                },
                Some(command) = self.command_rx.recv() => self.handle_command(command).await,
                _ = maintenance.tick() => self.maintenance(),
            }
        }
        info!("Stream pipeline stopped");
    }
}
