use std::{
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use log::{debug, error, info, warn};
use forgelink_client::{DynClient, DynEventLoop, Event, LastWill, Message, MessageKind};
use forgelink_types::{
    constants::{self, NODE_CONTROL_REBIRTH},
    payload::{metric::Value, Message as ProstMessage, Metric, Payload},
    topic::{
        DeviceMessage as DeviceMessageType, DeviceTopic, NodeMessage as NodeMessageType, NodeTopic,
        QoS, StateTopic, Topic, TopicFilter,
    },
    utils::timestamp,
    MetricValue,
};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::timeout,
};

use crate::{
    backpressure::BackpressureController,
    birth::BirthObjectType,
    builder::EdgeNodeBuilder,
    device::DeviceMap,
    error::DeviceRegistrationError,
    metric::{Delivery, MessageMetrics, MetricPublisher, PublishError, PublishMetric},
    metric_manager::{DynDeviceMetricManager, DynNodeMetricManager},
    store_forward::{QueuedMessage, QueuedTopic, StoreForwardQueue},
    BirthInitializer, BirthMetricDetails, BirthType,
};

pub(crate) struct NodeConfig {
    pub node_rebirth_request_cooldown: Duration,
}

struct NodeStateInner {
    seq: u8,
    online: bool,
    birthed: bool,
}

pub(crate) struct NodeState {
    running: AtomicBool,
    bdseq: AtomicU8,
    inner: Mutex<NodeStateInner>,
    pub group_id: String,
    pub node_id: String,
    pub ndata_topic: NodeTopic,
}

impl NodeState {
    /// Advance the per-node sequence counter. Sequence numbers keep
    /// advancing while offline so queued payloads preserve their
    /// enqueue-order numbering through a replay.
    pub(crate) fn next_seq(&self) -> u64 {
        let mut state = self.inner.lock().unwrap();
        state.seq = state.seq.wrapping_add(1);
        state.seq as u64
    }

    fn online_swap(&self, online: bool) -> bool {
        let mut state = self.inner.lock().unwrap();
        let old_online_state = state.online;
        state.online = online;
        old_online_state
    }

    pub(crate) fn is_online(&self) -> bool {
        self.inner.lock().unwrap().online
    }

    fn set_dead(&self) {
        let mut state = self.inner.lock().unwrap();
        state.birthed = false;
    }

    pub(crate) fn birthed(&self) -> bool {
        self.inner.lock().unwrap().birthed
    }

    /// A birth resets the sequence counter; the birth certificate
    /// itself always carries sequence number 0.
    fn start_birth(&self) {
        let mut state = self.inner.lock().unwrap();
        state.birthed = false;
        state.seq = 0;
    }

    fn birth_completed(&self) {
        self.inner.lock().unwrap().birthed = true
    }

    fn birth_topic(&self) -> NodeTopic {
        NodeTopic::new(&self.group_id, NodeMessageType::NBirth, &self.node_id)
    }

    fn generate_death_payload(&self) -> Payload {
        let mut metric = Metric::new();
        metric
            .set_name(constants::BDSEQ.to_string())
            .set_value(MetricValue::from(self.bdseq.load(Ordering::SeqCst) as i64).into());
        Payload {
            seq: None,
            metrics: vec![metric],
            timestamp: None,
        }
    }

    fn create_last_will(&self) -> LastWill {
        LastWill::new_node(&self.group_id, &self.node_id, self.generate_death_payload())
    }

    fn sub_topics(&self) -> Vec<TopicFilter> {
        vec![
            TopicFilter::new_with_qos(
                Topic::NodeTopic(NodeTopic::new(
                    &self.group_id,
                    NodeMessageType::NCmd,
                    &self.node_id,
                )),
                QoS::AtLeastOnce,
            ),
            TopicFilter::new_with_qos(
                Topic::DeviceTopic(DeviceTopic::new(
                    &self.group_id,
                    DeviceMessageType::DCmd,
                    &self.node_id,
                    "+",
                )),
                QoS::AtLeastOnce,
            ),
            TopicFilter::new_with_qos(Topic::State(StateTopic::new()), QoS::AtLeastOnce),
        ]
    }
}

#[derive(Debug)]
struct NodeShutdown;

/// A handle for interacting with the Edge Node.
///
/// `NodeHandle` provides an interface for interacting with an edge
/// node, including device management, node lifecycle operations and
/// metric publishing. Publishing while the broker is unreachable lands
/// in the store-and-forward queue instead of being dropped.
#[derive(Clone)]
pub struct NodeHandle {
    state: Arc<NodeState>,
    client: Arc<DynClient>,
    devices: Arc<DeviceMap>,
    queue: Arc<StoreForwardQueue>,
    backpressure: Arc<BackpressureController>,
    stop_tx: mpsc::Sender<NodeShutdown>,
    rebirth_tx: mpsc::Sender<()>,
}

impl NodeHandle {
    /// Stop all operations, sending a death certificate and disconnecting from the broker.
    ///
    /// New enqueues into the store-and-forward queue are rejected from
    /// this point; the death publish is best-effort and bounded.
    ///
    /// This will cancel [EdgeNode::run()]
    pub async fn cancel(&self) {
        if !self.state.running.load(Ordering::SeqCst) {
            return;
        }
        info!("Edge node stopping. Node = {}", self.state.node_id);
        self.queue.close();
        let topic = NodeTopic::new(
            &self.state.group_id,
            NodeMessageType::NDeath,
            &self.state.node_id,
        );
        let payload = self.state.generate_death_payload();
        match self.client.try_publish_node_message(topic, payload).await {
            Ok(_) => (),
            Err(_) => debug!("Unable to publish node death certificate on exit"),
        };
        _ = self.stop_tx.send(NodeShutdown).await;
        _ = self.client.disconnect().await;
    }

    /// Manually trigger a rebirth for the node
    pub fn rebirth(&self) {
        //try send, if the channel (size 1) is full then a rebirth will be executed anyways
        _ = self.rebirth_tx.try_send(());
    }

    /// Registers a new device with the node.
    ///
    /// Returns an error if:
    ///   - A device with the same name is already registered
    ///   - The device name is invalid
    pub async fn register_device<S, M>(
        &self,
        name: S,
        dev_impl: M,
    ) -> Result<crate::DeviceHandle, DeviceRegistrationError>
    where
        S: Into<String>,
        M: crate::DeviceMetricManager + Send + Sync + 'static,
    {
        let name = name.into();
        if let Err(e) = forgelink_types::utils::validate_name(&name) {
            return Err(DeviceRegistrationError::InvalidName(e));
        }
        let dev_impl: Arc<DynDeviceMetricManager> = Arc::new(dev_impl);
        self.devices.add_device(name, dev_impl).await
    }

    /// Unregister a device using its handle.
    pub async fn unregister_device(&self, handle: crate::DeviceHandle) {
        self.unregister_device_named(&handle.device.info.name.to_string())
            .await;
    }

    /// Unregister a device using its name.
    pub async fn unregister_device_named(&self, name: &String) {
        self.devices.remove_device(name).await
    }

    /// The backpressure signal derived from the store-and-forward
    /// queue depth. Samplers read this to adapt their rate.
    pub fn backpressure(&self) -> Arc<BackpressureController> {
        self.backpressure.clone()
    }

    /// Current store-and-forward queue depth.
    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    fn publish_metrics_to_payload(&self, metrics: Vec<PublishMetric>) -> Payload {
        let timestamp = timestamp();
        let mut payload_metrics = Vec::with_capacity(metrics.len());
        for x in metrics.into_iter() {
            payload_metrics.push(x.into());
        }
        Payload {
            timestamp: Some(timestamp),
            metrics: payload_metrics,
            seq: Some(self.state.next_seq()),
        }
    }

    async fn publish_or_enqueue(&self, payload: Payload) -> Result<Delivery, PublishError> {
        if self.state.is_online() && self.state.birthed() {
            if self
                .client
                .try_publish_node_message(self.state.ndata_topic.clone(), payload.clone())
                .await
                .is_ok()
            {
                return Ok(Delivery::Sent);
            }
        }

        let (qos, _) = self.state.ndata_topic.get_publish_quality_retain();
        match self.queue.enqueue(QueuedMessage {
            topic: QueuedTopic::Node(self.state.ndata_topic.topic.clone()),
            payload: payload.into(),
            qos,
            enqueued_at: timestamp(),
        }) {
            Ok(()) => Ok(Delivery::Queued),
            Err(_) => Err(PublishError::State(crate::StateError::Offline)),
        }
    }
}

impl MetricPublisher for NodeHandle {
    async fn try_publish_metrics_unsorted(
        &self,
        metrics: Vec<PublishMetric>,
    ) -> Result<Delivery, PublishError> {
        if metrics.is_empty() {
            return Err(PublishError::NoMetrics);
        }
        let payload = self.publish_metrics_to_payload(metrics);
        self.publish_or_enqueue(payload).await
    }

    async fn publish_metrics_unsorted(
        &self,
        metrics: Vec<PublishMetric>,
    ) -> Result<Delivery, PublishError> {
        self.try_publish_metrics_unsorted(metrics).await
    }
}

struct Node {
    metric_manager: Arc<DynNodeMetricManager>,
    client: Arc<DynClient>,
    devices: Arc<DeviceMap>,
    state: Arc<NodeState>,
    config: Arc<NodeConfig>,
    queue: Arc<StoreForwardQueue>,
    backpressure: Arc<BackpressureController>,
    stop_tx: mpsc::Sender<NodeShutdown>,
    last_node_rebirth_request: Duration,

    rebirth_request_tx: mpsc::Sender<()>,

    node_message_rx: mpsc::UnboundedReceiver<Message>,
    client_state_rx: mpsc::Receiver<ClientStateMessage>,
    rebirth_request_rx: mpsc::Receiver<()>,
}

impl Node {
    fn generate_birth_payload(&self, bdseq: i64) -> Payload {
        let timestamp = timestamp();
        let mut birth_initializer = BirthInitializer::new(BirthObjectType::Node);
        birth_initializer
            .register_metric(
                BirthMetricDetails::new_with_initial_value(constants::BDSEQ, bdseq).use_alias(false),
            )
            .unwrap();
        birth_initializer
            .register_metric(
                BirthMetricDetails::new_with_initial_value(constants::NODE_CONTROL_REBIRTH, false)
                    .use_alias(false),
            )
            .unwrap();

        self.metric_manager.initialize_birth(&mut birth_initializer);
        let metrics = birth_initializer.finish();

        /* the birth certificate always carries sequence number 0 */
        Payload {
            seq: Some(0),
            timestamp: Some(timestamp),
            metrics,
        }
    }

    async fn node_birth(&mut self) -> Result<(), ()> {
        self.state.start_birth();

        let bdseq = self.state.bdseq.load(Ordering::SeqCst) as i64;
        let payload = self.generate_birth_payload(bdseq);
        let topic = self.state.birth_topic();
        match self.client.publish_node_message(topic, payload).await {
            Ok(_) => {
                self.state.birth_completed();
                Ok(())
            }
            Err(_) => {
                error!(
                    "Publishing node birth message failed. node={}",
                    self.state.node_id
                );
                Err(())
            }
        }
    }

    async fn birth(&mut self, birth_type: BirthType) {
        info!(
            "Birthing Node. node={} type={birth_type:?}",
            self.state.node_id
        );
        if self.node_birth().await.is_err() {
            return;
        }
        self.devices.birth_devices(birth_type).await;
        self.replay_queue().await;
    }

    /// Drain the store-and-forward queue after a (re)birth, strictly
    /// in enqueue order. Replay halts on the first transport failure;
    /// the failed message stays at the front for the next reconnect.
    async fn replay_queue(&mut self) {
        if self.queue.depth() == 0 {
            return;
        }
        let client = self.client.clone();
        let outcome = self
            .queue
            .replay(|msg| {
                let client = client.clone();
                async move {
                    let payload = match Payload::decode(msg.payload.as_slice()) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!("Discarding corrupt queued payload during replay: {e}");
                            return Ok(());
                        }
                    };
                    let result = match &msg.topic {
                        QueuedTopic::Node(topic) => {
                            let topic = NodeTopic {
                                topic: topic.clone(),
                                message_type: NodeMessageType::NData,
                            };
                            client.publish_node_message(topic, payload).await
                        }
                        QueuedTopic::Device(topic) => {
                            let topic = DeviceTopic {
                                topic: topic.clone(),
                                message_type: DeviceMessageType::DData,
                            };
                            client.publish_device_message(topic, payload).await
                        }
                    };
                    match result {
                        Ok(()) => Ok(()),
                        Err(()) => Err(msg),
                    }
                }
            })
            .await;
        if outcome.halted {
            warn!(
                "Store-and-forward replay halted after {} messages - transport reported disconnection",
                outcome.replayed
            );
        } else if outcome.replayed > 0 {
            info!("Store-and-forward replay delivered {} messages", outcome.replayed);
        }
    }

    async fn rebirth(&mut self) {
        if !self.state.birthed() {
            return;
        }
        self.birth(BirthType::Rebirth).await;
    }

    async fn death(&self) {
        self.state.set_dead();
        self.state.bdseq.fetch_add(1, Ordering::SeqCst);
        self.devices.on_death().await;
    }

    async fn on_online(&mut self) {
        if self.state.online_swap(true) {
            return;
        }

        info!("Edge node online. Node = {}", self.state.node_id);
        let sub_topics = self.state.sub_topics();

        if self.client.subscribe_many(sub_topics).await.is_ok() {
            self.birth(BirthType::Birth).await
        };
    }

    async fn on_offline(&mut self, will_sender: oneshot::Sender<LastWill>) {
        if !self.state.online_swap(false) {
            return;
        }

        info!("Edge node offline. Node = {}", self.state.node_id);
        self.death().await;
        let new_lastwill = self.state.create_last_will();
        _ = will_sender.send(new_lastwill);
    }

    async fn on_node_message(&mut self, message: Message, handle: NodeHandle) {
        let payload = message.payload;
        let message_kind = message.kind;

        if message_kind == MessageKind::Cmd {
            let mut rebirth = false;
            for x in &payload.metrics {
                if x.alias.is_some() {
                    continue;
                }

                let metric_name = match &x.name {
                    Some(name) => name,
                    None => continue,
                };

                if metric_name != NODE_CONTROL_REBIRTH {
                    continue;
                }

                rebirth = match &x.value {
                    Some(Value::BooleanValue(val)) => *val,
                    _ => false,
                };

                if !rebirth {
                    warn!("Received invalid CMD Rebirth metric - ignoring request")
                }
            }

            let message_metrics: MessageMetrics = match payload.try_into() {
                Ok(metrics) => metrics,
                Err(_) => {
                    warn!("Received invalid CMD payload - ignoring request");
                    return;
                }
            };

            self.metric_manager.on_ncmd(handle, message_metrics).await;
            if rebirth {
                let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
                let time_since_last = now - self.last_node_rebirth_request;
                if time_since_last < self.config.node_rebirth_request_cooldown {
                    info!("Got Rebirth CMD but cooldown time not expired. Ignoring");
                    return;
                }
                info!("Got Rebirth CMD - Rebirthing Node");
                self.rebirth().await;
                self.last_node_rebirth_request = now;
            }
        }
    }

    fn create_node_handle(&self) -> NodeHandle {
        NodeHandle {
            state: self.state.clone(),
            client: self.client.clone(),
            devices: self.devices.clone(),
            queue: self.queue.clone(),
            backpressure: self.backpressure.clone(),
            stop_tx: self.stop_tx.clone(),
            rebirth_tx: self.rebirth_request_tx.clone(),
        }
    }

    async fn run(mut self) {
        loop {
            select! {
                biased;
                maybe_state_update = self.client_state_rx.recv() => match maybe_state_update {
                    Some (state_update) => match state_update {
                        ClientStateMessage::Online => self.on_online().await,
                        ClientStateMessage::Offline(sender) => self.on_offline(sender).await,
                        ClientStateMessage::Stopped => break
                    },
                    None => break, //EdgeNode has been dropped
                },
                Some(_) = self.rebirth_request_rx.recv() => self.rebirth().await,
                maybe_message = self.node_message_rx.recv() => match maybe_message {
                    Some(message) => self.on_node_message(message, self.create_node_handle()).await,
                    None => break, //EdgeNode has been dropped
                },
            }
        }
    }
}

enum ClientStateMessage {
    Stopped,
    Online,
    Offline(oneshot::Sender<LastWill>),
}

/// Structure that represents an Edge Node instance.
///
/// See [EdgeNodeBuilder] on how to create an [EdgeNode] instance.
pub struct EdgeNode {
    eventloop: Box<DynEventLoop>,
    stop_rx: mpsc::Receiver<NodeShutdown>,
    node_message_tx: mpsc::UnboundedSender<Message>,
    client_state_tx: mpsc::Sender<ClientStateMessage>,
    state: Arc<NodeState>,
    devices: Arc<DeviceMap>,
    monitor_task: tokio::task::AbortHandle,
}

impl EdgeNode {
    pub(crate) fn new_from_builder(
        builder: EdgeNodeBuilder,
    ) -> Result<(Self, NodeHandle), String> {
        let group_id = builder
            .group_id
            .ok_or("group id must be provided".to_string())?;
        let node_id = builder
            .node_id
            .ok_or("node id must be provided".to_string())?;
        forgelink_types::utils::validate_name(&group_id)?;
        forgelink_types::utils::validate_name(&node_id)?;

        let metric_manager = builder.metric_manager;
        let (eventloop, client) = builder.eventloop_client;
        let (stop_tx, stop_rx) = mpsc::channel(1);

        let state = Arc::new(NodeState {
            running: AtomicBool::new(false),
            bdseq: AtomicU8::new(0),
            inner: Mutex::new(NodeStateInner {
                seq: 0,
                online: false,
                birthed: false,
            }),
            ndata_topic: NodeTopic::new(&group_id, NodeMessageType::NData, &node_id),
            group_id,
            node_id,
        });

        let queue = Arc::new(StoreForwardQueue::new(
            builder.queue_capacity,
            builder.queue_journal_path,
        ));
        let backpressure = Arc::new(BackpressureController::new(builder.backpressure_config));

        let devices = Arc::new(DeviceMap::new(
            state.clone(),
            client.clone(),
            queue.clone(),
        ));

        let (node_message_tx, node_message_rx) = mpsc::unbounded_channel();
        let (rebirth_request_tx, rebirth_request_rx) = mpsc::channel(1);
        let (client_state_tx, client_state_rx) = mpsc::channel(1);

        /* the backpressure monitor runs as its own task so the signal
         * keeps updating while the node task is birthing or replaying */
        let monitor_queue = queue.clone();
        let monitor_controller = backpressure.clone();
        let monitor_tick = builder.backpressure_tick;
        let monitor_task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(monitor_tick);
            loop {
                tick.tick().await;
                monitor_controller.observe(monitor_queue.depth());
            }
        })
        .abort_handle();

        let node = Node {
            metric_manager,
            client: client.clone(),
            state: state.clone(),
            devices: devices.clone(),
            queue,
            backpressure,
            stop_tx,
            config: Arc::new(NodeConfig {
                node_rebirth_request_cooldown: builder.node_rebirth_request_cooldown,
            }),
            last_node_rebirth_request: Duration::new(0, 0),
            node_message_rx,
            rebirth_request_rx,
            rebirth_request_tx,
            client_state_rx,
        };

        let edge_node = Self {
            eventloop,
            stop_rx,
            node_message_tx,
            client_state_tx,
            state,
            devices,
            monitor_task,
        };

        let handle = node.create_node_handle();

        node.metric_manager.init(&handle);

        tokio::spawn(async move { node.run().await });

        Ok((edge_node, handle))
    }

    fn update_last_will(&mut self, lastwill: LastWill) {
        self.eventloop.set_last_will(lastwill);
    }

    async fn on_online(&mut self) {
        _ = self.client_state_tx.send(ClientStateMessage::Online).await;
    }

    async fn on_offline(&mut self) {
        let (lastwill_tx, lastwill_rx) = oneshot::channel();
        _ = self
            .client_state_tx
            .send(ClientStateMessage::Offline(lastwill_tx))
            .await;
        if let Ok(will) = lastwill_rx.await {
            self.update_last_will(will)
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Online => self.on_online().await,
            Event::Offline => self.on_offline().await,
            Event::Node(node_message) => {
                _ = self.node_message_tx.send(node_message.message);
            }
            Event::Device(device_message) => {
                self.devices.handle_device_message(device_message).await;
            }
            Event::State {
                host_id: _,
                payload: _,
            } => (),
            Event::InvalidPublish {
                reason: _,
                topic: _,
                payload: _,
            } => (),
        }
    }

    async fn poll_until_offline(&mut self) -> bool {
        while self.state.is_online() {
            if Event::Offline == self.eventloop.poll().await {
                self.on_offline().await;
                break;
            }
        }
        true
    }

    /// Run the Edge Node
    ///
    /// Runs the Edge Node until [NodeHandle::cancel()] is called
    pub async fn run(mut self) {
        info!("Edge node running. Node = {}", self.state.node_id);
        self.state.running.store(true, Ordering::SeqCst);

        self.update_last_will(self.state.create_last_will());

        loop {
            select! {
              event = self.eventloop.poll() => self.handle_event(event).await,
              Some(_) = self.stop_rx.recv() => break,
            }
        }

        /* in-flight messages get a bounded window to flush; message
         * integrity beats shutdown latency */
        if timeout(Duration::from_secs(1), self.poll_until_offline())
            .await
            .is_err()
        {
            self.on_offline().await;
        }

        _ = self.client_state_tx.send(ClientStateMessage::Stopped).await;
        self.monitor_task.abort();
        info!("Edge node stopped. Node = {}", self.state.node_id);
        self.state.running.store(false, Ordering::SeqCst);
    }
}
