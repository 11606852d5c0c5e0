use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use futures::future::join_all;
use forgelink_client::{DeviceMessage, DynClient, MessageKind};
use forgelink_types::{
    payload::Payload,
    topic::{DeviceMessage as DeviceMessageType, DeviceTopic},
    utils::timestamp,
};
use log::{error, warn};

use crate::{
    birth::{BirthInitializer, BirthObjectType},
    error::DeviceRegistrationError,
    metric::{Delivery, MetricPublisher, PublishError, PublishMetric},
    metric_manager::DynDeviceMetricManager,
    node::NodeState,
    registry::{DeviceId, Registry},
    store_forward::{QueuedMessage, QueuedTopic, StoreForwardQueue},
    BirthType, StateError,
};

pub(crate) struct DeviceInfo {
    id: DeviceId,
    pub(crate) name: Arc<String>,
    ddata_topic: DeviceTopic,
}

/// A handle for interacting with a registered device.
#[derive(Clone)]
pub struct DeviceHandle {
    pub(crate) device: Arc<Device>,
}

impl DeviceHandle {
    /// Enable the device, publishing its birth certificate if the node
    /// session is currently birthed.
    pub async fn enable(&self) {
        self.device.enabled.store(true, Ordering::SeqCst);
        self.device.birth(&BirthType::Birth).await;
    }

    /// Manually trigger a rebirth for the device.
    pub async fn rebirth(&self) {
        self.device.enabled.store(true, Ordering::SeqCst);
        self.device.birth(&BirthType::Rebirth).await;
    }

    /// Disable the device, publishing its death certificate.
    pub async fn disable(&self) {
        if !self.device.enabled.swap(false, Ordering::SeqCst) {
            //already disabled
            return;
        }
        self.device.death(true).await;
    }

    pub fn name(&self) -> &str {
        &self.device.info.name
    }
}

impl MetricPublisher for DeviceHandle {
    async fn try_publish_metrics_unsorted(
        &self,
        metrics: Vec<PublishMetric>,
    ) -> Result<Delivery, PublishError> {
        self.device.publish_metrics(metrics).await
    }

    async fn publish_metrics_unsorted(
        &self,
        metrics: Vec<PublishMetric>,
    ) -> Result<Delivery, PublishError> {
        self.device.publish_metrics(metrics).await
    }
}

pub(crate) struct Device {
    pub(crate) info: DeviceInfo,
    birthed: AtomicBool,
    birth_lock: tokio::sync::Mutex<()>,
    enabled: AtomicBool,
    node_state: Arc<NodeState>,
    pub(crate) dev_impl: Arc<DynDeviceMetricManager>,
    client: Arc<DynClient>,
    queue: Arc<StoreForwardQueue>,
}

impl Device {
    fn generate_birth_payload(&self) -> Payload {
        let mut birth_initializer = BirthInitializer::new(BirthObjectType::Device(self.info.id));
        self.dev_impl.initialize_birth(&mut birth_initializer);
        Payload {
            seq: Some(self.node_state.next_seq()),
            timestamp: Some(timestamp()),
            metrics: birth_initializer.finish(),
        }
    }

    fn generate_death_payload(&self) -> Payload {
        Payload {
            seq: Some(self.node_state.next_seq()),
            timestamp: Some(timestamp()),
            metrics: Vec::new(),
        }
    }

    async fn publish_metrics(&self, metrics: Vec<PublishMetric>) -> Result<Delivery, PublishError> {
        if metrics.is_empty() {
            return Err(PublishError::NoMetrics);
        }
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(PublishError::State(StateError::UnBirthed));
        }

        let mut payload_metrics = Vec::with_capacity(metrics.len());
        for x in metrics.into_iter() {
            payload_metrics.push(x.into());
        }
        let payload = Payload {
            timestamp: Some(timestamp()),
            metrics: payload_metrics,
            seq: Some(self.node_state.next_seq()),
        };

        if self.node_state.is_online() && self.birthed.load(Ordering::SeqCst) {
            let topic = self.info.ddata_topic.clone();
            if self
                .client
                .try_publish_device_message(topic, payload.clone())
                .await
                .is_ok()
            {
                return Ok(Delivery::Sent);
            }
        }

        let (qos, _) = self.info.ddata_topic.get_publish_quality_retain();
        if self
            .queue
            .enqueue(QueuedMessage {
                topic: QueuedTopic::Device(self.info.ddata_topic.topic.clone()),
                payload: payload.into(),
                qos,
                enqueued_at: timestamp(),
            })
            .is_err()
        {
            return Err(PublishError::State(StateError::Offline));
        }
        Ok(Delivery::Queued)
    }

    pub(crate) async fn death(&self, publish: bool) {
        let guard = self.birth_lock.lock().await;
        if !self.birthed.load(Ordering::SeqCst) {
            return;
        }
        if publish && self.node_state.is_online() {
            let payload = self.generate_death_payload();
            let topic = DeviceTopic::new(
                &self.node_state.group_id,
                DeviceMessageType::DDeath,
                &self.node_state.node_id,
                &self.info.name,
            );
            if self.client.publish_device_message(topic, payload).await.is_err() {
                warn!(
                    "Publishing device death certificate failed. device={}",
                    self.info.name
                );
            }
        }
        self.birthed.store(false, Ordering::SeqCst);
        drop(guard)
    }

    pub(crate) async fn birth(&self, birth_type: &BirthType) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }
        let guard = self.birth_lock.lock().await;
        if !self.node_state.birthed() {
            return;
        }
        if *birth_type == BirthType::Birth && self.birthed.load(Ordering::SeqCst) {
            return;
        }
        let payload = self.generate_birth_payload();
        let topic = DeviceTopic::new(
            &self.node_state.group_id,
            DeviceMessageType::DBirth,
            &self.node_state.node_id,
            &self.info.name,
        );
        match self.client.publish_device_message(topic, payload).await {
            Ok(_) => self.birthed.store(true, Ordering::SeqCst),
            Err(_) => error!(
                "Publishing device birth certificate failed. device={}",
                self.info.name
            ),
        }
        drop(guard)
    }
}

pub(crate) struct DeviceMap {
    client: Arc<DynClient>,
    state: tokio::sync::Mutex<HashMap<Arc<String>, Arc<Device>>>,
    node_state: Arc<NodeState>,
    queue: Arc<StoreForwardQueue>,
    registry: Mutex<Registry>,
}

impl DeviceMap {
    pub fn new(
        node_state: Arc<NodeState>,
        client: Arc<DynClient>,
        queue: Arc<StoreForwardQueue>,
    ) -> Self {
        Self {
            node_state,
            client,
            queue,
            registry: Mutex::new(Registry::new()),
            state: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub async fn add_device(
        &self,
        name: String,
        dev_impl: Arc<DynDeviceMetricManager>,
    ) -> Result<DeviceHandle, DeviceRegistrationError> {
        let mut state = self.state.lock().await;
        if state.contains_key(&name) {
            return Err(DeviceRegistrationError::DuplicateDevice);
        }

        let name = Arc::new(name);
        let id = self
            .registry
            .lock()
            .unwrap()
            .generate_device_id(name.clone());

        let ddata_topic = DeviceTopic::new(
            &self.node_state.group_id,
            DeviceMessageType::DData,
            &self.node_state.node_id,
            &name,
        );

        let device = Arc::new(Device {
            info: DeviceInfo {
                id,
                name: name.clone(),
                ddata_topic,
            },
            birth_lock: tokio::sync::Mutex::new(()),
            birthed: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            node_state: self.node_state.clone(),
            dev_impl,
            client: self.client.clone(),
            queue: self.queue.clone(),
        });
        let handle = DeviceHandle {
            device: device.clone(),
        };
        device.dev_impl.init(&handle);
        state.insert(name, device);
        Ok(handle)
    }

    pub async fn remove_device(&self, name: &String) {
        let device = match self.state.lock().await.remove(name) {
            Some(device) => device,
            None => return,
        };
        self.registry.lock().unwrap().remove_device(device.info.id);
        device.death(true).await;
    }

    pub async fn birth_devices(&self, birth_type: BirthType) {
        let state = self.state.lock().await;
        let futures: Vec<_> = state.values().map(|x| x.birth(&birth_type)).collect();
        join_all(futures).await;
    }

    /// Node-level death: every device is dead by implication, no
    /// per-device certificates go out.
    pub async fn on_death(&self) {
        let state = self.state.lock().await;
        for device in state.values() {
            device.birthed.store(false, Ordering::SeqCst);
        }
    }

    pub async fn handle_device_message(&self, message: DeviceMessage) {
        let device = {
            let state = self.state.lock().await;
            match state.get(&message.device_id) {
                Some(device) => device.clone(),
                None => return,
            }
        };

        let payload = message.message.payload;
        if message.message.kind == MessageKind::Cmd {
            let message_metrics = match payload.try_into() {
                Ok(metrics) => metrics,
                Err(_) => {
                    warn!("Received invalid CMD payload - ignoring request");
                    return;
                }
            };
            device
                .dev_impl
                .on_dcmd(
                    DeviceHandle {
                        device: device.clone(),
                    },
                    message_metrics,
                )
                .await
        }
    }
}
