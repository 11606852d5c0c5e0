use std::{path::PathBuf, sync::Arc, time::Duration};

use forgelink_client::{Client, DynClient, DynEventLoop, EventLoop};

use crate::{
    backpressure::BackpressureConfig,
    metric_manager::{DynNodeMetricManager, NoMetricManager, NodeMetricManager},
    EdgeNode, NodeHandle,
};

/// A builder for creating and configuring [EdgeNode] instances.
pub struct EdgeNodeBuilder {
    pub(crate) group_id: Option<String>,
    pub(crate) node_id: Option<String>,
    pub(crate) eventloop_client: (Box<DynEventLoop>, Arc<DynClient>),
    pub(crate) metric_manager: Arc<DynNodeMetricManager>,
    pub(crate) node_rebirth_request_cooldown: Duration,
    pub(crate) queue_capacity: usize,
    pub(crate) queue_journal_path: Option<PathBuf>,
    pub(crate) backpressure_config: BackpressureConfig,
    pub(crate) backpressure_tick: Duration,
}

impl EdgeNodeBuilder {
    /// Creates a new builder with the specified event loop and client.
    ///
    /// Initializes a builder with default values and a no-op metric manager.
    pub fn new<E: EventLoop + Send + 'static, C: Client + Send + Sync + 'static>(
        eventloop: E,
        client: C,
    ) -> Self {
        Self {
            group_id: None,
            node_id: None,
            eventloop_client: (Box::new(eventloop), Arc::new(client)),
            metric_manager: Arc::new(NoMetricManager::new()),
            node_rebirth_request_cooldown: Duration::from_secs(5),
            queue_capacity: 1024,
            queue_journal_path: None,
            backpressure_config: BackpressureConfig::default(),
            backpressure_tick: Duration::from_secs(1),
        }
    }

    /// Sets the group ID for the edge node.
    ///
    /// The group ID identifies the group to which this node belongs.
    pub fn with_group_id<S: Into<String>>(mut self, group_id: S) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Sets the node ID for the edge node.
    ///
    /// The node ID uniquely identifies this node within its group.
    pub fn with_node_id<S: Into<String>>(mut self, node_id: S) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Sets a custom metric manager for the edge node.
    ///
    /// Replaces the default no-op metric manager with the provided implementation.
    pub fn with_metric_manager<M: NodeMetricManager + Send + Sync + 'static>(
        mut self,
        metric_manager: M,
    ) -> Self {
        self.metric_manager = Arc::new(metric_manager);
        self
    }

    /// Minimum time between servicing two rebirth CMD requests.
    pub fn with_rebirth_request_cooldown(mut self, cooldown: Duration) -> Self {
        self.node_rebirth_request_cooldown = cooldown;
        self
    }

    /// Capacity of the store-and-forward queue. At capacity, the
    /// oldest queued message is dropped to admit a new one.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Journal file backing the store-and-forward queue. Without one
    /// the queue is memory-only and does not survive a restart.
    pub fn with_queue_journal<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.queue_journal_path = Some(path.into());
        self
    }

    /// Backpressure thresholds applied to the queue depth.
    pub fn with_backpressure_config(mut self, config: BackpressureConfig) -> Self {
        self.backpressure_config = config;
        self
    }

    /// How often the backpressure monitor samples the queue depth.
    pub fn with_backpressure_tick(mut self, tick: Duration) -> Self {
        self.backpressure_tick = tick;
        self
    }

    /// Builds the [EdgeNode] instance with the configured settings.
    ///
    /// Creates and returns a new [EdgeNode] instance and its associated [NodeHandle].
    /// This method will return an error if required configuration is missing
    /// or if there are other issues with the configuration.
    pub fn build(self) -> Result<(EdgeNode, NodeHandle), String> {
        EdgeNode::new_from_builder(self)
    }
}
