use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use forgelink_types::MetricId;
use tokio::{select, sync::watch, time::sleep};

use crate::{
    backpressure::BackpressureController,
    connector::DynConnector,
    metric::{MetricPublisher, PublishMetric},
};

/// Sampling intervals for a [TagSampler]. The sampler runs at
/// `normal_interval` and falls back to `slow_interval` whenever the
/// backpressure signal is engaged.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub normal_interval: Duration,
    pub slow_interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            normal_interval: Duration::from_secs(1),
            slow_interval: Duration::from_secs(10),
        }
    }
}

/// Periodically reads a tag list from a field connector and publishes
/// the values, throttling itself off the backpressure signal.
pub struct TagSampler {
    connector: Box<DynConnector>,
    addresses: Vec<String>,
    config: SamplerConfig,
    backpressure: Arc<BackpressureController>,
}

impl TagSampler {
    pub fn new(
        connector: Box<DynConnector>,
        addresses: Vec<String>,
        config: SamplerConfig,
        backpressure: Arc<BackpressureController>,
    ) -> Self {
        Self {
            connector,
            addresses,
            config,
            backpressure,
        }
    }

    fn interval(&self) -> Duration {
        if self.backpressure.is_engaged() {
            self.config.slow_interval
        } else {
            self.config.normal_interval
        }
    }

    async fn sample<P: MetricPublisher + Send + Sync>(&mut self, publisher: &P) {
        let points = match self.connector.read_tags(&self.addresses).await {
            Ok(points) => points,
            Err(e) => {
                warn!("Tag read failed ({e}) - reconnecting");
                if let Err(e) = self.connector.connect().await {
                    warn!("Connector reconnect failed: {e}");
                }
                return;
            }
        };

        let metrics: Vec<PublishMetric> = points
            .into_iter()
            .filter_map(|point| {
                if let Some(error) = point.error {
                    debug!("Tag read error for {}: {error}", point.address);
                    return None;
                }
                Some(
                    PublishMetric::new_raw(MetricId::Name(point.address), point.value)
                        .timestamp(point.timestamp)
                        .quality(point.quality),
                )
            })
            .collect();

        if metrics.is_empty() {
            return;
        }
        if let Err(e) = publisher.try_publish_metrics_unsorted(metrics).await {
            debug!("Sampler publish failed: {e}");
        }
    }

    /// Run the sampler until `shutdown` flips to true. The connector
    /// is connected on entry and disconnected on the way out.
    pub async fn run<P: MetricPublisher + Send + Sync>(
        mut self,
        publisher: P,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if let Err(e) = self.connector.connect().await {
            warn!("Initial connector connect failed ({e}) - will retry on first sample");
        }
        info!("Tag sampler running over {} addresses", self.addresses.len());

        loop {
            let interval = self.interval();
            select! {
                _ = sleep(interval) => {},
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            self.sample(&publisher).await;
        }

        self.connector.disconnect().await;
        info!("Tag sampler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backpressure::BackpressureConfig;

    fn controller() -> Arc<BackpressureController> {
        Arc::new(BackpressureController::new(BackpressureConfig {
            engage_threshold: 10,
            clear_threshold: 2,
            min_dwell: Duration::ZERO,
        }))
    }

    #[test]
    fn interval_follows_backpressure_signal() {
        struct NullConnector;
        #[async_trait::async_trait]
        impl crate::connector::Connector for NullConnector {
            async fn connect(&mut self) -> Result<(), crate::connector::ConnectorError> {
                Ok(())
            }
            async fn read_tags(
                &mut self,
                _addresses: &[String],
            ) -> Result<Vec<crate::connector::DataPoint>, crate::connector::ConnectorError> {
                Ok(vec![])
            }
            async fn disconnect(&mut self) {}
        }

        let backpressure = controller();
        let sampler = TagSampler::new(
            Box::new(NullConnector),
            vec![],
            SamplerConfig {
                normal_interval: Duration::from_millis(100),
                slow_interval: Duration::from_secs(5),
            },
            backpressure.clone(),
        );

        assert_eq!(sampler.interval(), Duration::from_millis(100));
        backpressure.observe(10);
        assert_eq!(sampler.interval(), Duration::from_secs(5));
        backpressure.observe(2);
        assert_eq!(sampler.interval(), Duration::from_millis(100));
    }
}
