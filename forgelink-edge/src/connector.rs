use std::collections::HashMap;

use async_trait::async_trait;
use forgelink_types::{payload::DataType, MetricValue, Quality};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Tag read failed: {0}")]
    Read(String),
    #[error("No connector registered for protocol '{0}'")]
    UnknownProtocol(String),
}

/// One raw value read from a field controller.
#[derive(Debug, Clone)]
pub struct DataPoint {
    pub address: String,
    pub value: Option<MetricValue>,
    pub datatype: DataType,
    pub quality: Quality,
    pub timestamp: u64,
    pub error: Option<String>,
}

/// Connection settings handed to a connector constructor. The core
/// does not interpret `params`; protocol-specific settings (rack/slot,
/// unit ids, byte order) live behind this boundary.
#[derive(Debug, Clone, Default)]
pub struct ConnectorConfig {
    pub endpoint: String,
    pub params: HashMap<String, String>,
}

/// The uniform contract every field-protocol driver implements.
///
/// The gateway core treats all connectors identically; binary layouts
/// and addressing syntax are entirely the driver's concern.
#[async_trait]
pub trait Connector {
    async fn connect(&mut self) -> Result<(), ConnectorError>;
    async fn read_tags(&mut self, addresses: &[String]) -> Result<Vec<DataPoint>, ConnectorError>;
    async fn disconnect(&mut self);
}

pub type DynConnector = dyn Connector + Send;

type ConnectorFactory = Box<dyn Fn(&ConnectorConfig) -> Box<DynConnector> + Send + Sync>;

/// Maps a protocol identifier to a connector constructor so new field
/// protocols can be added without modifying the core.
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<S, F>(&mut self, protocol: S, factory: F)
    where
        S: Into<String>,
        F: Fn(&ConnectorConfig) -> Box<DynConnector> + Send + Sync + 'static,
    {
        self.factories.insert(protocol.into(), Box::new(factory));
    }

    pub fn create(
        &self,
        protocol: &str,
        config: &ConnectorConfig,
    ) -> Result<Box<DynConnector>, ConnectorError> {
        match self.factories.get(protocol) {
            Some(factory) => Ok(factory(config)),
            None => Err(ConnectorError::UnknownProtocol(protocol.into())),
        }
    }

    pub fn protocols(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgelink_types::utils::timestamp;

    struct StaticConnector {
        endpoint: String,
    }

    #[async_trait]
    impl Connector for StaticConnector {
        async fn connect(&mut self) -> Result<(), ConnectorError> {
            if self.endpoint.is_empty() {
                return Err(ConnectorError::Connect("no endpoint".into()));
            }
            Ok(())
        }

        async fn read_tags(
            &mut self,
            addresses: &[String],
        ) -> Result<Vec<DataPoint>, ConnectorError> {
            Ok(addresses
                .iter()
                .map(|address| DataPoint {
                    address: address.clone(),
                    value: Some(MetricValue::from(1.0f64)),
                    datatype: DataType::Double,
                    quality: Quality::GOOD,
                    timestamp: timestamp(),
                    error: None,
                })
                .collect())
        }

        async fn disconnect(&mut self) {}
    }

    #[tokio::test]
    async fn registry_dispatches_by_protocol() {
        let mut registry = ConnectorRegistry::new();
        registry.register("static", |config: &ConnectorConfig| {
            Box::new(StaticConnector {
                endpoint: config.endpoint.clone(),
            }) as Box<DynConnector>
        });

        let config = ConnectorConfig {
            endpoint: "10.0.0.7:502".into(),
            params: HashMap::new(),
        };
        let mut connector = registry.create("static", &config).unwrap();
        connector.connect().await.unwrap();
        let points = connector
            .read_tags(&["Line 1/Counter/Good".to_string()])
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert!(points[0].quality.is_good());

        assert!(matches!(
            registry.create("opc-ua", &config),
            Err(ConnectorError::UnknownProtocol(_))
        ));
    }
}
