use std::time::Duration;

/// Reconnect backoff bounds used by the [EventLoop](crate::EventLoop)
/// while the broker is unreachable. The delay starts at `min_delay`
/// and doubles on every failed attempt up to `max_delay`; a successful
/// connection resets it.
#[derive(Debug, Clone)]
pub struct ReconnectOptions {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Connection options for the rumqtt transport.
pub struct MqttOptions {
    pub broker_addr: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub keep_alive: Duration,
    pub reconnect: ReconnectOptions,
}

impl MqttOptions {
    pub fn new<S: Into<String>, S1: Into<String>>(client_id: S, addr: S1, port: u16) -> Self {
        Self {
            broker_addr: addr.into(),
            port,
            client_id: client_id.into(),
            credentials: None,
            keep_alive: Duration::from_secs(30),
            reconnect: ReconnectOptions::default(),
        }
    }

    pub fn with_credentials<S: Into<String>, S1: Into<String>>(
        mut self,
        username: S,
        password: S1,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectOptions) -> Self {
        self.reconnect = reconnect;
        self
    }
}
