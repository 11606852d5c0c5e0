//! [forgelink_client::Client] and [forgelink_client::EventLoop]
//! implementations on top of [rumqttc]'s MQTT v5 client.

mod client;
mod options;

pub use client::{Client, EventLoop};
pub use options::{MqttOptions, ReconnectOptions};
