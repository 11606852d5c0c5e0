pub use forgelink_app as app;
pub use forgelink_edge as edge;
pub use forgelink_types as types;
pub mod client {
    pub use forgelink_client::*;

    pub mod mqtt_client {
        pub use forgelink_client_rumqtt as rumqtt;
    }
}
