//! Accepts MQTT clients on port 1883 and keeps them alive.
//!
//! Only CONNECT, PINGREQ and DISCONNECT are understood; other packets are
//! read and dropped. Useful for checking that a client gets past its
//! handshake, e.g. `mosquitto_sub -h 127.0.0.1 -t test`.

use micro_server::mqtt::MqttProtocol;
use micro_server::{LogConfig, Server, ServerConfig};
use std::time::Duration;
use tracing::Level;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    LogConfig::new(Level::DEBUG).install_global()?;

    let config = ServerConfig::builder().address(([127, 0, 0, 1], 1883)).idle_timeout(Duration::from_secs(90)).build()?;
    let server = Server::builder()
        .config(config)
        .protocol(MqttProtocol::new())
        .on_conn_init(|ctx| tracing::info!(conn_id = %ctx.id(), "client connected"))
        .build()?;
    server.run()?;
    Ok(())
}
