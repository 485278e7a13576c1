//! WebSocket echo server on port 8081.
//!
//! Upgrade with any WebSocket client, e.g. `websocat ws://127.0.0.1:8081/`.
//! Plain HTTP requests get a short hint instead.

use http::StatusCode;
use micro_server::http::{HttpProtocol, Request, Responder, text_response};
use micro_server::ws::{EchoHandler, WsProtocol};
use micro_server::{LogConfig, Server, ServerConfig};
use tokio::task::LocalSet;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = LogConfig::default().install_global() {
        eprintln!("{e}");
        return;
    }

    let protocol = HttpProtocol::builder()
        .handler_fn(|_request: Request, responder: Responder| {
            responder.send(text_response(StatusCode::OK, "connect with a websocket client\n"))?;
            Ok(())
        })
        .websocket(WsProtocol::new(EchoHandler))
        .build();

    let server = protocol.and_then(|protocol| {
        let config = ServerConfig::builder().address(([127, 0, 0, 1], 8081)).build()?;
        Server::builder().config(config).protocol(protocol).build()
    });
    let server = match server {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "invalid server setup");
            return;
        }
    };

    let stop = server.stop_handle();
    LocalSet::new()
        .run_until(async move {
            tokio::task::spawn_local(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("ctrl-c received");
                    stop.stop();
                }
            });
            if let Err(e) = server.serve().await {
                error!(cause = %e, "server failed");
            }
        })
        .await;
}
