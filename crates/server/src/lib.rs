//! A single threaded socket server multiplexing HTTP/1.1, WebSocket and
//! MQTT over one reactor.
//!
//! Every connection is bound to one protocol at a time. A protocol consumes
//! raw input from the shared receive buffer, queues output as a chain of
//! buffers sent with vectored writes, and may hand the connection over to
//! another protocol, which is how an HTTP request upgrades to WebSocket.
//!
//! - [`Server`]: listener, accept loop, graceful stop
//! - [`Protocol`] / [`AnyProtocol`]: the contract each protocol implements
//! - [`http`], [`ws`], [`mqtt`]: the protocols
//! - [`ConnHandle`]: lets worker threads answer on a connection
//!
//! # Example
//!
//! ```no_run
//! use micro_server::ws::{EchoHandler, WsProtocol};
//! use micro_server::http::{HttpProtocol, Request, Responder, text_response};
//! use micro_server::{LogConfig, Server, ServerConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     LogConfig::default().install_global()?;
//!
//!     let protocol = HttpProtocol::builder()
//!         .handler_fn(|_request: Request, responder: Responder| {
//!             responder.send(text_response(::http::StatusCode::OK, "hello"))?;
//!             Ok(())
//!         })
//!         .websocket(WsProtocol::new(EchoHandler))
//!         .build()?;
//!
//!     let config = ServerConfig::builder().address(([127, 0, 0, 1], 8080)).build()?;
//!     Server::builder().config(config).protocol(protocol).build()?.run()?;
//!     Ok(())
//! }
//! ```

mod bucket;
mod connection;
mod error;
mod logging;
mod net;
mod protocol;
mod server;
mod utils;

pub mod http;
pub mod mqtt;
pub mod ws;

pub use bucket::{Bucket, BucketChain};
pub use connection::{ConnCtx, ConnGuard, ConnHandle, Deferred};
pub use error::{HandlerError, MqttError, ProtocolError, ServerError, SessionSendError, TryLockError};
pub use logging::{LogConfig, LogGuard};
pub use net::{Readiness, SendStatus, Transport, send_chain};
pub use protocol::{AnyProtocol, Protocol, WriteStatus};
pub use server::{
    ConnHook, DEFAULT_IDLE_TIMEOUT, DEFAULT_LISTEN_BACKLOG, DEFAULT_MAX_IOVEC, DEFAULT_PORT, DEFAULT_RECV_BUFFER_SIZE,
    IDLE_TIMEOUT_ENV, Server, ServerBuilder, ServerConfig, ServerConfigBuilder, ServerState, StopHandle,
    parse_idle_timeout,
};
