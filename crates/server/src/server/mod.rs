//! The reactor.
//!
//! One listener, one current-thread runtime, one task per connection on a
//! [`LocalSet`]. All connections share a single receive buffer, which is
//! sound because only one connection callback ever runs at a time.
//!
//! ```text
//! Created -> Initialized -> Started -> StopGraceful -> Stopped
//! ```
//!
//! A graceful stop closes the listener, lets every connection wind down
//! through its protocol's `stop`, and returns once the last one closed.

mod config;

pub use config::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_LISTEN_BACKLOG, DEFAULT_MAX_IOVEC, DEFAULT_PORT, DEFAULT_RECV_BUFFER_SIZE, IDLE_TIMEOUT_ENV,
    ServerConfig, ServerConfigBuilder, parse_idle_timeout,
};

use crate::connection::{ConnCtx, Connection};
use crate::error::ServerError;
use crate::protocol::AnyProtocol;
use crate::utils::ensure;
use socket2::{Domain, Socket, Type};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// Called with the context of a connection when it opens or closes.
pub type ConnHook = Rc<dyn Fn(&ConnCtx)>;

#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub(crate) on_conn_init: Option<ConnHook>,
    pub(crate) on_conn_cleanup: Option<ConnHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_conn_init", &self.on_conn_init.is_some())
            .field("on_conn_cleanup", &self.on_conn_cleanup.is_some())
            .finish()
    }
}

/// State every connection of a server refers to.
pub(crate) struct Shared {
    /// valid only for the duration of one read callback
    pub(crate) recv_buf: RefCell<Box<[u8]>>,
    pub(crate) idle_timeout: Duration,
    pub(crate) max_iovec: usize,
    pub(crate) stop: CancellationToken,
    /// connections not closed yet
    pub(crate) live: Cell<usize>,
    /// notified when `live` drops to zero
    pub(crate) drained: Notify,
    pub(crate) hooks: Hooks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    /// bound and listening
    Initialized,
    Started,
    StopGraceful,
    Stopped,
}

impl ServerState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Started => "started",
            Self::StopGraceful => "stop_graceful",
            Self::Stopped => "stopped",
        }
    }
}

/// Requests a graceful stop, from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug)]
pub struct ServerBuilder {
    config: Option<ServerConfig>,
    protocol: Option<AnyProtocol>,
    hooks: Hooks,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { config: None, protocol: None, hooks: Hooks::default() }
    }

    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// The protocol every accepted connection starts with.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<AnyProtocol>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    #[must_use]
    pub fn on_conn_init(mut self, hook: impl Fn(&ConnCtx) + 'static) -> Self {
        self.hooks.on_conn_init = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn on_conn_cleanup(mut self, hook: impl Fn(&ConnCtx) + 'static) -> Self {
        self.hooks.on_conn_cleanup = Some(Rc::new(hook));
        self
    }

    /// # Errors
    ///
    /// [`ServerError::InvalidConfig`] without a protocol, or when the
    /// default configuration is rejected.
    pub fn build(self) -> Result<Server, ServerError> {
        let protocol = self.protocol.ok_or_else(|| ServerError::invalid_config("protocol must be set"))?;
        let config = match self.config {
            Some(config) => config,
            None => ServerConfig::builder().build()?,
        };
        Ok(Server {
            config,
            protocol,
            hooks: self.hooks,
            state: ServerState::Created,
            stop: CancellationToken::new(),
            listener: None,
        })
    }
}

#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    protocol: AnyProtocol,
    hooks: Hooks,
    state: ServerState,
    stop: CancellationToken,
    listener: Option<TcpListener>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { token: self.stop.clone() }
    }

    /// Initializes the protocol and starts listening.
    ///
    /// Must be called from within a tokio runtime. Returns the bound
    /// address, which tells the port when binding to port 0.
    ///
    /// # Errors
    ///
    /// [`ServerError::InvalidState`] unless the server was just created,
    /// a protocol init failure, or [`ServerError::Bind`].
    pub fn listen(&mut self) -> Result<SocketAddr, ServerError> {
        ensure!(self.state == ServerState::Created, ServerError::InvalidState { state: self.state.name() });
        self.protocol.init()?;

        let listener = bind(&self.config)?;
        let addr = listener.local_addr()?;
        info!(%addr, protocol = self.protocol.name(), "listening");
        self.listener = Some(listener);
        self.state = ServerState::Initialized;
        Ok(addr)
    }

    /// Accepts connections until a stop is requested, then waits for the
    /// live ones to close.
    ///
    /// Connections are spawned with [`tokio::task::spawn_local`], so this
    /// future must run inside a [`LocalSet`].
    ///
    /// # Errors
    ///
    /// Startup failures from [`Server::listen`].
    pub async fn serve(mut self) -> Result<(), ServerError> {
        if self.state == ServerState::Created {
            self.listen()?;
        }
        let Some(listener) = self.listener.take() else {
            return Err(ServerError::InvalidState { state: self.state.name() });
        };
        self.state = ServerState::Started;

        let shared = Rc::new(Shared {
            recv_buf: RefCell::new(vec![0; self.config.recv_buffer_size].into_boxed_slice()),
            idle_timeout: self.config.idle_timeout,
            max_iovec: self.config.max_iovec,
            stop: self.stop.clone(),
            live: Cell::new(0),
            drained: Notify::new(),
            hooks: self.hooks.clone(),
        });
        info!(protocol = self.protocol.name(), "server started");

        loop {
            tokio::select! {
                () = self.stop.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn(stream, peer, &shared),
                    Err(e) => warn!(cause = %e, "failed to accept"),
                },
            }
        }

        self.state = ServerState::StopGraceful;
        drop(listener);
        info!(live = shared.live.get(), "stopping gracefully");
        while shared.live.get() > 0 {
            shared.drained.notified().await;
        }

        self.protocol.cleanup();
        self.state = ServerState::Stopped;
        info!("server stopped");
        Ok(())
    }

    /// Runs the server to completion on a new current-thread runtime.
    ///
    /// # Errors
    ///
    /// Runtime construction and startup failures.
    pub fn run(self) -> Result<(), ServerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ServerError::runtime("tokio runtime", e))?;
        LocalSet::new().block_on(&runtime, self.serve())
    }

    fn spawn(&self, stream: TcpStream, peer: SocketAddr, shared: &Rc<Shared>) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(cause = %e, %peer, "set_nodelay failed");
        }

        let conn = Connection::new(stream, Rc::clone(shared));
        let id = conn.id();
        shared.live.set(shared.live.get() + 1);
        debug!(%peer, conn_id = %id, live = shared.live.get(), "accepted");

        let span = info_span!("conn", conn_id = %id);
        tokio::task::spawn_local(conn.run(self.protocol.clone()).instrument(span));
    }
}

fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let address = config.address;
    let fail = |e| ServerError::bind(address, e);

    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(socket2::Protocol::TCP)).map_err(fail)?;
    socket.set_reuse_address(true).map_err(fail)?;
    #[cfg(unix)]
    if config.reuse_port {
        socket.set_reuse_port(true).map_err(fail)?;
    }
    socket.set_nonblocking(true).map_err(fail)?;
    socket.bind(&address.into()).map_err(fail)?;
    socket.listen(i32::try_from(config.listen_backlog).unwrap_or(i32::MAX)).map_err(fail)?;
    TcpListener::from_std(socket.into()).map_err(fail)
}
