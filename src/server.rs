//! TCP acceptor for checksum sessions.
//!
//! Accepts incoming connections and hands each one to its own spawned
//! session task. The engine source is created once here and shared by
//! every session.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::engine::{ChecksumEngine, EngineSource, Sha256Engine};
use crate::session::Session;

/// Server instance
pub struct Server<E: ChecksumEngine = Sha256Engine> {
    config: ServerConfig,
    engines: Arc<EngineSource<E>>,
    connection_limit: Arc<Semaphore>,
}

impl<E: ChecksumEngine> Server<E> {
    /// Create a new server instance
    pub fn new(config: ServerConfig) -> Self {
        let engines = EngineSource::new(config.engine_mode, &config.salt);

        Server {
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            engines: Arc::new(engines),
            config,
        }
    }

    /// Bind the configured address.
    pub fn bind(&self) -> io::Result<TcpListener> {
        let addr = self.config.socket_addr();
        let listener = create_listener(addr, self.config.backlog)?;
        TcpListener::from_std(listener)
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind()?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    ///
    /// A failed `accept` ends the server. Session failures never do.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            address = %listener.local_addr()?,
            engine_mode = %self.engines.mode(),
            max_connections = self.config.max_connections,
            "Server listening"
        );

        tokio::pin!(shutdown);

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                permit = self.connection_limit.clone().acquire_owned() => {
                    permit.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
                }
                _ = &mut shutdown => break,
            };

            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        return Err(e);
                    }
                },
                _ = &mut shutdown => break,
            };

            debug!(peer = %peer, "New connection");
            let engine = self.engines.session_engine();

            tokio::spawn(async move {
                handle_connection(stream, peer, engine).await;
                drop(permit);
            });
        }

        let in_flight = self.config.max_connections - self.connection_limit.available_permits();
        info!(
            in_flight,
            "Shutting down, no longer accepting connections; \
             the engine is destroyed once in-flight sessions finish"
        );
        drop(self.engines);
        Ok(())
    }
}

/// Run one session and log how it ended. The stream is closed on return.
async fn handle_connection<E: ChecksumEngine>(
    stream: TcpStream,
    peer: SocketAddr,
    engine: crate::engine::SessionEngine<E>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    match Session::new(stream, engine).run().await {
        Ok(summary) => {
            debug!(
                peer = %peer,
                responses = summary.responses_sent,
                "Connection finished"
            );
        }
        Err(e) if e.is_disconnect() => {
            debug!(peer = %peer, error = %e, "Client disconnected mid-session");
        }
        Err(e) => {
            warn!(peer = %peer, error = %e, "Session aborted");
        }
    }
}

/// Build a listening socket with SO_REUSEADDR and the given backlog.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
