//! Bind, accept, drain.

use super::config::LaunchConfig;
use super::entrypoint::{AppService, EntryPoint};
use super::lifecycle::{ServerState, ServerStatus};
use super::proxy::{ProxyHeaders, Scheme, TrustedProxyPolicy};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use stevedore_shared::{StevedoreError, StevedoreResult};
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinSet;
use ulid::Ulid;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight connection finished before the deadline.
    Graceful,
    /// The deadline elapsed; remaining connections were abandoned.
    Forced,
}

#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub instance: Ulid,
    pub outcome: DrainOutcome,
    /// Connections accepted over the server's lifetime.
    pub connections: u64,
    /// Connections still open when the deadline elapsed.
    pub abandoned: usize,
    pub drain_duration: Duration,
}

/// Resolves the entry point and binds the listening socket.
pub struct Launcher {
    config: LaunchConfig,
    state: Arc<ServerState>,
}

impl Launcher {
    pub fn new(config: LaunchConfig) -> StevedoreResult<Self> {
        config.sanitize()?;
        Ok(Self {
            config,
            state: Arc::new(ServerState::new()),
        })
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// `STOPPED → BINDING → SERVING`.
    ///
    /// Fails with `EntryPointResolution` before binding anything, and with
    /// `AddressInUse` when another socket holds the port.
    pub async fn start(self) -> StevedoreResult<BoundServer> {
        let Launcher { config, state } = self;
        let instance = state.instance();

        let entry_point: EntryPoint = config.entry_point.parse()?;
        if let Some(dir) = &config.app_dir {
            std::env::set_current_dir(dir).map_err(|e| {
                StevedoreError::Config(format!(
                    "cannot enter application directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        let app = entry_point.resolve().inspect_err(|e| {
            tracing::error!(instance = %instance, entry_point = %entry_point, error = %e, "Entry point resolution failed");
        })?;

        state.transition(ServerStatus::Binding)?;
        let (listener, local_addr) = match bind(&config.host, config.port, config.backlog).await {
            Ok(bound) => bound,
            Err(e) => {
                tracing::error!(instance = %instance, host = %config.host, port = config.port, error = %e, "Bind failed");
                state.transition(ServerStatus::Stopped)?;
                return Err(e);
            }
        };
        state.transition(ServerStatus::Serving)?;

        tracing::info!(
            instance = %instance,
            addr = %local_addr,
            entry_point = %entry_point,
            proxy = %config.proxy,
            drain_timeout_secs = config.drain_timeout.as_secs_f64(),
            "Server listening"
        );

        Ok(BoundServer {
            listener,
            local_addr,
            app,
            policy: Arc::new(config.proxy),
            drain_timeout: config.drain_timeout,
            state,
        })
    }
}

async fn bind(host: &str, port: u16, backlog: u32) -> StevedoreResult<(TcpListener, SocketAddr)> {
    let requested = format!("{}:{}", host, port);
    let bind_err = |reason: String| StevedoreError::Bind {
        addr: requested.clone(),
        reason,
    };

    let addr = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| bind_err(e.to_string()))?
        .next()
        .ok_or_else(|| bind_err("host resolved to no addresses".into()))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| bind_err(e.to_string()))?;
    socket
        .set_reuseaddr(true)
        .map_err(|e| bind_err(format!("set_reuseaddr: {}", e)))?;
    socket.bind(addr).map_err(|e| bind_failure(addr, e))?;
    let listener = socket.listen(backlog).map_err(|e| bind_failure(addr, e))?;
    let local_addr = listener.local_addr().map_err(|e| bind_failure(addr, e))?;
    Ok((listener, local_addr))
}

fn bind_failure(addr: SocketAddr, err: io::Error) -> StevedoreError {
    if err.kind() == io::ErrorKind::AddrInUse {
        StevedoreError::AddressInUse {
            addr: addr.to_string(),
        }
    } else {
        StevedoreError::Bind {
            addr: addr.to_string(),
            reason: err.to_string(),
        }
    }
}

/// A server in `SERVING`, ready to accept.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    app: AppService,
    policy: Arc<TrustedProxyPolicy>,
    drain_timeout: Duration,
    state: Arc<ServerState>,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Serve until SIGTERM or SIGINT.
    pub async fn serve(self) -> StevedoreResult<ShutdownReport> {
        self.serve_until(termination_signal()).await
    }

    /// Serve until `shutdown` resolves, then `SERVING → DRAINING → STOPPED`.
    ///
    /// A drain that outlives the deadline is reported as
    /// [`DrainOutcome::Forced`], not as an error.
    pub async fn serve_until<F>(self, shutdown: F) -> StevedoreResult<ShutdownReport>
    where
        F: Future<Output = ()>,
    {
        let BoundServer {
            listener,
            local_addr,
            app,
            policy,
            drain_timeout,
            state,
        } = self;
        let instance = state.instance();

        let builder = auto::Builder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        let active = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();
        let mut connections: u64 = 0;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(instance = %instance, error = %e, "Accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    connections += 1;
                    tracing::trace!(instance = %instance, peer = %peer, "Connection accepted");

                    let service = ProxyHeaders::new(app.clone(), Arc::clone(&policy), peer, Scheme::Http);
                    let conn = builder.serve_connection_with_upgrades(
                        TokioIo::new(stream),
                        TowerToHyperService::new(service),
                    );
                    let conn = graceful.watch(conn.into_owned());
                    let tracker = ActiveConnection::new(&active);
                    tasks.spawn(async move {
                        let _tracker = tracker;
                        if let Err(e) = conn.await {
                            tracing::debug!(peer = %peer, error = %e, "Connection closed with error");
                        }
                    });
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                () = &mut shutdown => break,
            }
        }

        // Stop accepting before draining.
        drop(listener);
        state.transition(ServerStatus::Draining)?;
        tracing::info!(
            instance = %instance,
            addr = %local_addr,
            in_flight = active.load(Ordering::SeqCst),
            deadline_secs = drain_timeout.as_secs_f64(),
            "Draining connections"
        );

        let drain_start = Instant::now();
        let outcome = match tokio::time::timeout(drain_timeout, graceful.shutdown()).await {
            Ok(()) => DrainOutcome::Graceful,
            Err(_) => DrainOutcome::Forced,
        };

        let abandoned = match outcome {
            DrainOutcome::Graceful => {
                while tasks.join_next().await.is_some() {}
                0
            }
            DrainOutcome::Forced => {
                let abandoned = active.load(Ordering::SeqCst);
                tracing::warn!(
                    instance = %instance,
                    abandoned,
                    deadline_secs = drain_timeout.as_secs_f64(),
                    "Drain deadline elapsed, forcing shutdown"
                );
                tasks.shutdown().await;
                abandoned
            }
        };
        let drain_duration = drain_start.elapsed();

        state.transition(ServerStatus::Stopped)?;
        tracing::info!(
            instance = %instance,
            connections,
            drain_ms = drain_duration.as_millis() as u64,
            "Server stopped"
        );

        Ok(ShutdownReport {
            instance,
            outcome,
            connections,
            abandoned,
            drain_duration,
        })
    }
}

struct ActiveConnection(Arc<AtomicUsize>);

impl ActiveConnection {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolves on SIGTERM or SIGINT (Ctrl-C elsewhere).
pub async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut terminate), Ok(mut interrupt)) => {
                tokio::select! {
                    _ = terminate.recv() => tracing::info!("Received SIGTERM"),
                    _ = interrupt.recv() => tracing::info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Cannot register signal handlers, falling back to Ctrl-C");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Cannot listen for Ctrl-C; serving until killed");
        std::future::pending::<()>().await;
    }
}
