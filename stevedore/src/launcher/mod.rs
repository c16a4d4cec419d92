//! Runtime launcher: resolve an application, bind once, drain on termination.
//!
//! ```ignore
//! let mut config = LaunchConfig::new("server:api");
//! config.proxy = TrustedProxyPolicy::AnyPeer;
//! let server = Launcher::new(config)?.start().await?;
//! let report = server.serve().await?;
//! ```

pub mod config;
pub mod diagnostics;
mod entrypoint;
mod lifecycle;
mod proxy;
mod server;

pub use config::{DEFAULT_BACKLOG, DEFAULT_DRAIN_TIMEOUT, DEFAULT_HOST, DEFAULT_PORT, LaunchConfig};
pub use entrypoint::{
    AppBody, AppFactory, AppRegistration, AppService, EntryPoint, app_fn, json_response,
    registered_apps, text_response,
};
pub use lifecycle::{ServerState, ServerStatus};
pub use proxy::{ClientInfo, PeerRange, ProxyHeaders, Scheme, TrustedProxyPolicy};
pub use server::{BoundServer, DrainOutcome, Launcher, ShutdownReport, termination_signal};
