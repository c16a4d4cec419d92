//! stevedore: lock-pinned dependency sync and a gracefully draining launcher
//! for containerised services.
//!
//! - [`build`]: `sync-locked` installs exactly the pinned versions, `build`
//!   then copies the application bundle.
//! - [`launcher`]: resolve a `module:attr` application, bind, serve, drain.

pub mod build;
pub mod environment;
pub mod launcher;
pub mod lock;
pub mod logging;
pub mod pipeline;
pub mod source;

pub use build::{BuildStage, BundleConfig, SyncConfig, SyncReport};
pub use launcher::{
    AppRegistration, AppService, BoundServer, ClientInfo, DrainOutcome, LaunchConfig, Launcher,
    ShutdownReport, TrustedProxyPolicy,
};
pub use stevedore_shared::{ErrorClass, StevedoreError, StevedoreResult};

/// Re-exported so applications can register with `stevedore::inventory::submit!`.
pub use inventory;
