use super::proxy::TrustedProxyPolicy;
use std::path::PathBuf;
use std::time::Duration;
use stevedore_shared::{StevedoreError, StevedoreResult};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BACKLOG: u32 = 2048;

/// Launch parameters for one server process.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// `module:attr` reference of the application.
    pub entry_point: String,
    pub host: String,
    /// Port to bind; `0` asks the OS for an ephemeral port.
    pub port: u16,
    pub proxy: TrustedProxyPolicy,
    /// How long in-flight connections may run after termination begins.
    pub drain_timeout: Duration,
    /// Directory to change into before resolving the entry point.
    pub app_dir: Option<PathBuf>,
    pub backlog: u32,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            entry_point: String::new(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            proxy: TrustedProxyPolicy::Disabled,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            app_dir: None,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

impl LaunchConfig {
    pub fn new(entry_point: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
            ..Self::default()
        }
    }

    pub fn sanitize(&self) -> StevedoreResult<()> {
        if self.host.trim().is_empty() {
            return Err(StevedoreError::Config("host must not be empty".into()));
        }
        if self.backlog == 0 {
            return Err(StevedoreError::Config("listen backlog must be at least 1".into()));
        }
        if let Some(dir) = &self.app_dir
            && !dir.is_dir()
        {
            return Err(StevedoreError::Config(format!(
                "application directory {} does not exist",
                dir.display()
            )));
        }
        Ok(())
    }
}
