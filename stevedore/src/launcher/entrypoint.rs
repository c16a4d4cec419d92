//! `module:attr` entry points and the application registry.
//!
//! Applications are linked into the launcher and registered by name:
//!
//! ```ignore
//! fn make_api() -> StevedoreResult<AppService> {
//!     Ok(app_fn(|_req| async { text_response(StatusCode::OK, "ok") }))
//! }
//!
//! stevedore::inventory::submit! {
//!     AppRegistration::new("server", "api", make_api)
//! }
//! ```

use super::diagnostics;
use bytes::Bytes;
use http::{HeaderValue, Request, Response, StatusCode, header};
use http_body_util::Full;
use hyper::body::Incoming;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use stevedore_shared::{StevedoreError, StevedoreResult};
use tower::util::BoxCloneService;

/// Response body produced by applications.
pub type AppBody = Full<Bytes>;

/// A type-erased application, cloned once per connection.
pub type AppService = BoxCloneService<Request<Incoming>, Response<AppBody>, Infallible>;

/// Builds an application instance; an error fails startup.
pub type AppFactory = fn() -> StevedoreResult<AppService>;

pub struct AppRegistration {
    pub module: &'static str,
    pub attr: &'static str,
    pub factory: AppFactory,
}

impl AppRegistration {
    pub const fn new(module: &'static str, attr: &'static str, factory: AppFactory) -> Self {
        Self {
            module,
            attr,
            factory,
        }
    }
}

inventory::collect!(AppRegistration);

static BUILTIN_APPS: &[AppRegistration] = &[AppRegistration::new(
    diagnostics::MODULE,
    diagnostics::ATTR,
    diagnostics::app,
)];

/// Every application the binary can launch, built-ins first.
pub fn registered_apps() -> impl Iterator<Item = &'static AppRegistration> {
    BUILTIN_APPS.iter().chain(inventory::iter::<AppRegistration>)
}

/// Wrap an async handler as an [`AppService`].
pub fn app_fn<F, Fut>(handler: F) -> AppService
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Response<AppBody>> + Send + 'static,
{
    BoxCloneService::new(tower::service_fn(move |req| {
        let response = handler(req);
        async move { Ok::<_, Infallible>(response.await) }
    }))
}

pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<AppBody> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<AppBody> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    module: String,
    attr: String,
}

impl EntryPoint {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn attr(&self) -> &str {
        &self.attr
    }

    /// Look up the registration and build the application.
    pub fn resolve(&self) -> StevedoreResult<AppService> {
        let registration = registered_apps()
            .find(|r| r.module == self.module && r.attr == self.attr)
            .ok_or_else(|| self.unresolved())?;

        (registration.factory)().map_err(|e| StevedoreError::EntryPointResolution {
            entry_point: self.to_string(),
            reason: format!("application factory failed: {}", e),
        })
    }

    fn unresolved(&self) -> StevedoreError {
        let reason = if registered_apps().any(|r| r.module == self.module) {
            format!("module '{}' has no attribute '{}'", self.module, self.attr)
        } else {
            let known: Vec<String> = registered_apps()
                .map(|r| format!("{}:{}", r.module, r.attr))
                .collect();
            format!(
                "no module named '{}' (registered: {})",
                self.module,
                known.join(", ")
            )
        };
        StevedoreError::EntryPointResolution {
            entry_point: self.to_string(),
            reason,
        }
    }
}

impl FromStr for EntryPoint {
    type Err = StevedoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| StevedoreError::EntryPointResolution {
            entry_point: s.to_string(),
            reason: reason.to_string(),
        };
        let (module, attr) = s
            .split_once(':')
            .ok_or_else(|| malformed("expected 'module:attribute'"))?;
        if !is_dotted_path(module) {
            return Err(malformed("module must be a dotted identifier path"));
        }
        if !is_dotted_path(attr) {
            return Err(malformed("attribute must be a dotted identifier path"));
        }
        Ok(Self {
            module: module.to_string(),
            attr: attr.to_string(),
        })
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.attr)
    }
}

fn is_dotted_path(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|segment| {
            let mut chars = segment.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry_points() {
        let entry: EntryPoint = "server:api".parse().unwrap();
        assert_eq!(entry.module(), "server");
        assert_eq!(entry.attr(), "api");
        assert_eq!(entry.to_string(), "server:api");
        assert!("stevedore.diagnostics:app".parse::<EntryPoint>().is_ok());

        for bad in ["server", ":api", "server:", "ser-ver:api", "server:api:x", "1st:api"] {
            assert!(
                matches!(
                    bad.parse::<EntryPoint>(),
                    Err(StevedoreError::EntryPointResolution { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolves_builtin_diagnostics() {
        let entry: EntryPoint = "stevedore.diagnostics:app".parse().unwrap();
        entry.resolve().unwrap();
    }

    #[test]
    fn test_unknown_module_and_attribute() {
        let err = "nowhere:api".parse::<EntryPoint>().unwrap().resolve().unwrap_err();
        assert!(err.to_string().contains("no module named 'nowhere'"));

        let err = "stevedore.diagnostics:missing"
            .parse::<EntryPoint>()
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(err.to_string().contains("has no attribute 'missing'"));
    }
}
