//! Built-in `stevedore.diagnostics:app`.
//!
//! `GET /health` is a liveness probe; `GET /client` reports the client as
//! perceived after proxy-header processing.

use super::entrypoint::{AppService, app_fn, json_response};
use super::proxy::ClientInfo;
use http::{Method, StatusCode};
use serde_json::json;
use stevedore_shared::StevedoreResult;

pub const MODULE: &str = "stevedore.diagnostics";
pub const ATTR: &str = "app";

pub fn app() -> StevedoreResult<AppService> {
    Ok(app_fn(|req| async move {
        let client = req.extensions().get::<ClientInfo>().copied();
        match (req.method(), req.uri().path()) {
            (&Method::GET, "/health") => json_response(StatusCode::OK, &json!({ "status": "ok" })),
            (&Method::GET, "/client") => match client {
                Some(info) => json_response(
                    StatusCode::OK,
                    &json!({
                        "host": info.addr.ip().to_string(),
                        "port": info.addr.port(),
                        "scheme": info.scheme.as_str(),
                        "forwarded": info.forwarded,
                        "peer": info.peer.to_string(),
                    }),
                ),
                None => json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &json!({ "detail": "client info unavailable" }),
                ),
            },
            _ => json_response(StatusCode::NOT_FOUND, &json!({ "detail": "Not Found" })),
        }
    }))
}
