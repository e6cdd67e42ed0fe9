//! Axum middleware that runs the gate pipeline in front of the handlers.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::gate::Rejection;
use crate::pipeline::{Outcome, RequestPipeline};
use crate::request::{GateRequest, Identity};

/// Run the pipeline; answer `403 Forbidden` on rejection, otherwise forward
/// the request untouched.
///
/// Use with `axum::middleware::from_fn_with_state(pipeline, gate_requests)`.
pub async fn gate_requests(
    State(pipeline): State<Arc<RequestPipeline>>,
    request: Request,
    next: Next,
) -> Response {
    let gate_request = to_gate_request(&request);

    match pipeline.evaluate(&gate_request).await {
        Outcome::Forwarded => next.run(request).await,
        Outcome::Rejected(rejection) => forbidden(rejection),
    }
}

/// Copy what the gates need out of an axum request.
///
/// The peer address is only known when the server was started with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn to_gate_request(request: &Request) -> GateRequest {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    GateRequest {
        method: request.method().clone(),
        path: request.uri().path().to_string(),
        headers: request.headers().clone(),
        remote_addr,
        identity: request.extensions().get::<Identity>().cloned(),
    }
}

fn forbidden(rejection: Rejection) -> Response {
    (StatusCode::FORBIDDEN, rejection.message).into_response()
}

/// Stand-in for an authentication layer: trusts identity headers set by a
/// fronting proxy that already authenticated the user.
///
/// Reads `x-user`, `x-user-groups` (comma separated) and `x-user-elevated`
/// (`true` or `1`). Only installed when `server.trust_identity_headers` is set.
pub async fn trusted_identity(mut request: Request, next: Next) -> Response {
    if let Some(identity) = identity_from_headers(request.headers()) {
        request.extensions_mut().insert(identity);
    }
    next.run(request).await
}

pub fn identity_from_headers(headers: &HeaderMap) -> Option<Identity> {
    let name = header_value(headers, "x-user")?;
    let groups = header_value(headers, "x-user-groups")
        .map(|g| {
            g.split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(String::from)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let elevated = header_value(headers, "x-user-elevated")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);

    let mut identity = Identity::authenticated(name).with_groups(groups);
    identity.is_elevated = elevated;
    Some(identity)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
