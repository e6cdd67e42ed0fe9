//! HTTP server hosting a minimal chat API behind the gate pipeline.

use axum::{
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::middleware::{gate_requests, trusted_identity};
use crate::clock::Clock;
use crate::error::{ChatGateError, Result};
use crate::pipeline::RequestPipeline;
use crate::ratelimit::RateLimitStore;

/// Build the router: chat routes wrapped by the gate layer.
///
/// With `trust_identity_headers` the [`trusted_identity`] layer runs in front
/// of the gates; without it every request reaches them anonymous.
pub fn router(pipeline: Arc<RequestPipeline>, trust_identity_headers: bool) -> Router {
    let chats = Router::new()
        .route("/chats/messages", get(list_messages))
        .route("/chats/send", post(send_message))
        .route("/chats/admin", get(admin_area).post(admin_area))
        .route("/chats/admin/{*rest}", get(admin_area).post(admin_area))
        .route("/chats/moderate", get(moderation_queue).post(moderation_queue))
        .route("/chats/moderate/{*rest}", get(moderation_queue).post(moderation_queue))
        .layer(middleware::from_fn_with_state(pipeline, gate_requests));

    let chats = if trust_identity_headers {
        chats.layer(middleware::from_fn(trusted_identity))
    } else {
        chats
    };

    chats.route("/health", get(health))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn list_messages() -> impl IntoResponse {
    Json(serde_json::json!({ "messages": [] }))
}

async fn send_message(body: String) -> impl IntoResponse {
    debug!(bytes = body.len(), "Message accepted");
    (StatusCode::CREATED, "Message accepted")
}

async fn admin_area() -> impl IntoResponse {
    "Admin area"
}

async fn moderation_queue() -> impl IntoResponse {
    "Moderation queue"
}

/// Periodically evict expired windows from `store`.
pub fn spawn_sweeper(
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.sweep(clock.now()).await {
                Ok(evicted) => {
                    if let Ok(remaining) = store.len().await {
                        trace!(evicted, remaining, "Rate limit store swept");
                    }
                }
                Err(e) => warn!(error = %e, "Rate limit store sweep failed"),
            }
        }
    })
}

/// HTTP server for the gated chat API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The pipeline every chat request runs through
    pipeline: Arc<RequestPipeline>,
    /// Whether `x-user*` headers establish the caller's identity
    trust_identity_headers: bool,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, pipeline: Arc<RequestPipeline>) -> Self {
        Self {
            addr,
            pipeline,
            trust_identity_headers: false,
        }
    }

    /// Accept identity headers from an authenticating proxy.
    pub fn trust_identity_headers(mut self, trust: bool) -> Self {
        self.trust_identity_headers = trust;
        self
    }

    /// Start the server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        let app = router(self.pipeline, self.trust_identity_headers);

        info!(
            addr = %self.addr,
            trust_identity_headers = self.trust_identity_headers,
            "Starting HTTP server for gated chat API"
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            ChatGateError::Server(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ChatGateConfig;
    use crate::gate::{MemorySink, RequestLogger};
    use crate::ratelimit::InMemoryStore;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use chrono::{Local, TimeZone};
    use tower::ServiceExt;

    fn app_at(hour: u32) -> (MemorySink, Router) {
        app_with(hour, false)
    }

    fn app_with(hour: u32, trust_identity_headers: bool) -> (MemorySink, Router) {
        let clock = ManualClock::new(Local.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap());
        let store = Arc::new(InMemoryStore::new(Arc::new(clock.clone())));
        let sink = MemorySink::new();
        let pipeline = RequestPipeline::standard(
            &ChatGateConfig::default(),
            store,
            Arc::new(clock),
            RequestLogger::new(Box::new(sink.clone())),
        );
        (sink, router(Arc::new(pipeline), trust_identity_headers))
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn post_message(ip: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/chats/send")
            .header("x-forwarded-for", ip)
            .body(Body::from("hello"))
            .unwrap()
    }

    #[test]
    fn test_server_creation() {
        let clock = ManualClock::new(Local.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap());
        let pipeline = RequestPipeline::new(RequestLogger::default(), Arc::new(clock));
        let addr: SocketAddr = "127.0.0.1:8000".parse().unwrap();
        let _server = HttpServer::new(addr, Arc::new(pipeline));
    }

    #[tokio::test]
    async fn test_post_forwarded_during_hours() {
        let (_, app) = app_at(10);

        let response = app.oneshot(post_message("203.0.113.7")).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_text(response).await, "Message accepted");
    }

    #[tokio::test]
    async fn test_closed_hours_forbidden() {
        let (_, app) = app_at(22);

        let response = app.oneshot(post_message("203.0.113.7")).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_text(response).await,
            "Chat is closed. Please come back during allowed hours."
        );
    }

    #[tokio::test]
    async fn test_sixth_message_forbidden() {
        let (_, app) = app_at(10);

        for _ in 0..5 {
            let response = app.clone().oneshot(post_message("203.0.113.7")).await.unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = app.oneshot(post_message("203.0.113.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_text(response).await,
            "Rate limit exceeded: max 5 messages per minute."
        );
    }

    #[tokio::test]
    async fn test_admin_requires_role_header() {
        let (sink, app) = app_with(10, true);

        let anonymous = Request::builder()
            .uri("/chats/admin/users")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(anonymous).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_text(response).await,
            "Forbidden: admin/moderator role required."
        );

        let admin = Request::builder()
            .uri("/chats/admin/users")
            .header("x-user", "alice")
            .header("x-user-groups", "admin")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(admin).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Admin area");

        assert_eq!(
            sink.lines(),
            vec![
                "2024-01-15 10:00:00 - User: anonymous - Path: /chats/admin/users",
                "2024-01-15 10:00:00 - User: alice - Path: /chats/admin/users",
            ]
        );
    }

    #[tokio::test]
    async fn test_identity_headers_ignored_by_default() {
        let (sink, app) = app_at(10);

        let spoofed = Request::builder()
            .uri("/chats/admin/users")
            .header("x-user", "mallory")
            .header("x-user-elevated", "true")
            .header("x-user-groups", "admin")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(spoofed).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_text(response).await,
            "Forbidden: admin/moderator role required."
        );
        assert_eq!(
            sink.lines(),
            vec!["2024-01-15 10:00:00 - User: anonymous - Path: /chats/admin/users"]
        );
    }

    #[test]
    fn test_server_trusts_headers_only_when_asked() {
        let clock = ManualClock::new(Local.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap());
        let pipeline = Arc::new(RequestPipeline::new(RequestLogger::default(), Arc::new(clock)));
        let addr: SocketAddr = "127.0.0.1:8000".parse().unwrap();

        assert!(!HttpServer::new(addr, pipeline.clone()).trust_identity_headers);
        assert!(HttpServer::new(addr, pipeline).trust_identity_headers(true).trust_identity_headers);
    }

    #[tokio::test]
    async fn test_health_bypasses_gates() {
        let (sink, app) = app_at(23);

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_evicts_expired_entries() {
        let clock = ManualClock::new(Local.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap());
        let store = Arc::new(InMemoryStore::new(Arc::new(clock.clone())));
        let key = crate::ratelimit::ClientKey::new("10.0.0.1");
        store
            .hit(&key, clock.now(), Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(120));

        let handle = spawn_sweeper(store.clone(), Arc::new(clock), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(store.is_empty());
    }
}
