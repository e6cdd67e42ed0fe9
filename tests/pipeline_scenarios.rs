//! End-to-end scenarios for the standard gate pipeline.

use axum::http::Method;
use chrono::{Duration, Local, TimeZone};
use futures::future::join_all;
use std::sync::Arc;

use chatgate::clock::{Clock, ManualClock};
use chatgate::config::ChatGateConfig;
use chatgate::gate::{DenialReason, MemorySink, RequestLogger};
use chatgate::pipeline::{Outcome, RequestPipeline};
use chatgate::ratelimit::{ClientKey, InMemoryStore, RateLimitStore};
use chatgate::request::{GateRequest, Identity};

struct Harness {
    clock: ManualClock,
    store: Arc<InMemoryStore>,
    sink: MemorySink,
    pipeline: Arc<RequestPipeline>,
}

fn harness_at(hour: u32, config: &ChatGateConfig) -> Harness {
    let clock = ManualClock::new(Local.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap());
    let store = Arc::new(InMemoryStore::new(Arc::new(clock.clone())));
    let sink = MemorySink::new();
    let pipeline = RequestPipeline::standard(
        config,
        store.clone(),
        Arc::new(clock.clone()),
        RequestLogger::new(Box::new(sink.clone())),
    );
    Harness {
        clock,
        store,
        sink,
        pipeline: Arc::new(pipeline),
    }
}

fn post_from(ip: &str) -> GateRequest {
    GateRequest::new(Method::POST, "/chats/send").with_header("x-forwarded-for", ip)
}

fn reason(outcome: &Outcome) -> Option<DenialReason> {
    match outcome {
        Outcome::Forwarded => None,
        Outcome::Rejected(rejection) => Some(rejection.reason),
    }
}

#[tokio::test]
async fn closed_chat_rejects_before_rate_limiter() {
    let h = harness_at(22, &ChatGateConfig::default());

    let outcome = h.pipeline.evaluate(&post_from("203.0.113.7")).await;

    match outcome {
        Outcome::Rejected(rejection) => {
            assert_eq!(rejection.reason, DenialReason::Closed);
            assert_eq!(
                rejection.message,
                "Chat is closed. Please come back during allowed hours."
            );
        }
        Outcome::Forwarded => panic!("chat should be closed at 22:00"),
    }

    // The rate limiter never saw the request
    assert!(h.store.is_empty());
    assert_eq!(h.sink.lines().len(), 1);
}

#[tokio::test]
async fn sixth_post_within_ten_seconds_is_rate_limited() {
    let h = harness_at(10, &ChatGateConfig::default());
    let request = post_from("203.0.113.7");

    for i in 0..5 {
        let outcome = h.pipeline.evaluate(&request).await;
        assert_eq!(outcome, Outcome::Forwarded, "POST {} should pass", i + 1);
        h.clock.advance(Duration::seconds(2));
    }

    match h.pipeline.evaluate(&request).await {
        Outcome::Rejected(rejection) => {
            assert_eq!(rejection.reason, DenialReason::RateLimited);
            assert_eq!(rejection.message, "Rate limit exceeded: max 5 messages per minute.");
        }
        Outcome::Forwarded => panic!("sixth POST should be rate limited"),
    }

    // GETs to the same path are never counted
    let get = GateRequest::new(Method::GET, "/chats/send").with_header("x-forwarded-for", "203.0.113.7");
    for _ in 0..10 {
        assert_eq!(h.pipeline.evaluate(&get).await, Outcome::Forwarded);
    }
}

#[tokio::test]
async fn window_reset_starts_fresh_count() {
    let h = harness_at(10, &ChatGateConfig::default());
    let request = post_from("203.0.113.7");
    let key = ClientKey::new("203.0.113.7");

    for _ in 0..7 {
        h.pipeline.evaluate(&request).await;
    }
    assert_eq!(h.store.get(&key).await.unwrap().map(|s| s.count), Some(7));

    h.clock.advance(Duration::seconds(60));

    assert_eq!(h.pipeline.evaluate(&request).await, Outcome::Forwarded);
    let state = h.store.get(&key).await.unwrap().unwrap();
    assert_eq!(state.count, 1);
    assert_eq!(state.window_reset_at, h.clock.now() + Duration::seconds(60));
}

#[tokio::test]
async fn role_gate_runs_last() {
    let h = harness_at(10, &ChatGateConfig::default());

    let moderator = GateRequest::new(Method::GET, "/chats/moderate/reports")
        .with_identity(Identity::authenticated("mod").with_groups(["moderator"]));
    let member = GateRequest::new(Method::GET, "/chats/moderate/reports")
        .with_identity(Identity::authenticated("member"));
    let reader = GateRequest::new(Method::GET, "/chats/messages");

    assert_eq!(h.pipeline.evaluate(&moderator).await, Outcome::Forwarded);
    assert_eq!(
        reason(&h.pipeline.evaluate(&member).await),
        Some(DenialReason::RoleRequired)
    );
    assert_eq!(h.pipeline.evaluate(&reader).await, Outcome::Forwarded);

    assert_eq!(
        h.sink.lines(),
        vec![
            "2024-03-04 10:00:00 - User: mod - Path: /chats/moderate/reports",
            "2024-03-04 10:00:00 - User: member - Path: /chats/moderate/reports",
            "2024-03-04 10:00:00 - User: anonymous - Path: /chats/messages",
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_posts_from_one_client_respect_limit() {
    let h = harness_at(10, &ChatGateConfig::default());
    let n = 40;

    let outcomes = join_all((0..n).map(|_| {
        let pipeline = h.pipeline.clone();
        tokio::spawn(async move { pipeline.evaluate(&post_from("198.51.100.1")).await })
    }))
    .await;

    let forwarded = outcomes
        .into_iter()
        .map(|r| r.unwrap())
        .filter(Outcome::is_forwarded)
        .count();

    assert_eq!(forwarded, 5);
    let state = h.store.get(&ClientKey::new("198.51.100.1")).await.unwrap().unwrap();
    assert_eq!(state.count, n);
}

#[tokio::test]
async fn configured_thresholds_are_honoured() {
    let yaml = r#"
access_hours:
  start_hour: 18
  end_hour: 21
rate_limiting:
  max_requests: 2
  methods: [POST, PUT]
"#;
    let config = ChatGateConfig::from_yaml(yaml).unwrap();

    let morning = harness_at(10, &config);
    assert_eq!(
        reason(&morning.pipeline.evaluate(&post_from("10.0.0.1")).await),
        Some(DenialReason::Closed)
    );

    let evening = harness_at(19, &config);
    let put = GateRequest::new(Method::PUT, "/chats/7").with_header("x-forwarded-for", "10.0.0.1");
    assert_eq!(evening.pipeline.evaluate(&put).await, Outcome::Forwarded);
    assert_eq!(evening.pipeline.evaluate(&post_from("10.0.0.1")).await, Outcome::Forwarded);

    match evening.pipeline.evaluate(&post_from("10.0.0.1")).await {
        Outcome::Rejected(rejection) => {
            assert_eq!(rejection.message, "Rate limit exceeded: max 2 messages per minute.")
        }
        Outcome::Forwarded => panic!("third request should be rate limited"),
    }
}
