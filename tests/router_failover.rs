//! Router integration tests
//!
//! Exercises the full routing pipeline (failure classification, failover,
//! circuit breaking, hot-swap, cost analytics) against scripted mock
//! providers. A [`ManualClock`] stands in for wall time where breaker reset
//! timeouts matter.

use ai_router::circuit_breaker::CircuitBreakerConfig;
use ai_router::clock::ManualClock;
use ai_router::pricing::PricingTable;
use ai_router::provider::{
    ChatMessage, ChatOptions, ChatProvider, ChatResponse, ProviderHealth,
};
use ai_router::router::{AiRouter, FailureKind, RouterConfig, RouterConfigUpdate, SwitchOptions};
use ai_router::{Error, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Scripted provider. Outcomes are consumed in order; once the script is
/// exhausted every call succeeds with a canned response.
struct MockProvider {
    name: String,
    initialized: bool,
    vision: bool,
    model: String,
    outcomes: Mutex<VecDeque<Result<ChatResponse>>>,
    calls: AtomicU64,
}

impl MockProvider {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            initialized: true,
            vision: false,
            model: format!("{name}-default-model"),
            outcomes: Mutex::new(VecDeque::new()),
            calls: AtomicU64::new(0),
        }
    }

    fn uninitialized(name: &str) -> Self {
        Self {
            initialized: false,
            ..Self::new(name)
        }
    }

    fn with_vision(mut self) -> Self {
        self.vision = true;
        self
    }

    fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Queue a failure for the next call
    fn fail_next(&self, error: Error) {
        self.outcomes.lock().unwrap().push_back(Err(error));
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn canned_response(&self) -> ChatResponse {
        ChatResponse {
            content: format!("answer from {}", self.name),
            model: self.model.clone(),
            input_tokens: 1_000,
            output_tokens: 500,
        }
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn supports_vision(&self) -> bool {
        self.vision
    }

    async fn send_message(
        &self,
        _messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(self.canned_response()),
        }
    }

    async fn health_check(&self) -> Result<ProviderHealth> {
        Ok(ProviderHealth {
            healthy: true,
            latency_ms: 1,
            detail: None,
        })
    }
}

/// Route tracing output through the test harness; `RUST_LOG` controls verbosity
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_router() -> (AiRouter, Arc<MockProvider>, Arc<MockProvider>) {
    init_tracing();
    let router = AiRouter::new(RouterConfig::default());
    let primary = Arc::new(MockProvider::new("kie").with_model("gpt-4o"));
    let fallback = Arc::new(MockProvider::new("anthropic").with_model("claude-sonnet-4"));
    router.register_provider(Arc::clone(&primary) as Arc<dyn ChatProvider>);
    router.register_provider(Arc::clone(&fallback) as Arc<dyn ChatProvider>);
    (router, primary, fallback)
}

fn user_message() -> Vec<ChatMessage> {
    vec![ChatMessage::user("hello")]
}

#[tokio::test]
async fn timeout_on_primary_fails_over_to_fallback() {
    let (router, primary, fallback) = test_router();
    primary.fail_next(Error::provider("kie", "request timeout after 30000ms"));

    let response = router
        .send_message(&user_message(), &ChatOptions::default())
        .await
        .unwrap();

    assert!(response.used_fallback);
    assert_eq!(response.actual_provider, "anthropic");
    assert_eq!(response.content, "answer from anthropic");
    assert!(response.failover_reason.as_deref().unwrap().contains("timeout"));
    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 1);

    let stats = router.router_stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.primary_successes, 0);
    assert_eq!(stats.fallback_successes, 1);
    assert_eq!(stats.failover_events.len(), 1);
    let event = &stats.failover_events[0];
    assert_eq!(event.error_kind, FailureKind::Timeout);
    assert_eq!(event.primary_provider, "kie");
    assert_eq!(event.fallback_provider, "anthropic");
}

#[tokio::test]
async fn auth_error_surfaces_without_failover() {
    let (router, primary, fallback) = test_router();
    primary.fail_next(Error::provider_status("kie", 401, "invalid api key"));

    let err = router
        .send_message(&user_message(), &ChatOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Provider {
            status: Some(401),
            ..
        }
    ));
    assert_eq!(fallback.calls(), 0);
    assert!(router.router_stats().failover_events.is_empty());
    assert_eq!(router.router_stats().total_failures, 1);
}

#[tokio::test]
async fn fallback_error_is_surfaced_verbatim() {
    let (router, primary, fallback) = test_router();
    primary.fail_next(Error::provider_status("kie", 503, "unavailable"));
    fallback.fail_next(Error::provider_status("anthropic", 529, "overloaded"));

    let err = router
        .send_message(&user_message(), &ChatOptions::default())
        .await
        .unwrap_err();

    // The fallback's own error comes back, not a wrapper around the primary's
    assert!(matches!(
        err,
        Error::Provider {
            status: Some(529),
            ..
        }
    ));
    // The failover attempt is still on record
    assert_eq!(router.router_stats().failover_events.len(), 1);
}

#[tokio::test]
async fn disabling_fallback_on_error_surfaces_server_errors() {
    let (router, primary, fallback) = test_router();
    router
        .update_router_config(RouterConfigUpdate {
            fallback_on_error: Some(false),
            ..RouterConfigUpdate::default()
        })
        .unwrap();
    primary.fail_next(Error::provider_status("kie", 500, "internal error"));

    let err = router
        .send_message(&user_message(), &ChatOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Provider { .. }));
    assert_eq!(fallback.calls(), 0);

    // Timeouts are gated independently and still fail over
    primary.fail_next(Error::provider("kie", "request timeout"));
    let response = router
        .send_message(&user_message(), &ChatOptions::default())
        .await
        .unwrap();
    assert!(response.used_fallback);
    assert_eq!(fallback.calls(), 1);
}

#[tokio::test]
async fn missing_primary_routes_directly_to_fallback() {
    let router = AiRouter::new(RouterConfig::default());
    let fallback = Arc::new(MockProvider::new("anthropic"));
    router.register_provider(Arc::clone(&fallback) as Arc<dyn ChatProvider>);

    let response = router
        .send_message(&user_message(), &ChatOptions::default())
        .await
        .unwrap();

    assert!(response.used_fallback);
    assert_eq!(response.actual_provider, "anthropic");
    assert_eq!(
        response.failover_reason.as_deref(),
        Some("Primary provider not initialized")
    );
    // Direct fallback is not a failover event
    assert!(router.router_stats().failover_events.is_empty());
}

#[tokio::test]
async fn no_initialized_provider_yields_typed_error() {
    let router = AiRouter::new(RouterConfig::default());
    router.register_provider(Arc::new(MockProvider::uninitialized("kie")));
    router.register_provider(Arc::new(MockProvider::uninitialized("anthropic")));

    let err = router
        .send_message(&user_message(), &ChatOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoProviderAvailable { .. }));
}

#[tokio::test]
async fn open_breaker_skips_primary_and_fails_over() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    ));
    let router = AiRouter::with_parts(
        RouterConfig::default(),
        PricingTable::builtin(),
        CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout_ms: 60_000,
            success_threshold: 1,
            enabled: true,
        },
        clock,
    );
    let primary = Arc::new(MockProvider::new("kie"));
    let fallback = Arc::new(MockProvider::new("anthropic"));
    router.register_provider(Arc::clone(&primary) as Arc<dyn ChatProvider>);
    router.register_provider(Arc::clone(&fallback) as Arc<dyn ChatProvider>);

    // Two server errors trip the primary's breaker; both requests still
    // succeed through the fallback.
    for _ in 0..2 {
        primary.fail_next(Error::provider_status("kie", 503, "unavailable"));
        let response = router
            .send_message(&user_message(), &ChatOptions::default())
            .await
            .unwrap();
        assert!(response.used_fallback);
    }
    assert_eq!(primary.calls(), 2);

    // Third request: the breaker refuses before the adapter is invoked
    let response = router
        .send_message(&user_message(), &ChatOptions::default())
        .await
        .unwrap();
    assert!(response.used_fallback);
    assert_eq!(primary.calls(), 2);

    let stats = router.router_stats();
    assert_eq!(stats.failover_events.len(), 3);
    assert_eq!(
        stats.failover_events[2].error_kind,
        FailureKind::CircuitOpen
    );

    let breakers = router.breaker_status();
    assert_eq!(breakers["kie"].state.to_string(), "open");
}

#[tokio::test]
async fn hot_swap_reroutes_future_requests() {
    let (router, primary, fallback) = test_router();

    let switched = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&switched);
    router.on_provider_switch(move |event| {
        assert_eq!(event.previous_primary, "kie");
        assert_eq!(event.new_primary, "anthropic");
        seen.fetch_add(1, Ordering::SeqCst);
    });

    router
        .set_primary_provider(
            "anthropic",
            SwitchOptions {
                reason: Some("kie degraded".to_string()),
                fallback: Some(Some("kie".to_string())),
                reset_breaker: true,
            },
        )
        .unwrap();

    let response = router
        .send_message(&user_message(), &ChatOptions::default())
        .await
        .unwrap();

    assert_eq!(response.actual_provider, "anthropic");
    assert!(!response.used_fallback);
    assert_eq!(primary.calls(), 0);
    assert_eq!(fallback.calls(), 1);
    assert_eq!(switched.load(Ordering::SeqCst), 1);

    let config = router.router_config();
    assert_eq!(config.primary, "anthropic");
    assert_eq!(config.fallback.as_deref(), Some("kie"));

    let events = router.switch_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, "kie degraded");
}

#[tokio::test]
async fn swap_exchanges_primary_and_fallback() {
    let (router, _primary, _fallback) = test_router();

    router.swap_providers().unwrap();
    let config = router.router_config();
    assert_eq!(config.primary, "anthropic");
    assert_eq!(config.fallback.as_deref(), Some("kie"));

    // Swapping with no fallback configured is rejected
    router
        .update_router_config(RouterConfigUpdate {
            fallback: Some(None),
            ..RouterConfigUpdate::default()
        })
        .unwrap();
    assert!(matches!(
        router.swap_providers(),
        Err(Error::NoFallbackConfigured)
    ));
}

#[tokio::test]
async fn runtime_mutators_reject_fallback_equal_to_primary() {
    let (router, _primary, _fallback) = test_router();

    // Promoting the current fallback without replacing it would leave the
    // router failing over to the provider it just promoted
    let err = router
        .set_primary_provider("anthropic", SwitchOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Config { .. }));

    let err = router
        .set_primary_provider(
            "anthropic",
            SwitchOptions {
                fallback: Some(Some("anthropic".to_string())),
                ..SwitchOptions::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, Error::Config { .. }));

    let err = router
        .update_router_config(RouterConfigUpdate {
            fallback: Some(Some("kie".to_string())),
            ..RouterConfigUpdate::default()
        })
        .unwrap_err();
    assert!(matches!(err, Error::Config { .. }));

    // Nothing changed and no switch was recorded
    let config = router.router_config();
    assert_eq!(config.primary, "kie");
    assert_eq!(config.fallback.as_deref(), Some("anthropic"));
    assert!(router.switch_events().is_empty());
}

#[tokio::test]
async fn switching_to_unknown_provider_is_rejected() {
    let (router, _primary, _fallback) = test_router();
    let err = router
        .set_primary_provider("ollama", SwitchOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::UnknownProvider { .. }));
    assert!(router.switch_events().is_empty());
}

#[tokio::test]
async fn vision_requests_route_to_capable_provider_only() {
    let router = AiRouter::new(RouterConfig::default());
    let primary = Arc::new(MockProvider::new("kie"));
    let capable = Arc::new(MockProvider::new("anthropic").with_vision());
    router.register_provider(Arc::clone(&primary) as Arc<dyn ChatProvider>);
    router.register_provider(Arc::clone(&capable) as Arc<dyn ChatProvider>);

    let messages = vec![
        ChatMessage::user("what is in this image?")
            .with_images(vec!["data:image/png;base64,AAAA".to_string()]),
    ];
    let response = router
        .send_message(&messages, &ChatOptions::default())
        .await
        .unwrap();

    assert_eq!(response.actual_provider, "anthropic");
    assert_eq!(primary.calls(), 0);
    assert_eq!(capable.calls(), 1);
}

#[tokio::test]
async fn vision_request_without_capable_provider_fails() {
    let (router, primary, fallback) = test_router();

    let messages = vec![ChatMessage::user("describe").with_images(vec!["img".to_string()])];
    let err = router
        .send_message(&messages, &ChatOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoProviderAvailable { .. }));
    assert_eq!(primary.calls(), 0);
    assert_eq!(fallback.calls(), 0);
}

#[tokio::test]
async fn streaming_failover_emits_fallback_chunks() {
    let (router, primary, _fallback) = test_router();
    primary.fail_next(Error::provider("kie", "ECONNRESET"));

    let chunks = Arc::new(Mutex::new(Vec::new()));
    let sink_chunks = Arc::clone(&chunks);
    let on_chunk = move |chunk: &str| {
        sink_chunks.lock().unwrap().push(chunk.to_string());
    };

    let response = router
        .send_message_stream(&user_message(), &ChatOptions::default(), &on_chunk)
        .await
        .unwrap();

    assert!(response.used_fallback);
    let chunks = chunks.lock().unwrap();
    assert_eq!(chunks.as_slice(), ["answer from anthropic"]);
}

#[tokio::test]
async fn cost_tracking_accumulates_and_reports_savings() {
    let (router, _primary, _fallback) = test_router();

    // Zero traffic: no division by zero, zero percent
    let empty = router.cost_savings();
    assert_eq!(empty.hypothetical_cost_usd, 0.0);
    assert_eq!(empty.savings_percent, 0.0);

    for _ in 0..3 {
        router
            .send_message(&user_message(), &ChatOptions::default())
            .await
            .unwrap();
    }

    let costs = router.cost_tracking();
    let kie = &costs["kie"];
    assert_eq!(kie.requests, 3);
    assert_eq!(kie.input_tokens, 3_000);
    assert_eq!(kie.output_tokens, 1_500);
    // gpt-4o at $1.75/$7.00 per Mtok
    let expected = 3.0 * (1_000.0 / 1e6 * 1.75 + 500.0 / 1e6 * 7.0);
    assert!((kie.cost_usd - expected).abs() < 1e-9);

    // Reference pricing (anthropic claude-sonnet-4 at $3/$15) costs more
    let savings = router.cost_savings();
    assert_eq!(savings.reference_provider, "anthropic");
    assert!(savings.hypothetical_cost_usd > savings.actual_cost_usd);
    assert!(savings.savings_usd > 0.0);
    assert!(savings.savings_percent > 0.0);

    router.reset_cost_tracking();
    assert!(router.cost_tracking().is_empty());
}

#[tokio::test]
async fn cost_tracking_can_be_disabled() {
    let (router, _primary, _fallback) = test_router();
    router
        .update_router_config(RouterConfigUpdate {
            cost_tracking: Some(false),
            ..RouterConfigUpdate::default()
        })
        .unwrap();

    router
        .send_message(&user_message(), &ChatOptions::default())
        .await
        .unwrap();
    assert!(router.cost_tracking().is_empty());
}

#[tokio::test]
async fn health_check_reports_answering_provider() {
    let (router, _primary, _fallback) = test_router();
    let report = router.health_check().await.unwrap();
    assert_eq!(report.actual_provider, "kie");
    assert!(!report.used_fallback);
    assert!(report.health.healthy);
}

#[tokio::test]
async fn provider_status_reflects_registration_and_breakers() {
    let (router, _primary, _fallback) = test_router();
    let mut status = router.provider_status();
    status.sort_by(|a, b| a.name.cmp(&b.name));

    assert_eq!(status.len(), 2);
    assert_eq!(status[0].name, "anthropic");
    assert!(status[0].initialized);
    assert_eq!(status[1].name, "kie");
    assert_eq!(status[1].breaker.state.to_string(), "closed");
}

#[tokio::test]
async fn ask_returns_plain_answer_text() {
    let (router, _primary, _fallback) = test_router();
    let answer = router.ask("hello").await.unwrap();
    assert_eq!(answer, "answer from kie");
}
