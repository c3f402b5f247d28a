//! AI Router Module
//!
//! Single entry point for sending AI requests. Implements the same contract
//! as a plain provider so it is a drop-in substitute, while adding failure
//! classification, transparent failover to a fallback provider, per-provider
//! circuit breaking, cost accounting, and runtime hot-swap of the primary.

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStatus};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::events::{EventHistory, ObserverList};
use crate::pricing::PricingTable;
use crate::provider::{
    ChatMessage, ChatOptions, ChatProvider, ChunkSink, ProviderHealth, ProviderUsage,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Retained failover events
const FAILOVER_HISTORY_CAPACITY: usize = 100;
/// Retained provider switch events
const SWITCH_HISTORY_CAPACITY: usize = 50;

/// Router configuration, hot-swappable at runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Provider tried first for every request
    pub primary: String,
    /// Provider tried when the primary fails with a recoverable error
    pub fallback: Option<String>,
    /// Fail over on recoverable non-timeout errors
    pub fallback_on_error: bool,
    /// Fail over on timeout errors
    pub fallback_on_timeout: bool,
    /// Advisory timeout forwarded to provider adapters
    pub timeout_ms: u64,
    /// Record per-provider token/cost accumulators
    pub cost_tracking: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            primary: "kie".to_string(),
            fallback: Some("anthropic".to_string()),
            fallback_on_error: true,
            fallback_on_timeout: true,
            timeout_ms: 30_000,
            cost_tracking: true,
        }
    }
}

/// Partial update applied to the live router configuration.
///
/// The primary provider is changed through
/// [`AiRouter::set_primary_provider`], which records a switch event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouterConfigUpdate {
    /// `Some(None)` clears the fallback, `Some(Some(name))` replaces it
    pub fallback: Option<Option<String>>,
    pub fallback_on_error: Option<bool>,
    pub fallback_on_timeout: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub cost_tracking: Option<bool>,
}

/// Failure categories eligible for transparent failover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RateLimit,
    ServerError,
    NetworkError,
    /// The provider's circuit breaker refused the request
    CircuitOpen,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RateLimit => write!(f, "rate_limit"),
            FailureKind::ServerError => write!(f, "server_error"),
            FailureKind::NetworkError => write!(f, "network_error"),
            FailureKind::CircuitOpen => write!(f, "circuit_open"),
        }
    }
}

/// Classify a provider failure. `None` means the error is not recoverable by
/// retrying elsewhere (authentication, malformed request) and must surface to
/// the caller unchanged: failing over on those would double-charge and mask a
/// real bug.
pub fn classify_failure(error: &Error) -> Option<FailureKind> {
    let (status, message) = match error {
        Error::CircuitOpen { .. } => return Some(FailureKind::CircuitOpen),
        Error::Provider {
            status, message, ..
        } => (*status, message.to_lowercase()),
        _ => return None,
    };

    if let Some(status) = status {
        if status == 429 {
            return Some(FailureKind::RateLimit);
        }
        // 404 is treated as provider-unavailable, not a request error
        if status >= 500 || status == 404 {
            return Some(FailureKind::ServerError);
        }
    }

    const TIMEOUT: &[&str] = &["timeout", "etimedout", "abort"];
    const RATE_LIMIT: &[&str] = &["rate limit", "too many requests", "429"];
    const SERVER: &[&str] = &["server error", "internal error", "no message available"];
    const NETWORK: &[&str] = &[
        "econnreset",
        "connection reset",
        "econnrefused",
        "connection refused",
        "network",
        "fetch failed",
        "socket",
    ];

    let contains = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

    if contains(TIMEOUT) {
        Some(FailureKind::Timeout)
    } else if contains(RATE_LIMIT) {
        Some(FailureKind::RateLimit)
    } else if contains(SERVER) {
        Some(FailureKind::ServerError)
    } else if contains(NETWORK) {
        Some(FailureKind::NetworkError)
    } else {
        None
    }
}

/// Record of one failover attempt
#[derive(Debug, Clone, Serialize)]
pub struct FailoverEvent {
    pub timestamp: DateTime<Utc>,
    pub primary_provider: String,
    pub fallback_provider: String,
    pub reason: String,
    pub error_kind: FailureKind,
    pub original_error: String,
}

/// Record of one hot-swap of the primary provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSwitchEvent {
    pub timestamp: DateTime<Utc>,
    pub previous_primary: String,
    pub new_primary: String,
    pub previous_fallback: Option<String>,
    pub new_fallback: Option<String>,
    pub reason: String,
    /// Best-effort snapshot at the moment of the switch
    pub in_flight_requests: u64,
}

/// Options for [`AiRouter::set_primary_provider`]
#[derive(Debug, Clone, Default)]
pub struct SwitchOptions {
    pub reason: Option<String>,
    /// `Some(None)` clears the fallback, `Some(Some(name))` replaces it,
    /// `None` leaves it unchanged
    pub fallback: Option<Option<String>>,
    /// Reset the new primary's breaker so it does not inherit stale failure
    /// history when deliberately re-enabled
    pub reset_breaker: bool,
}

/// Per-provider cost accumulator, reset only by explicit administrative action
#[derive(Debug, Clone, Default, Serialize)]
pub struct CostTrackingEntry {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Unified response annotated with which provider actually served it
#[derive(Debug, Clone, Serialize)]
pub struct RoutedResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub actual_provider: String,
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failover_reason: Option<String>,
    pub latency_ms: u64,
}

/// Health probe result annotated with the provider that answered
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub actual_provider: String,
    pub used_fallback: bool,
    pub health: ProviderHealth,
    pub latency_ms: u64,
}

/// Read model for one registered provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub initialized: bool,
    pub supports_vision: bool,
    pub usage: ProviderUsage,
    pub breaker: CircuitBreakerStatus,
}

/// Running totals and bounded failover history
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub total_requests: u64,
    pub primary_successes: u64,
    pub fallback_successes: u64,
    pub total_failures: u64,
    pub in_flight_requests: u64,
    pub failover_events: Vec<FailoverEvent>,
}

/// Savings report against the reference provider's list price
#[derive(Debug, Clone, Serialize)]
pub struct CostSavings {
    pub actual_cost_usd: f64,
    pub hypothetical_cost_usd: f64,
    pub savings_usd: f64,
    pub savings_percent: f64,
    pub reference_provider: String,
}

/// Outcome of a routed operation, before response annotation
struct Routed<T> {
    value: T,
    actual_provider: String,
    used_fallback: bool,
    failover_reason: Option<String>,
}

/// Decrements the in-flight counter on every exit path
struct InFlightGuard<'a>(&'a AtomicU64);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Provider router with failover, circuit breaking, cost accounting, and
/// hot-swap. Construct one per process at the composition root and share it
/// behind an `Arc`.
pub struct AiRouter {
    providers: DashMap<String, Arc<dyn ChatProvider>>,
    config: RwLock<RouterConfig>,
    breakers: CircuitBreakerRegistry,
    pricing: PricingTable,
    costs: DashMap<String, CostTrackingEntry>,
    failovers: EventHistory<FailoverEvent>,
    switches: EventHistory<ProviderSwitchEvent>,
    switch_observers: ObserverList<ProviderSwitchEvent>,
    total_requests: AtomicU64,
    primary_successes: AtomicU64,
    fallback_successes: AtomicU64,
    total_failures: AtomicU64,
    in_flight: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl AiRouter {
    /// Create a router with the built-in pricing table, default breaker
    /// configuration, and the system clock
    pub fn new(config: RouterConfig) -> Self {
        Self::with_parts(
            config,
            PricingTable::builtin(),
            CircuitBreakerConfig::default(),
            Arc::new(SystemClock),
        )
    }

    /// Create a router with every dependency injected
    pub fn with_parts(
        config: RouterConfig,
        pricing: PricingTable,
        breaker_config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            providers: DashMap::new(),
            config: RwLock::new(config),
            breakers: CircuitBreakerRegistry::new(breaker_config, Arc::clone(&clock)),
            pricing,
            costs: DashMap::new(),
            failovers: EventHistory::new(FAILOVER_HISTORY_CAPACITY),
            switches: EventHistory::new(SWITCH_HISTORY_CAPACITY),
            switch_observers: ObserverList::new(),
            total_requests: AtomicU64::new(0),
            primary_successes: AtomicU64::new(0),
            fallback_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            clock,
        }
    }

    /// Register a provider adapter under its own name
    pub fn register_provider(&self, provider: Arc<dyn ChatProvider>) {
        info!(provider = provider.name(), "provider registered");
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Names of all registered providers
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|e| e.key().clone()).collect()
    }

    fn initialized_provider(&self, name: &str) -> Option<Arc<dyn ChatProvider>> {
        self.providers
            .get(name)
            .filter(|p| p.is_initialized())
            .map(|p| Arc::clone(p.value()))
    }

    fn config_snapshot(&self) -> RouterConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Core routing algorithm shared by every operation.
    ///
    /// The configuration is snapshotted once at entry, so a concurrent
    /// hot-swap never affects a request already in flight.
    async fn route<T, F, Fut>(&self, operation: &str, op: F) -> Result<Routed<T>>
    where
        F: Fn(Arc<dyn ChatProvider>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let _guard = InFlightGuard(&self.in_flight);

        let cfg = self.config_snapshot();
        let fallback = cfg
            .fallback
            .as_deref()
            .and_then(|name| self.initialized_provider(name));

        let Some(primary) = self.initialized_provider(&cfg.primary) else {
            // Primary absent entirely: go straight to the fallback
            let Some(fallback) = fallback else {
                warn!(operation, "no provider initialized");
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                return Err(Error::no_provider(operation));
            };
            let fallback_name = fallback.name().to_string();
            debug!(operation, fallback = %fallback_name, "primary not initialized, using fallback");
            let breaker = self.breakers.breaker(&fallback_name);
            return match breaker.execute(|| op(Arc::clone(&fallback))).await {
                Ok(value) => {
                    self.fallback_successes.fetch_add(1, Ordering::Relaxed);
                    Ok(Routed {
                        value,
                        actual_provider: fallback_name,
                        used_fallback: true,
                        failover_reason: Some("Primary provider not initialized".to_string()),
                    })
                }
                Err(e) => {
                    self.total_failures.fetch_add(1, Ordering::Relaxed);
                    Err(e)
                }
            };
        };

        let breaker = self.breakers.breaker(&cfg.primary);
        let primary_error = match breaker.execute(|| op(Arc::clone(&primary))).await {
            Ok(value) => {
                self.primary_successes.fetch_add(1, Ordering::Relaxed);
                return Ok(Routed {
                    value,
                    actual_provider: cfg.primary,
                    used_fallback: false,
                    failover_reason: None,
                });
            }
            Err(e) => e,
        };

        let kind = classify_failure(&primary_error)
            .filter(|kind| failover_enabled(&cfg, *kind));

        let (Some(kind), Some(fallback)) = (kind, fallback) else {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
            return Err(primary_error);
        };

        let fallback_name = fallback.name().to_string();
        let reason = format!("{kind} on primary provider");
        warn!(
            operation,
            primary = %cfg.primary,
            fallback = %fallback_name,
            error_kind = %kind,
            error = %primary_error,
            "failing over"
        );
        self.failovers.push(FailoverEvent {
            timestamp: self.clock.now(),
            primary_provider: cfg.primary.clone(),
            fallback_provider: fallback_name.clone(),
            reason: reason.clone(),
            error_kind: kind,
            original_error: primary_error.to_string(),
        });

        let fallback_breaker = self.breakers.breaker(&fallback_name);
        match fallback_breaker.execute(|| op(Arc::clone(&fallback))).await {
            Ok(value) => {
                self.fallback_successes.fetch_add(1, Ordering::Relaxed);
                Ok(Routed {
                    value,
                    actual_provider: fallback_name,
                    used_fallback: true,
                    failover_reason: Some(reason),
                })
            }
            Err(fallback_error) => {
                // Surface the fallback's real error, not a generic wrapper
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                Err(fallback_error)
            }
        }
    }

    /// Send a chat request through the failover pipeline.
    ///
    /// Image-bearing messages are dispatched to the vision path instead and
    /// never fail over (see [`Self::send_vision_message`]).
    pub async fn send_message(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<RoutedResponse> {
        if messages.iter().any(ChatMessage::has_images) {
            return self.send_vision_message(messages, options).await;
        }

        let started = std::time::Instant::now();
        let routed = self
            .route("send_message", |provider| async move {
                provider.send_message(messages, options).await
            })
            .await?;
        Ok(self.annotate(routed, started))
    }

    /// Streaming variant of [`Self::send_message`]. Chunks emitted before a
    /// primary failure may be followed by the fallback's chunks.
    pub async fn send_message_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
        on_chunk: &ChunkSink,
    ) -> Result<RoutedResponse> {
        let started = std::time::Instant::now();
        let routed = self
            .route("send_message_stream", |provider| async move {
                provider.send_message_stream(messages, options, on_chunk).await
            })
            .await?;
        Ok(self.annotate(routed, started))
    }

    /// Convenience wrapper: single user prompt in, answer text out
    pub async fn ask(&self, prompt: &str) -> Result<String> {
        let messages = [ChatMessage::user(prompt)];
        let response = self.send_message(&messages, &ChatOptions::default()).await?;
        Ok(response.content)
    }

    /// Health probe through the failover pipeline
    pub async fn health_check(&self) -> Result<HealthReport> {
        let started = std::time::Instant::now();
        let routed = self
            .route("health_check", |provider| async move {
                provider.health_check().await
            })
            .await?;
        Ok(HealthReport {
            actual_provider: routed.actual_provider,
            used_fallback: routed.used_fallback,
            health: routed.value,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Vision requests bypass failover entirely: they are routed only to an
    /// initialized provider that supports multimodal input (the primary is
    /// preferred). Degrading to a provider that would silently ignore the
    /// images is worse than failing.
    pub async fn send_vision_message(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<RoutedResponse> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let _guard = InFlightGuard(&self.in_flight);

        let cfg = self.config_snapshot();
        let provider = self
            .initialized_provider(&cfg.primary)
            .filter(|p| p.supports_vision())
            .or_else(|| {
                self.providers
                    .iter()
                    .filter(|e| e.value().is_initialized() && e.value().supports_vision())
                    .map(|e| Arc::clone(e.value()))
                    .next()
            });

        let Some(provider) = provider else {
            warn!("vision request with no multimodal-capable provider");
            self.total_failures.fetch_add(1, Ordering::Relaxed);
            return Err(Error::no_provider("send_vision_message"));
        };

        let name = provider.name().to_string();
        let started = std::time::Instant::now();
        let breaker = self.breakers.breaker(&name);
        let target = Arc::clone(&provider);
        match breaker
            .execute(move || async move { target.send_message(messages, options).await })
            .await
        {
            Ok(response) => {
                if name == cfg.primary {
                    self.primary_successes.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.fallback_successes.fetch_add(1, Ordering::Relaxed);
                }
                let routed = Routed {
                    value: response,
                    actual_provider: name,
                    used_fallback: false,
                    failover_reason: None,
                };
                Ok(self.annotate(routed, started))
            }
            Err(e) => {
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Read model across all registered providers: adapter state, usage, and
    /// breaker status. Local projection, no upstream calls.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.providers
            .iter()
            .map(|entry| {
                let provider = entry.value();
                ProviderStatus {
                    name: provider.name().to_string(),
                    initialized: provider.is_initialized(),
                    supports_vision: provider.supports_vision(),
                    usage: provider.usage_stats(),
                    breaker: self.breakers.breaker(provider.name()).status(),
                }
            })
            .collect()
    }

    fn annotate(&self, routed: Routed<crate::provider::ChatResponse>, started: std::time::Instant) -> RoutedResponse {
        let response = routed.value;
        if self.config_snapshot().cost_tracking {
            self.record_cost(
                &routed.actual_provider,
                &response.model,
                response.input_tokens,
                response.output_tokens,
            );
        }
        RoutedResponse {
            content: response.content,
            model: response.model,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            actual_provider: routed.actual_provider,
            used_fallback: routed.used_fallback,
            failover_reason: routed.failover_reason,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn record_cost(&self, provider: &str, model: &str, input_tokens: u64, output_tokens: u64) {
        let cost = self.pricing.cost(provider, model, input_tokens, output_tokens);
        let mut entry = self.costs.entry(provider.to_string()).or_default();
        entry.requests += 1;
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;
        entry.cost_usd += cost;
        debug!(provider, model, cost_usd = cost, "recorded cost");
    }

    /// Hot-swap the primary provider for all future requests. In-flight
    /// requests keep the provider they captured at entry. Rejected when the
    /// resulting fallback would equal the new primary.
    pub fn set_primary_provider(&self, name: &str, options: SwitchOptions) -> Result<()> {
        if !self.providers.contains_key(name) {
            return Err(Error::unknown_provider(name));
        }
        if let Some(Some(fallback)) = options.fallback.as_ref() {
            if !self.providers.contains_key(fallback) {
                return Err(Error::unknown_provider(fallback));
            }
        }

        let event = {
            let mut cfg = self.config.write().unwrap_or_else(PoisonError::into_inner);
            let new_fallback = options.fallback.unwrap_or_else(|| cfg.fallback.clone());
            if new_fallback.as_deref() == Some(name) {
                return Err(Error::config("fallback must differ from primary"));
            }
            let event = ProviderSwitchEvent {
                timestamp: self.clock.now(),
                previous_primary: cfg.primary.clone(),
                new_primary: name.to_string(),
                previous_fallback: cfg.fallback.clone(),
                new_fallback: new_fallback.clone(),
                reason: options
                    .reason
                    .unwrap_or_else(|| "manual switch".to_string()),
                in_flight_requests: self.in_flight.load(Ordering::Relaxed),
            };
            cfg.primary = name.to_string();
            cfg.fallback = new_fallback;
            event
        };

        if options.reset_breaker {
            self.breakers.breaker(name).reset();
        }

        info!(
            previous = %event.previous_primary,
            new = %event.new_primary,
            reason = %event.reason,
            in_flight = event.in_flight_requests,
            "primary provider switched"
        );
        self.switch_observers.notify(&event);
        self.switches.push(event);
        Ok(())
    }

    /// Exchange primary and fallback. Rejected when no fallback is configured.
    pub fn swap_providers(&self) -> Result<()> {
        let cfg = self.config_snapshot();
        let Some(fallback) = cfg.fallback else {
            return Err(Error::NoFallbackConfigured);
        };
        self.set_primary_provider(
            &fallback,
            SwitchOptions {
                reason: Some("swap with fallback".to_string()),
                fallback: Some(Some(cfg.primary)),
                reset_breaker: false,
            },
        )
    }

    /// Current router configuration
    pub fn router_config(&self) -> RouterConfig {
        self.config_snapshot()
    }

    /// Apply a partial configuration update
    pub fn update_router_config(&self, update: RouterConfigUpdate) -> Result<()> {
        if let Some(Some(fallback)) = update.fallback.as_ref() {
            if !self.providers.contains_key(fallback) {
                return Err(Error::unknown_provider(fallback));
            }
        }
        if let Some(timeout_ms) = update.timeout_ms {
            if timeout_ms == 0 {
                return Err(Error::config("timeout_ms must be positive"));
            }
        }

        let mut cfg = self.config.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(fallback) = update.fallback {
            if fallback.as_deref() == Some(cfg.primary.as_str()) {
                return Err(Error::config("fallback must differ from primary"));
            }
            cfg.fallback = fallback;
        }
        if let Some(on_error) = update.fallback_on_error {
            cfg.fallback_on_error = on_error;
        }
        if let Some(on_timeout) = update.fallback_on_timeout {
            cfg.fallback_on_timeout = on_timeout;
        }
        if let Some(timeout_ms) = update.timeout_ms {
            cfg.timeout_ms = timeout_ms;
        }
        if let Some(cost_tracking) = update.cost_tracking {
            cfg.cost_tracking = cost_tracking;
        }
        info!("router configuration updated");
        Ok(())
    }

    /// Subscribe to provider switch events
    pub fn on_provider_switch<F>(&self, observer: F)
    where
        F: Fn(&ProviderSwitchEvent) + Send + Sync + 'static,
    {
        self.switch_observers.subscribe(observer);
    }

    /// Running totals and bounded failover history
    pub fn router_stats(&self) -> RouterStats {
        RouterStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            primary_successes: self.primary_successes.load(Ordering::Relaxed),
            fallback_successes: self.fallback_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            in_flight_requests: self.in_flight.load(Ordering::Relaxed),
            failover_events: self.failovers.snapshot(),
        }
    }

    /// Bounded history of provider switches
    pub fn switch_events(&self) -> Vec<ProviderSwitchEvent> {
        self.switches.snapshot()
    }

    /// Per-provider cost accumulators
    pub fn cost_tracking(&self) -> HashMap<String, CostTrackingEntry> {
        self.costs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Administrative reset of the cost accumulators
    pub fn reset_cost_tracking(&self) {
        self.costs.clear();
        info!("cost tracking reset");
    }

    /// What the entire traffic would have cost at the reference provider's
    /// list price, versus what was actually spent
    pub fn cost_savings(&self) -> CostSavings {
        let reference = self.pricing.reference_price();
        let mut actual = 0.0;
        let mut hypothetical = 0.0;
        for entry in self.costs.iter() {
            actual += entry.cost_usd;
            hypothetical += reference.cost(entry.input_tokens, entry.output_tokens);
        }

        let savings = hypothetical - actual;
        let savings_percent = if hypothetical > 0.0 {
            savings / hypothetical * 100.0
        } else {
            0.0
        };
        CostSavings {
            actual_cost_usd: actual,
            hypothetical_cost_usd: hypothetical,
            savings_usd: savings,
            savings_percent,
            reference_provider: self.pricing.reference_provider().to_string(),
        }
    }

    /// Breaker snapshot across all providers
    pub fn breaker_status(&self) -> HashMap<String, CircuitBreakerStatus> {
        self.breakers.all_status()
    }

    /// Breaker registry, for administrative access to individual breakers
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }
}

/// Whether the configuration permits failover for the given failure kind
fn failover_enabled(cfg: &RouterConfig, kind: FailureKind) -> bool {
    match kind {
        FailureKind::Timeout => cfg.fallback_on_timeout,
        _ => cfg.fallback_on_error,
    }
}
