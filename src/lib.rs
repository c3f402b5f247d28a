//! AI provider resilience layer
//!
//! Routes chat requests to one of several interchangeable upstream AI
//! providers, classifies failures, fails over to a backup provider
//! transparently, tracks per-provider health with a circuit breaker,
//! supports runtime hot-swap of the primary provider, enforces a monthly
//! spending budget, and reports cost/savings analytics.
//!
//! Construct the pieces at the process's composition root and share them
//! behind `Arc`s; tests build fresh instances with a [`clock::ManualClock`]
//! to simulate elapsed time deterministically.

pub mod budget;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod pricing;
pub mod provider;
pub mod router;

pub use budget::{BudgetAlert, BudgetAlertKind, BudgetConfig, BudgetManager, BudgetStatus};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStatus,
    CircuitState,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigLoader};
pub use error::{Error, Result};
pub use pricing::{ModelPrice, PricingTable};
pub use provider::{ChatMessage, ChatOptions, ChatProvider, ChatResponse};
pub use router::{
    AiRouter, CostSavings, FailoverEvent, FailureKind, ProviderSwitchEvent, RoutedResponse,
    RouterConfig, RouterStats, SwitchOptions,
};
