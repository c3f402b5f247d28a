//! Budget Manager Module
//!
//! Enforces a monthly USD spending ceiling independent of which provider
//! served a request. Month rollover is checked and applied atomically with
//! spend mutation: every entry point takes the same lock, so two calls racing
//! across a month boundary cannot straddle two months.

use crate::clock::Clock;
use crate::events::{EventHistory, ObserverList};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Retained budget alerts
const ALERT_HISTORY_CAPACITY: usize = 100;

/// Budget configuration, runtime-mutable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Monthly ceiling in USD
    pub monthly_budget_usd: f64,
    /// Percent of the budget at which a warning fires
    pub alert_threshold: f64,
    /// When true, `can_make_request` refuses once the budget is exhausted
    pub block_on_exceed: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_budget_usd: 100.0,
            alert_threshold: 80.0,
            block_on_exceed: false,
        }
    }
}

/// Partial update applied to the live configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BudgetConfigUpdate {
    pub monthly_budget_usd: Option<f64>,
    pub alert_threshold: Option<f64>,
    pub block_on_exceed: Option<bool>,
}

/// Accumulated spend for one calendar month
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlySpend {
    /// "YYYY-MM"
    pub month: String,
    pub total_spend_usd: f64,
    pub request_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl MonthlySpend {
    fn empty(month: String) -> Self {
        Self {
            month,
            total_spend_usd: 0.0,
            request_count: 0,
            input_tokens: 0,
            output_tokens: 0,
            last_updated: None,
        }
    }
}

/// Alert categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAlertKind {
    /// Spend first crossed the alert threshold this month
    ThresholdWarning,
    /// Spend first crossed 100% this month
    BudgetExceeded,
    /// A request was refused because the budget is exhausted
    RequestBlocked,
}

/// Immutable alert record
#[derive(Debug, Clone, Serialize)]
pub struct BudgetAlert {
    pub kind: BudgetAlertKind,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub current_spend: f64,
    pub budget_limit: f64,
    pub percent_used: f64,
    pub remaining_budget: f64,
}

/// Read model returned by [`BudgetManager::budget_status`]
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub month: String,
    pub budget_limit: f64,
    pub current_spend: f64,
    pub remaining_budget: f64,
    pub percent_used: f64,
    pub threshold_alerted: bool,
    pub exceeded_alerted: bool,
    pub block_on_exceed: bool,
}

struct BudgetInner {
    config: BudgetConfig,
    spend: MonthlySpend,
    /// One-shot per month, reset on rollover
    threshold_alerted: bool,
    exceeded_alerted: bool,
}

/// Tracks cumulative monthly spend and raises threshold/exceeded alerts
pub struct BudgetManager {
    inner: Mutex<BudgetInner>,
    alerts: EventHistory<BudgetAlert>,
    observers: ObserverList<BudgetAlert>,
    clock: Arc<dyn Clock>,
}

impl BudgetManager {
    /// Create a manager for the current calendar month
    pub fn new(config: BudgetConfig, clock: Arc<dyn Clock>) -> Self {
        let month = month_key(clock.now());
        Self {
            inner: Mutex::new(BudgetInner {
                config,
                spend: MonthlySpend::empty(month),
                threshold_alerted: false,
                exceeded_alerted: false,
            }),
            alerts: EventHistory::new(ALERT_HISTORY_CAPACITY),
            observers: ObserverList::new(),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BudgetInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the active month when the wall clock has moved on. Must run
    /// under the spend lock so no update straddles two months.
    fn rollover_if_needed(inner: &mut BudgetInner, now: DateTime<Utc>) {
        let current = month_key(now);
        if inner.spend.month != current {
            info!(
                previous = %inner.spend.month,
                current = %current,
                spend = inner.spend.total_spend_usd,
                "budget month rollover"
            );
            inner.spend = MonthlySpend::empty(current);
            inner.threshold_alerted = false;
            inner.exceeded_alerted = false;
        }
    }

    /// Whether a new request is permitted under the budget.
    ///
    /// Always true unless `block_on_exceed` is set; raises a
    /// `request_blocked` alert on each refused call while still exceeded.
    pub fn can_make_request(&self) -> bool {
        let alert = {
            let mut inner = self.lock();
            let now = self.clock.now();
            Self::rollover_if_needed(&mut inner, now);

            if !inner.config.block_on_exceed {
                return true;
            }
            if inner.spend.total_spend_usd < inner.config.monthly_budget_usd {
                return true;
            }
            warn!(
                spend = inner.spend.total_spend_usd,
                budget = inner.config.monthly_budget_usd,
                "request blocked, monthly budget exhausted"
            );
            make_alert(
                BudgetAlertKind::RequestBlocked,
                "Request blocked: monthly budget exhausted",
                &inner,
                now,
            )
        };
        self.raise(alert);
        false
    }

    /// Add a completed request's cost and tokens to the running totals
    pub fn track_spend(&self, cost_usd: f64, input_tokens: u64, output_tokens: u64) {
        let mut raised = Vec::new();
        {
            let mut inner = self.lock();
            let now = self.clock.now();
            Self::rollover_if_needed(&mut inner, now);

            inner.spend.total_spend_usd += cost_usd;
            inner.spend.request_count += 1;
            inner.spend.input_tokens += input_tokens;
            inner.spend.output_tokens += output_tokens;
            inner.spend.last_updated = Some(now);

            let percent = percent_used(inner.spend.total_spend_usd, inner.config.monthly_budget_usd);
            debug!(
                cost_usd,
                total = inner.spend.total_spend_usd,
                percent,
                "tracked spend"
            );

            if !inner.threshold_alerted && percent >= inner.config.alert_threshold {
                inner.threshold_alerted = true;
                raised.push(make_alert(
                    BudgetAlertKind::ThresholdWarning,
                    &format!("Monthly spend crossed {}% of budget", inner.config.alert_threshold),
                    &inner,
                    now,
                ));
            }
            if !inner.exceeded_alerted && percent >= 100.0 {
                inner.exceeded_alerted = true;
                raised.push(make_alert(
                    BudgetAlertKind::BudgetExceeded,
                    "Monthly budget exceeded",
                    &inner,
                    now,
                ));
            }
        }
        for alert in raised {
            self.raise(alert);
        }
    }

    /// Current month, limit, spend, and alert flags
    pub fn budget_status(&self) -> BudgetStatus {
        let mut inner = self.lock();
        let now = self.clock.now();
        Self::rollover_if_needed(&mut inner, now);

        let percent = percent_used(inner.spend.total_spend_usd, inner.config.monthly_budget_usd);
        BudgetStatus {
            month: inner.spend.month.clone(),
            budget_limit: inner.config.monthly_budget_usd,
            current_spend: inner.spend.total_spend_usd,
            remaining_budget: inner.config.monthly_budget_usd - inner.spend.total_spend_usd,
            percent_used: percent,
            threshold_alerted: inner.threshold_alerted,
            exceeded_alerted: inner.exceeded_alerted,
            block_on_exceed: inner.config.block_on_exceed,
        }
    }

    /// Apply a partial configuration update
    pub fn update_config(&self, update: BudgetConfigUpdate) {
        let mut inner = self.lock();
        if let Some(budget) = update.monthly_budget_usd {
            inner.config.monthly_budget_usd = budget;
        }
        if let Some(threshold) = update.alert_threshold {
            inner.config.alert_threshold = threshold;
        }
        if let Some(block) = update.block_on_exceed {
            inner.config.block_on_exceed = block;
        }
        info!(
            budget = inner.config.monthly_budget_usd,
            threshold = inner.config.alert_threshold,
            block = inner.config.block_on_exceed,
            "budget configuration updated"
        );
    }

    /// Current configuration
    pub fn config(&self) -> BudgetConfig {
        self.lock().config.clone()
    }

    /// Retained alerts, oldest first
    pub fn alerts(&self) -> Vec<BudgetAlert> {
        self.alerts.snapshot()
    }

    /// Subscribe to alerts as they are raised
    pub fn on_alert<F>(&self, observer: F)
    where
        F: Fn(&BudgetAlert) + Send + Sync + 'static,
    {
        self.observers.subscribe(observer);
    }

    fn raise(&self, alert: BudgetAlert) {
        warn!(kind = ?alert.kind, message = %alert.message, "budget alert");
        self.observers.notify(&alert);
        self.alerts.push(alert);
    }
}

fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Zero when the budget is non-positive; otherwise unclamped
fn percent_used(spend: f64, budget: f64) -> f64 {
    if budget <= 0.0 {
        0.0
    } else {
        spend / budget * 100.0
    }
}

fn make_alert(
    kind: BudgetAlertKind,
    message: &str,
    inner: &BudgetInner,
    now: DateTime<Utc>,
) -> BudgetAlert {
    BudgetAlert {
        kind,
        timestamp: now,
        message: message.to_string(),
        current_spend: inner.spend.total_spend_usd,
        budget_limit: inner.config.monthly_budget_usd,
        percent_used: percent_used(inner.spend.total_spend_usd, inner.config.monthly_budget_usd),
        remaining_budget: inner.config.monthly_budget_usd - inner.spend.total_spend_usd,
    }
}
