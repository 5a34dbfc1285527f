//! Risk guardrails: the one component allowed to veto or shrink an intent.
//! It never changes an intent's type, and a rejection is a structured
//! verdict, not an error.

use crate::config::Config;
use crate::decision::{Intent, IntentKind};
use crate::executor::{Position, TradeResult, TradeStatus};
use crate::logging::{json_log, obj, v_bool, v_num, v_str};
use crate::state::Mode;

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub max_position_size_pct: f64,
    pub max_total_exposure_pct: f64,
    pub max_daily_loss_pct: f64,
    pub daily_trade_limit: Option<u32>,
}

impl RiskConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_position_size_pct: cfg.max_position_size_pct,
            max_total_exposure_pct: cfg.max_total_exposure_pct,
            max_daily_loss_pct: cfg.max_daily_loss_pct,
            daily_trade_limit: cfg.daily_trade_limit,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size_pct: 10.0,
            max_total_exposure_pct: 50.0,
            max_daily_loss_pct: 5.0,
            daily_trade_limit: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskVerdict {
    pub approved: bool,
    pub reason: Option<String>,
    pub adjusted_size_pct: Option<f64>,
}

impl RiskVerdict {
    fn approve() -> Self {
        Self { approved: true, reason: None, adjusted_size_pct: None }
    }

    fn reject(reason: String) -> Self {
        Self { approved: false, reason: Some(reason), adjusted_size_pct: None }
    }
}

pub struct RiskGuardrails {
    cfg: RiskConfig,
    ledger: Vec<TradeResult>,
    daily_realized_pnl: f64,
    day_start_value: f64,
}

impl RiskGuardrails {
    pub fn new(cfg: RiskConfig, day_start_value: f64) -> Self {
        Self { cfg, ledger: Vec::new(), daily_realized_pnl: 0.0, day_start_value }
    }

    pub fn ledger(&self) -> &[TradeResult] {
        &self.ledger
    }

    pub fn daily_realized_pnl(&self) -> f64 {
        self.daily_realized_pnl
    }

    fn trades_today(&self) -> usize {
        self.ledger
            .iter()
            .filter(|t| t.status == TradeStatus::Filled)
            .count()
    }

    /// Pure function of the accumulated daily PnL against the day-start
    /// baseline. Re-evaluated on every check, never cached.
    pub fn should_enter_safe_mode(&self) -> bool {
        if self.day_start_value <= 0.0 {
            return false;
        }
        self.daily_realized_pnl < 0.0
            && self.daily_realized_pnl.abs()
                >= self.day_start_value * self.cfg.max_daily_loss_pct / 100.0
    }

    pub fn check_intent(
        &self,
        intent: &Intent,
        positions: &[Position],
        capital: f64,
    ) -> RiskVerdict {
        let verdict = self.evaluate(intent, positions, capital);
        json_log(
            "risk_guard",
            obj(&[
                ("intent_id", v_str(&intent.id)),
                ("kind", v_str(intent.kind.label())),
                ("approved", v_bool(verdict.approved)),
                (
                    "reason",
                    verdict.reason.as_deref().map(v_str).unwrap_or(serde_json::Value::Null),
                ),
                (
                    "adjusted_size_pct",
                    verdict.adjusted_size_pct.map(v_num).unwrap_or(serde_json::Value::Null),
                ),
            ]),
        );
        verdict
    }

    fn evaluate(&self, intent: &Intent, positions: &[Position], capital: f64) -> RiskVerdict {
        if intent.kind.is_passive() {
            return RiskVerdict::approve();
        }

        if let Some(limit) = self.cfg.daily_trade_limit {
            if self.trades_today() >= limit as usize {
                return RiskVerdict::reject(format!(
                    "daily trade limit of {} reached",
                    limit
                ));
            }
        }

        if self.should_enter_safe_mode() {
            return RiskVerdict::reject(format!(
                "safe mode: daily loss {:.2} breached {:.1}% of {:.2}",
                self.daily_realized_pnl, self.cfg.max_daily_loss_pct, self.day_start_value
            ));
        }

        if intent.kind.increases_exposure() && intent.state.mode == Mode::SafeMode {
            return RiskVerdict::reject("safe mode active, no new exposure".to_string());
        }

        if intent.kind.increases_exposure() {
            let Some(size_pct) = intent.size_pct else {
                return RiskVerdict::reject("sizing missing on capital intent".to_string());
            };

            if matches!(intent.kind, IntentKind::Enter) {
                let exposure: f64 = positions.iter().map(|p| p.market_value()).sum();
                let exposure_pct = if capital > 0.0 {
                    exposure / capital * 100.0
                } else {
                    100.0
                };
                if exposure_pct >= self.cfg.max_total_exposure_pct {
                    return RiskVerdict::reject(format!(
                        "total exposure {:.1}% at or over limit {:.1}%",
                        exposure_pct, self.cfg.max_total_exposure_pct
                    ));
                }
            }

            if size_pct > self.cfg.max_position_size_pct {
                // Shrink, never reject, for an oversized ask.
                return RiskVerdict {
                    approved: true,
                    reason: Some(format!(
                        "size clamped from {:.1}% to {:.1}%",
                        size_pct, self.cfg.max_position_size_pct
                    )),
                    adjusted_size_pct: Some(self.cfg.max_position_size_pct),
                };
            }
        }

        RiskVerdict::approve()
    }

    /// The only way daily counters grow.
    pub fn record_trade(&mut self, trade: &TradeResult) {
        if trade.status == TradeStatus::Filled {
            if let Some(pnl) = trade.realized_pnl {
                self.daily_realized_pnl += pnl;
            }
        }
        self.ledger.push(trade.clone());
    }

    /// Caller-invoked at the calendar-day boundary; the guardrails have no
    /// clock of their own.
    pub fn reset_daily(&mut self, day_start_value: f64) {
        self.ledger.clear();
        self.daily_realized_pnl = 0.0;
        self.day_start_value = day_start_value;
        json_log(
            "risk_guard",
            obj(&[
                ("event", v_str("daily_reset")),
                ("day_start_value", v_num(day_start_value)),
            ]),
        );
    }
}

// =============================================================================
// Tests
// =============================================================================
