//! The tick loop. One pass runs the whole pipeline in order:
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────────┐
//! │ EventFeed │──►│ SignalEngine │──►│  StateModel  │
//! └───────────┘   └──────────────┘   └──────┬───────┘
//!                                           ▼
//! ┌───────────┐   ┌──────────────┐   ┌──────────────┐
//! │ PaperExec │◄──│  Guardrails  │◄──│   Decision   │
//! └─────┬─────┘   └──────────────┘   └──────────────┘
//!       └── TradeResult feedback ──► StateModel
//! ```
//!
//! No two ticks run concurrently; all mutable state is single-writer inside
//! a tick. A stop request lands between ticks, never mid-tick, and the
//! store is flushed before teardown. Any single-tick failure is logged and
//! ridden out; the loop itself only ends on the stop flag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::timeout;

use crate::clock::Clock;
use crate::config::Config;
use crate::decision::{DecisionConfig, DecisionEngine, Intent, IntentKind};
use crate::events::{EventKind, MarketEvent};
use crate::executor::{Executor, PaperBook, PaperExecutor, TradeResult, TradeStatus};
use crate::feed::EventFeed;
use crate::logging::{self, json_log, log_decision, obj, v_bool, v_num, v_str};
use crate::risk::{RiskConfig, RiskGuardrails};
use crate::signals::{SignalConfig, SignalEngine};
use crate::state::{Mode, StateModel, StateSnapshot};
use crate::storage::{PersistedAgentState, PersistedBook, SnapshotRecord, StateStore};

/// What one tick did, for observers and tests.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub now_ms: u64,
    pub events: usize,
    pub new_signals: usize,
    pub active_signals: usize,
    pub intent: Option<IntentKind>,
    pub intent_approved: Option<bool>,
    pub trade: Option<TradeStatus>,
    pub total_value: f64,
}

pub struct Agent {
    cfg: Config,
    clock: Arc<dyn Clock>,
    feed: Box<dyn EventFeed>,
    signal_engine: SignalEngine,
    state: StateModel,
    decision: DecisionEngine,
    risk: RiskGuardrails,
    executor: PaperExecutor,
    store: StateStore,
    running: Arc<AtomicBool>,
    last_day: u64,
    ticks: u64,
}

impl Agent {
    pub fn new(cfg: Config, clock: Arc<dyn Clock>, feed: Box<dyn EventFeed>) -> Result<Self> {
        let store = StateStore::new(&cfg.sqlite_path)?;
        Self::with_store(cfg, clock, feed, store)
    }

    /// Fatal-at-construction wiring; once built, the loop does not die.
    pub fn with_store(
        cfg: Config,
        clock: Arc<dyn Clock>,
        feed: Box<dyn EventFeed>,
        mut store: StateStore,
    ) -> Result<Self> {
        store.init()?;
        let now_ms = clock.now_ms();

        let (state, book) = match store.load_latest()? {
            Some(snapshot) => {
                json_log(
                    "agent",
                    obj(&[
                        ("event", v_str("restored")),
                        ("snapshot_ts", v_num(snapshot.ts as f64)),
                        ("capital", v_num(snapshot.book.capital)),
                        ("positions", v_num(snapshot.book.positions.len() as f64)),
                    ]),
                );
                (
                    StateModel::from_state(snapshot.state.into_state()),
                    PaperBook::restore(
                        snapshot.book.capital,
                        snapshot.book.positions,
                        cfg.slippage_pct,
                    ),
                )
            }
            None => (
                StateModel::new(now_ms),
                PaperBook::new(cfg.starting_capital, cfg.slippage_pct),
            ),
        };

        let day_start_value = book.total_value();
        let last_day = clock.day();
        Ok(Self {
            signal_engine: SignalEngine::new(SignalConfig::from_config(&cfg)),
            decision: DecisionEngine::new(DecisionConfig {
                intent_cooldown_ms: cfg.intent_cooldown_ms,
                min_signal_confidence: cfg.min_signal_confidence,
            }),
            risk: RiskGuardrails::new(RiskConfig::from_config(&cfg), day_start_value),
            executor: PaperExecutor::new(book),
            state,
            store,
            feed,
            clock,
            cfg,
            running: Arc::new(AtomicBool::new(true)),
            last_day,
            ticks: 0,
        })
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    pub fn book(&self) -> &PaperBook {
        &self.executor.book
    }

    // Control surface: each call maps straight onto the state model's mode.
    pub fn pause(&mut self) {
        self.state.set_mode(Mode::Paused);
    }

    pub fn resume(&mut self) {
        self.state.set_mode(Mode::Active);
    }

    pub fn set_safe_mode(&mut self, enabled: bool) {
        self.state
            .set_mode(if enabled { Mode::SafeMode } else { Mode::Active });
    }

    /// Run ticks until the stop flag clears, then flush and exit. The flag
    /// is only checked between ticks: stops are cooperative, never mid-tick.
    pub async fn run(&mut self) -> Result<()> {
        json_log(
            "agent",
            obj(&[
                ("event", v_str("started")),
                ("config_hash", v_str(&self.cfg.config_hash())),
                ("tracked", v_num(self.cfg.tracked_tokens.len() as f64)),
            ]),
        );
        while self.running.load(Ordering::SeqCst) {
            self.tick().await;
            tokio::time::sleep(Duration::from_millis(self.cfg.tick_ms)).await;
        }
        self.persist();
        logging::flush();
        json_log("agent", obj(&[("event", v_str("stopped"))]));
        Ok(())
    }

    /// One full pass through the pipeline.
    pub async fn tick(&mut self) -> TickReport {
        let now_ms = self.clock.now_ms();
        self.ticks += 1;

        // 1. Pull observations. A dead or slow feed costs us the batch,
        //    not the tick.
        let events = match timeout(
            Duration::from_millis(self.cfg.feed_timeout_ms),
            self.feed.poll(now_ms),
        )
        .await
        {
            Ok(Ok(events)) => events,
            Ok(Err(err)) => {
                json_log(
                    "agent",
                    obj(&[("stage", v_str("feed")), ("error", v_str(&err.to_string()))]),
                );
                Vec::new()
            }
            Err(_) => {
                json_log(
                    "agent",
                    obj(&[("stage", v_str("feed")), ("error", v_str("poll timed out"))]),
                );
                Vec::new()
            }
        };

        // 2. Latest prices feed the book before anything is marked.
        let prices = price_map(&events);
        for (token, price) in &prices {
            self.executor.book.observe_price(token, *price);
        }

        // 3. Signals.
        let new_signals =
            self.signal_engine
                .process_events(&events, &self.cfg.tracked_tokens, now_ms);
        let active = self.signal_engine.update_signals(now_ms);

        // 4. Psychology and mark-to-market.
        self.state.tick(now_ms);
        self.executor.book.update_positions(&prices, now_ms);
        json_log(
            "book",
            obj(&[
                ("capital", v_num(self.executor.book.capital())),
                ("total_value", v_num(self.executor.book.total_value())),
                ("exposure_pct", v_num(self.executor.book.total_exposure_pct())),
                ("positions", v_num(self.executor.book.positions().len() as f64)),
            ]),
        );

        // 5. Day boundary: exactly one reset per calendar day.
        let day = self.clock.day();
        if day != self.last_day {
            self.last_day = day;
            self.risk.reset_daily(self.executor.book.total_value());
        }

        let mut report = TickReport {
            now_ms,
            events: events.len(),
            new_signals: new_signals.len(),
            active_signals: active.len(),
            intent: None,
            intent_approved: None,
            trade: None,
            total_value: self.executor.book.total_value(),
        };

        let snapshot = self.state.snapshot();
        if matches!(snapshot.mode, Mode::Paused | Mode::Frozen) {
            json_log(
                "agent",
                obj(&[
                    ("stage", v_str("decision")),
                    ("skipped", v_str(snapshot.mode.label())),
                ]),
            );
            self.maybe_persist();
            return report;
        }

        // 6. Decide.
        let positions = self.executor.book.positions();
        let Some(mut intent) = self.decision.decide(now_ms, &active, &snapshot, &positions)
        else {
            self.maybe_persist();
            return report;
        };
        report.intent = Some(intent.kind);
        log_decision(
            &intent.id,
            intent.kind.label(),
            intent.token.as_deref(),
            &intent.reason,
            intent.primary_confidence(),
            &intent.alternatives,
        );

        // 7. Guardrails annotate the intent; they are the only writer of
        //    the approval fields.
        let verdict = self
            .risk
            .check_intent(&intent, &positions, self.executor.book.capital());
        intent.approved = Some(verdict.approved);
        intent.adjusted_size_pct = verdict.adjusted_size_pct;
        if !verdict.approved {
            intent.block_reason = verdict.reason;
        }
        report.intent_approved = Some(verdict.approved);
        self.flip_to_safe_mode_if_due();

        // 8. Execute approved capital intents only.
        if verdict.approved && !intent.kind.is_passive() {
            let trade = self.execute(&intent, now_ms).await;
            report.trade = Some(trade.status);
            self.risk.record_trade(&trade);
            self.apply_conviction_feedback(&trade);
            self.state.update_from_trade(&trade, now_ms);
            self.flip_to_safe_mode_if_due();
        }

        report.total_value = self.executor.book.total_value();
        self.maybe_persist();
        report
    }

    async fn execute(&mut self, intent: &Intent, now_ms: u64) -> TradeResult {
        let outcome = timeout(
            Duration::from_millis(self.cfg.exec_timeout_ms),
            self.executor.execute(intent, now_ms),
        )
        .await;
        match outcome {
            Ok(Ok(trade)) => trade,
            Ok(Err(err)) => self.synthesized_failure(intent, now_ms, &err.to_string()),
            Err(_) => self.synthesized_failure(intent, now_ms, "execution timed out"),
        }
    }

    /// A transport-level executor failure still produces a TradeResult so
    /// the state model sees it exactly like a loss.
    fn synthesized_failure(&self, intent: &Intent, now_ms: u64, error: &str) -> TradeResult {
        json_log(
            "agent",
            obj(&[("stage", v_str("execute")), ("error", v_str(error))]),
        );
        TradeResult {
            id: format!("T-err-{}", logging::params_hash(&intent.id)),
            intent_id: intent.id.clone(),
            ts: now_ms,
            kind: intent.kind,
            token: intent.token.clone(),
            requested_size_pct: intent.effective_size_pct(),
            filled_amount: 0.0,
            price: 0.0,
            slippage_pct: self.cfg.slippage_pct,
            status: TradeStatus::Failed,
            error: Some(error.to_string()),
            realized_pnl: None,
            tx_signature: None,
            signal_ids: intent.signal_ids.clone(),
        }
    }

    /// Safe mode is entered automatically and only left via the control
    /// surface.
    fn flip_to_safe_mode_if_due(&mut self) {
        if self.risk.should_enter_safe_mode()
            && matches!(self.snapshot().mode, Mode::Active | Mode::Observing)
        {
            json_log(
                "agent",
                obj(&[
                    ("event", v_str("safe_mode_trip")),
                    ("daily_pnl", v_num(self.risk.daily_realized_pnl())),
                    ("auto", v_bool(true)),
                ]),
            );
            self.state.set_mode(Mode::SafeMode);
        }
    }

    /// Per-token conviction follows realized outcomes: profits build it,
    /// losses and refusals bleed it.
    fn apply_conviction_feedback(&mut self, trade: &TradeResult) {
        let Some(token) = trade.token.as_deref() else {
            return;
        };
        let delta = match (trade.status, trade.realized_pnl) {
            (TradeStatus::Filled, Some(pnl)) if pnl < 0.0 => -0.15,
            (TradeStatus::Filled, _) => 0.05,
            (TradeStatus::Failed, _) => -0.1,
        };
        self.state.nudge_conviction(token, delta);
    }

    fn maybe_persist(&mut self) {
        if self.cfg.persist_every_ticks > 0 && self.ticks % self.cfg.persist_every_ticks == 0 {
            self.persist();
        }
    }

    fn persist(&mut self) {
        let record = SnapshotRecord {
            ts: self.clock.now_ms(),
            state: PersistedAgentState::from_state(&self.state.snapshot()),
            book: PersistedBook {
                capital: self.executor.book.capital(),
                positions: self.executor.book.positions(),
            },
            ledger: self.risk.ledger().to_vec(),
            tracked_tokens: self.cfg.tracked_tokens.clone(),
            total_value: self.executor.book.total_value(),
        };
        if let Err(err) = self.store.persist_snapshot(&record) {
            json_log(
                "agent",
                obj(&[("stage", v_str("persist")), ("error", v_str(&err.to_string()))]),
            );
        }
    }
}

fn price_map(events: &[MarketEvent]) -> HashMap<String, f64> {
    let mut prices = HashMap::new();
    for e in events {
        if let (Some(token), EventKind::PriceMove { price, .. }) = (&e.token, &e.kind) {
            prices.insert(token.clone(), *price);
        }
    }
    prices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_map_takes_latest_price_move() {
        use crate::events::EventSource;
        let events = vec![
            MarketEvent::new(
                "a".to_string(),
                1,
                EventSource::Market,
                "SOL",
                EventKind::PriceMove { price: 1.0, change_pct: 0.0 },
            ),
            MarketEvent::new(
                "b".to_string(),
                2,
                EventSource::Market,
                "SOL",
                EventKind::PriceMove { price: 1.2, change_pct: 20.0 },
            ),
            MarketEvent::new(
                "c".to_string(),
                3,
                EventSource::Market,
                "SOL",
                EventKind::VolumeSpike { volume: 1.0, multiplier: 2.0 },
            ),
        ];
        let prices = price_map(&events);
        assert_eq!(prices.len(), 1);
        assert!((prices["SOL"] - 1.2).abs() < 1e-9);
    }
}
