//! Decision engine: at most one intent per cycle, strict precedence, a
//! cooldown between intents. Signals, state and positions come in as
//! read-only snapshots; the engine owns nothing but its cooldown clock.

use serde::{Deserialize, Serialize};

use crate::executor::Position;
use crate::signals::{Signal, SignalKind};
use crate::state::{Mode, Mood, StateSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Watch,
    Enter,
    Add,
    Reduce,
    Exit,
    Freeze,
    Wait,
}

impl IntentKind {
    pub fn label(&self) -> &'static str {
        match self {
            IntentKind::Watch => "watch",
            IntentKind::Enter => "enter",
            IntentKind::Add => "add",
            IntentKind::Reduce => "reduce",
            IntentKind::Exit => "exit",
            IntentKind::Freeze => "freeze",
            IntentKind::Wait => "wait",
        }
    }

    /// Would this intent grow exposure if executed?
    pub fn increases_exposure(&self) -> bool {
        matches!(self, IntentKind::Enter | IntentKind::Add)
    }

    /// Intents that never reach the executor.
    pub fn is_passive(&self) -> bool {
        matches!(self, IntentKind::Watch | IntentKind::Wait | IntentKind::Freeze)
    }
}

/// The single action this cycle wants to take, pre-risk-check. Risk
/// guardrails are the only writer of the approval fields.
#[derive(Debug, Clone, Serialize)]
pub struct Intent {
    pub id: String,
    pub ts: u64,
    pub kind: IntentKind,
    pub token: Option<String>,
    pub size_pct: Option<f64>,
    pub reason: String,
    pub signal_ids: Vec<String>,
    pub state: StateSnapshot,
    pub alternatives: Vec<&'static str>,
    pub approved: Option<bool>,
    pub block_reason: Option<String>,
    pub adjusted_size_pct: Option<f64>,
}

impl Intent {
    /// Risk-adjusted size when one was set, otherwise the requested size.
    pub fn effective_size_pct(&self) -> Option<f64> {
        self.adjusted_size_pct.or(self.size_pct)
    }

    pub fn symbol_or_token(&self) -> String {
        self.token.clone().unwrap_or_default()
    }

    pub fn primary_confidence(&self) -> f64 {
        self.state.confidence
    }
}

fn alternatives_for(kind: IntentKind) -> Vec<&'static str> {
    match kind {
        IntentKind::Enter => vec!["wait for confirmation", "watch"],
        IntentKind::Exit => vec!["reduce instead", "hold"],
        IntentKind::Wait => vec!["force entry on weak signal", "go dormant"],
        IntentKind::Reduce => vec!["exit fully", "hold"],
        IntentKind::Add => vec!["hold current size", "watch"],
        IntentKind::Watch | IntentKind::Freeze => vec![],
    }
}

#[derive(Debug, Clone)]
pub struct DecisionConfig {
    pub intent_cooldown_ms: u64,
    pub min_signal_confidence: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self { intent_cooldown_ms: 120_000, min_signal_confidence: 0.45 }
    }
}

pub struct DecisionEngine {
    cfg: DecisionConfig,
    last_intent_ts: Option<u64>,
    seq: u64,
}

impl DecisionEngine {
    pub fn new(cfg: DecisionConfig) -> Self {
        Self { cfg, last_intent_ts: None, seq: 0 }
    }

    pub fn can_decide(&self, now_ms: u64) -> bool {
        match self.last_intent_ts {
            Some(last) => now_ms.saturating_sub(last) >= self.cfg.intent_cooldown_ms,
            None => true,
        }
    }

    /// One pass through the precedence ladder. Returns `None` only while
    /// cooling down; otherwise exactly one intent, `Wait` at worst. The
    /// cooldown restarts on every emitted intent, `Wait` included.
    pub fn decide(
        &mut self,
        now_ms: u64,
        signals: &[Signal],
        state: &StateSnapshot,
        positions: &[Position],
    ) -> Option<Intent> {
        if !self.can_decide(now_ms) {
            return None;
        }

        let strong: Vec<&Signal> = signals
            .iter()
            .filter(|s| s.confidence >= self.cfg.min_signal_confidence)
            .collect();

        let intent = if strong.is_empty() {
            self.make(
                now_ms,
                IntentKind::Wait,
                None,
                None,
                "no strong signals".to_string(),
                vec![],
                state,
            )
        } else {
            self.first_applicable(now_ms, &strong, state, positions)
        };

        self.last_intent_ts = Some(now_ms);
        Some(intent)
    }

    fn first_applicable(
        &mut self,
        now_ms: u64,
        strong: &[&Signal],
        state: &StateSnapshot,
        positions: &[Position],
    ) -> Intent {
        // 1. Exit: protecting an open position outranks everything.
        for pos in positions {
            let pull = strong.iter().find(|s| {
                s.kind == SignalKind::LiquidityPull && s.is_for(&pos.token) && s.urgency > 0.7
            });
            if let Some(signal) = pull {
                return self.make(
                    now_ms,
                    IntentKind::Exit,
                    Some(pos.token.clone()),
                    Some(100.0),
                    format!("liquidity pulling out from under {}", pos.token),
                    vec![signal.id.clone()],
                    state,
                );
            }
            if pos.pnl_pct() > 10.0 {
                let exhausted = strong.iter().find(|s| {
                    s.kind == SignalKind::PriceExhaustion && s.is_for(&pos.token)
                });
                if let Some(signal) = exhausted {
                    return self.make(
                        now_ms,
                        IntentKind::Exit,
                        Some(pos.token.clone()),
                        Some(100.0),
                        format!("taking profit on {} into exhaustion", pos.token),
                        vec![signal.id.clone()],
                        state,
                    );
                }
            }
            if state.token_convictions.get(&pos.token) < 0.3 {
                return self.make(
                    now_ms,
                    IntentKind::Exit,
                    Some(pos.token.clone()),
                    Some(100.0),
                    format!("conviction in {} has collapsed", pos.token),
                    vec![],
                    state,
                );
            }
        }

        // 2. Reduce: suspicious mood takes some profit off the table.
        if state.primary_mood == Mood::Suspicious {
            if let Some(pos) = positions.iter().find(|p| p.pnl_pct() > 5.0) {
                return self.make(
                    now_ms,
                    IntentKind::Reduce,
                    Some(pos.token.clone()),
                    Some(50.0),
                    format!("suspicious of this {} rally, trimming", pos.token),
                    vec![],
                    state,
                );
            }
        }

        let capital_rules_allowed = state.mode != Mode::Observing;

        // 3. Enter: blocked outright by a bruised mood.
        let mood_blocks_entry =
            matches!(state.primary_mood, Mood::Cautious | Mood::Regretful);
        if capital_rules_allowed && !mood_blocks_entry {
            let best = strong
                .iter()
                .filter(|s| s.kind.is_entry_trigger())
                .filter(|s| {
                    s.token
                        .as_deref()
                        .map(|t| !positions.iter().any(|p| p.token == t))
                        .unwrap_or(false)
                })
                .max_by(|a, b| {
                    a.score().partial_cmp(&b.score()).unwrap_or(std::cmp::Ordering::Equal)
                });
            if let Some(signal) = best {
                // Higher agent confidence lowers the bar.
                let threshold = 0.4 * (2.0 - state.confidence);
                if signal.score() > threshold {
                    let size = (10.0 * state.risk_appetite * signal.confidence).min(20.0);
                    let token = signal.token.clone().expect("filtered to token signals");
                    return self.make(
                        now_ms,
                        IntentKind::Enter,
                        Some(token.clone()),
                        Some(size),
                        format!("{} ({})", signal.summary, signal.kind.label()),
                        vec![signal.id.clone()],
                        state,
                    );
                }
            }
        }

        // 4. Add: pressing a winner needs conviction or an aggressive mood.
        let may_add = state.confidence >= 0.6 || state.primary_mood == Mood::Aggressive;
        if capital_rules_allowed && may_add {
            for pos in positions {
                let surge = strong.iter().find(|s| {
                    s.kind == SignalKind::VolumeSurge && s.is_for(&pos.token) && s.confidence > 0.7
                });
                if let Some(signal) = surge {
                    return self.make(
                        now_ms,
                        IntentKind::Add,
                        Some(pos.token.clone()),
                        Some(25.0),
                        format!("volume confirming {}, pressing the position", pos.token),
                        vec![signal.id.clone()],
                        state,
                    );
                }
            }
        }

        // 5. Wait, explicitly, carrying what was considered.
        let ids = strong.iter().map(|s| s.id.clone()).collect();
        self.make(
            now_ms,
            IntentKind::Wait,
            None,
            None,
            format!("{} signals considered, none decisive", strong.len()),
            ids,
            state,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn make(
        &mut self,
        now_ms: u64,
        kind: IntentKind,
        token: Option<String>,
        size_pct: Option<f64>,
        reason: String,
        signal_ids: Vec<String>,
        state: &StateSnapshot,
    ) -> Intent {
        self.seq += 1;
        Intent {
            id: format!("I-{}-{}", self.seq, now_ms),
            ts: now_ms,
            kind,
            token,
            size_pct,
            reason,
            signal_ids,
            state: state.clone(),
            alternatives: alternatives_for(kind),
            approved: None,
            block_reason: None,
            adjusted_size_pct: None,
        }
    }
}

// =============================================================================
// Test support
// =============================================================================


// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Mood, StateModel};

    fn snapshot() -> StateSnapshot {
        StateModel::new(0).snapshot()
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(DecisionConfig::default())
    }

    fn signal(kind: SignalKind, token: &str, conf: f64, strength: f64, urgency: f64) -> Signal {
        crate::signals::test_signal(kind, Some(token.to_string()), conf, strength, urgency)
    }

    fn open_position(token: &str, pnl_pct: f64) -> Position {
        Position {
            token: token.to_string(),
            symbol: token.to_string(),
            amount: 10.0,
            avg_entry_price: 1.0,
            current_price: Some(1.0 + pnl_pct / 100.0),
            unrealized_pnl: Some(pnl_pct / 10.0),
            unrealized_pnl_pct: Some(pnl_pct),
            opened_at: 0,
            last_updated_at: 0,
            entry_intent_id: "I-0".to_string(),
            trade_ids: vec![],
        }
    }

    #[test]
    fn wait_when_no_strong_signals() {
        let mut eng = engine();
        let weak = vec![signal(SignalKind::HypeBurst, "SOL", 0.2, 0.5, 0.5)];
        let intent = eng.decide(1_000, &weak, &snapshot(), &[]).unwrap();
        assert_eq!(intent.kind, IntentKind::Wait);
        assert_eq!(intent.reason, "no strong signals");
        assert!(intent.signal_ids.is_empty());
    }

    #[test]
    fn cooldown_blocks_and_wait_restarts_it() {
        let mut eng = engine();
        let first = eng.decide(1_000, &[], &snapshot(), &[]);
        assert!(first.is_some(), "wait still counts as a decision");
        assert!(eng.decide(1_001, &[], &snapshot(), &[]).is_none());
        assert!(eng.decide(1_000 + 120_000, &[], &snapshot(), &[]).is_some());
    }

    #[test]
    fn exit_beats_reduce_when_both_apply() {
        let mut eng = engine();
        let mut state = snapshot();
        state.suspicion = 0.8;
        state.primary_mood = Mood::Suspicious;
        let positions = vec![open_position("SOL", 6.0)];
        let signals = vec![signal(SignalKind::LiquidityPull, "SOL", 0.75, 0.8, 0.8)];
        let intent = eng.decide(1_000, &signals, &state, &positions).unwrap();
        assert_eq!(intent.kind, IntentKind::Exit);
        assert_eq!(intent.size_pct, Some(100.0));
        assert_eq!(intent.token.as_deref(), Some("SOL"));
    }

    #[test]
    fn low_urgency_pull_does_not_force_exit() {
        let mut eng = engine();
        let positions = vec![open_position("SOL", 0.0)];
        let signals = vec![signal(SignalKind::LiquidityPull, "SOL", 0.75, 0.8, 0.6)];
        let intent = eng.decide(1_000, &signals, &snapshot(), &positions).unwrap();
        assert_ne!(intent.kind, IntentKind::Exit);
    }

    #[test]
    fn take_profit_needs_exhaustion_signal() {
        let mut eng = engine();
        let positions = vec![open_position("SOL", 12.0)];
        let no_signal = vec![signal(SignalKind::HypeBurst, "SOL", 0.5, 0.5, 0.5)];
        let intent = eng.decide(1_000, &no_signal, &snapshot(), &positions).unwrap();
        assert_ne!(intent.kind, IntentKind::Exit);

        let mut eng = engine();
        let exhausted = vec![signal(SignalKind::PriceExhaustion, "SOL", 0.55, 0.5, 0.4)];
        let intent = eng.decide(1_000, &exhausted, &snapshot(), &positions).unwrap();
        assert_eq!(intent.kind, IntentKind::Exit);
        assert!(intent.reason.contains("profit"));
    }

    #[test]
    fn collapsed_conviction_forces_exit() {
        let mut eng = engine();
        let mut state = snapshot();
        state.token_convictions.set("SOL", 0.2);
        let positions = vec![open_position("SOL", 0.0)];
        let signals = vec![signal(SignalKind::HypeBurst, "WIF", 0.5, 0.5, 0.5)];
        let intent = eng.decide(1_000, &signals, &state, &positions).unwrap();
        assert_eq!(intent.kind, IntentKind::Exit);
        assert!(intent.reason.contains("conviction"));
    }

    #[test]
    fn suspicious_mood_trims_winners() {
        let mut eng = engine();
        let mut state = snapshot();
        state.primary_mood = Mood::Suspicious;
        let positions = vec![open_position("SOL", 6.0)];
        let signals = vec![signal(SignalKind::HypeBurst, "WIF", 0.5, 0.5, 0.5)];
        let intent = eng.decide(1_000, &signals, &state, &positions).unwrap();
        assert_eq!(intent.kind, IntentKind::Reduce);
        assert_eq!(intent.size_pct, Some(50.0));
    }

    #[test]
    fn bruised_moods_never_enter() {
        for mood in [Mood::Cautious, Mood::Regretful] {
            let mut eng = engine();
            let mut state = snapshot();
            state.primary_mood = mood;
            let signals = vec![signal(SignalKind::VolumeSurge, "SOL", 0.95, 1.0, 0.9)];
            let intent = eng.decide(1_000, &signals, &state, &[]).unwrap();
            assert_eq!(intent.kind, IntentKind::Wait, "{:?} must not enter", mood);
        }
    }

    #[test]
    fn entry_threshold_scales_with_agent_confidence() {
        // Score 0.95*0.8*0.7 = 0.532. At confidence 0.5 the bar is 0.6 →
        // wait; at 0.75 the bar is 0.5 → enter.
        let signals = vec![signal(SignalKind::VolumeSurge, "SOL", 0.95, 0.8, 0.7)];

        let mut eng = engine();
        let state = snapshot();
        let intent = eng.decide(1_000, &signals, &state, &[]).unwrap();
        assert_eq!(intent.kind, IntentKind::Wait);

        let mut eng = engine();
        let mut state = snapshot();
        state.confidence = 0.75;
        let intent = eng.decide(1_000, &signals, &state, &[]).unwrap();
        assert_eq!(intent.kind, IntentKind::Enter);
        // 10 * 0.5 risk appetite * 0.95 signal confidence
        assert!((intent.size_pct.unwrap() - 4.75).abs() < 1e-9);
    }

    #[test]
    fn entry_size_is_capped_at_twenty() {
        let mut eng = engine();
        let mut state = snapshot();
        state.confidence = 0.9;
        state.risk_appetite = 0.95;
        let signals = vec![signal(SignalKind::EarlyMomentum, "SOL", 0.9, 1.0, 0.9)];
        let intent = eng.decide(1_000, &signals, &state, &[]).unwrap();
        assert_eq!(intent.kind, IntentKind::Enter);
        assert!(intent.size_pct.unwrap() <= 20.0);
    }

    #[test]
    fn only_momentum_kinds_trigger_entry() {
        let mut eng = engine();
        let mut state = snapshot();
        state.confidence = 0.9;
        // High-scoring but non-trigger kinds.
        let signals = vec![
            signal(SignalKind::HypeBurst, "SOL", 0.9, 1.0, 0.9),
            signal(SignalKind::Dormancy, "WIF", 0.9, 1.0, 0.9),
        ];
        let intent = eng.decide(1_000, &signals, &state, &[]).unwrap();
        assert_eq!(intent.kind, IntentKind::Wait);
    }

    #[test]
    fn entry_skips_tokens_already_held() {
        let mut eng = engine();
        let mut state = snapshot();
        state.confidence = 0.9;
        let positions = vec![open_position("SOL", 0.0)];
        let signals = vec![signal(SignalKind::EarlyMomentum, "SOL", 0.9, 1.0, 0.9)];
        let intent = eng.decide(1_000, &signals, &state, &positions).unwrap();
        assert_ne!(intent.kind, IntentKind::Enter);
    }

    #[test]
    fn add_needs_confidence_or_aggression() {
        let positions = vec![open_position("SOL", 0.0)];
        let signals = vec![signal(SignalKind::VolumeSurge, "SOL", 0.8, 0.5, 0.5)];

        let mut eng = engine();
        let intent = eng.decide(1_000, &signals, &snapshot(), &positions).unwrap();
        assert_eq!(intent.kind, IntentKind::Wait, "baseline confidence 0.5 cannot add");

        let mut eng = engine();
        let mut state = snapshot();
        state.primary_mood = Mood::Aggressive;
        let intent = eng.decide(1_000, &signals, &state, &positions).unwrap();
        assert_eq!(intent.kind, IntentKind::Add);
        assert_eq!(intent.size_pct, Some(25.0));
    }

    #[test]
    fn observing_mode_skips_capital_rules() {
        let mut eng = engine();
        let mut state = snapshot();
        state.confidence = 0.9;
        state.mode = Mode::Observing;
        let signals = vec![signal(SignalKind::VolumeSurge, "SOL", 0.95, 1.0, 0.9)];
        let intent = eng.decide(1_000, &signals, &state, &[]).unwrap();
        assert_eq!(intent.kind, IntentKind::Wait);
    }

    #[test]
    fn default_wait_carries_considered_signals() {
        let mut eng = engine();
        let signals = vec![
            signal(SignalKind::HypeBurst, "SOL", 0.5, 0.5, 0.5),
            signal(SignalKind::Dormancy, "WIF", 0.7, 0.5, 0.2),
        ];
        let intent = eng.decide(1_000, &signals, &snapshot(), &[]).unwrap();
        assert_eq!(intent.kind, IntentKind::Wait);
        assert_eq!(intent.signal_ids.len(), 2);
        assert_eq!(intent.alternatives, vec!["force entry on weak signal", "go dormant"]);
    }

    #[test]
    fn intents_carry_a_state_snapshot() {
        let mut eng = engine();
        let mut state = snapshot();
        state.confidence = 0.62;
        let intent = eng.decide(1_000, &[], &state, &[]).unwrap();
        assert!((intent.state.confidence - 0.62).abs() < 1e-9);
        assert!(intent.approved.is_none(), "approval belongs to risk");
    }
}
