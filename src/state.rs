//! Psychological state model: slowly-evolving mood and risk posture that
//! modulates decision thresholds. The single mutable `AgentState` lives
//! here; every other component sees snapshots only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::DAY_MS;
use crate::executor::{TradeResult, TradeStatus};
use crate::logging::{json_log, obj, v_num, v_str};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Confident,
    Cautious,
    Aggressive,
    Fatigued,
    Suspicious,
    Regretful,
    Obsessed,
    Neutral,
}

impl Mood {
    pub fn label(&self) -> &'static str {
        match self {
            Mood::Confident => "confident",
            Mood::Cautious => "cautious",
            Mood::Aggressive => "aggressive",
            Mood::Fatigued => "fatigued",
            Mood::Suspicious => "suspicious",
            Mood::Regretful => "regretful",
            Mood::Obsessed => "obsessed",
            Mood::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Active,
    Observing,
    SafeMode,
    Paused,
    Frozen,
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Active => "active",
            Mode::Observing => "observing",
            Mode::SafeMode => "safe_mode",
            Mode::Paused => "paused",
            Mode::Frozen => "frozen",
        }
    }
}

/// Per-token conviction, distinct from global confidence. Unknown tokens
/// read as 0.5 — there is no implicit-missing semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvictionBook {
    scores: BTreeMap<String, f64>,
}

pub const DEFAULT_CONVICTION: f64 = 0.5;

impl ConvictionBook {
    pub fn get(&self, token: &str) -> f64 {
        self.scores.get(token).copied().unwrap_or(DEFAULT_CONVICTION)
    }

    pub fn set(&mut self, token: &str, score: f64) {
        self.scores.insert(token.to_string(), score.clamp(0.0, 1.0));
    }

    pub fn nudge(&mut self, token: &str, delta: f64) {
        let next = (self.get(token) + delta).clamp(0.0, 1.0);
        self.scores.insert(token.to_string(), next);
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.scores.iter()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub confidence: f64,
    pub suspicion: f64,
    pub conviction: f64,
    pub fatigue: f64,
    pub aggression: f64,
    pub regret: f64,
    pub risk_appetite: f64,
    pub primary_mood: Mood,
    pub secondary_mood: Option<Mood>,
    pub mode: Mode,
    pub win_streak: u32,
    pub loss_streak: u32,
    pub last_trade_ts: u64,
    pub token_convictions: ConvictionBook,
}

/// Read-only copy handed to consumers; identical shape, fresh allocation.
pub type StateSnapshot = AgentState;

impl AgentState {
    fn baseline(now_ms: u64) -> Self {
        Self {
            confidence: 0.5,
            suspicion: 0.2,
            conviction: 0.3,
            fatigue: 0.1,
            aggression: 0.3,
            regret: 0.0,
            risk_appetite: 0.5,
            primary_mood: Mood::Neutral,
            secondary_mood: None,
            mode: Mode::Active,
            win_streak: 0,
            loss_streak: 0,
            last_trade_ts: now_ms,
            token_convictions: ConvictionBook::default(),
        }
    }
}

pub struct StateModel {
    state: AgentState,
}

impl StateModel {
    pub fn new(now_ms: u64) -> Self {
        Self { state: AgentState::baseline(now_ms) }
    }

    pub fn from_state(state: AgentState) -> Self {
        Self { state }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.clone()
    }

    pub fn conviction_for(&self, token: &str) -> f64 {
        self.state.token_convictions.get(token)
    }

    pub fn nudge_conviction(&mut self, token: &str, delta: f64) {
        self.state.token_convictions.nudge(token, delta);
    }

    /// Sole external mutator of the operational mode. Does not touch the
    /// psychological scalars.
    pub fn set_mode(&mut self, mode: Mode) {
        if self.state.mode != mode {
            json_log(
                "state_model",
                obj(&[
                    ("event", v_str("mode_change")),
                    ("from", v_str(self.state.mode.label())),
                    ("to", v_str(mode.label())),
                ]),
            );
        }
        self.state.mode = mode;
    }

    /// Periodic drift toward baseline. Fatigue only builds after more than
    /// two days without a trade.
    pub fn tick(&mut self, now_ms: u64) {
        let s = &mut self.state;
        let days_since_trade =
            now_ms.saturating_sub(s.last_trade_ts) as f64 / DAY_MS as f64;
        if days_since_trade > 2.0 {
            s.fatigue = (s.fatigue + 0.02).min(0.9);
        }
        s.regret *= 0.98;
        s.suspicion *= 0.99;
        s.aggression *= 0.97;
        s.confidence += (0.5 - s.confidence) * 0.05;
        s.conviction *= 0.95;
        self.recompute_mood();
    }

    /// Trade outcome feedback. A fill lifts the agent; a failure stings
    /// harder than a fill soothes.
    pub fn update_from_trade(&mut self, trade: &TradeResult, now_ms: u64) {
        let s = &mut self.state;
        match trade.status {
            TradeStatus::Filled => {
                s.confidence = (s.confidence + 0.08).min(0.95);
                s.regret = (s.regret - 0.05).max(0.0);
                s.conviction = (s.conviction + 0.06).min(0.95);
                s.risk_appetite = (s.risk_appetite + 0.03).min(0.95);
                s.loss_streak = 0;
                s.win_streak += 1;
                if s.win_streak >= 3 {
                    s.aggression = (s.aggression + 0.04).min(0.9);
                }
            }
            TradeStatus::Failed => {
                s.confidence = (s.confidence - 0.12).max(0.0);
                s.regret = (s.regret + 0.15).min(0.95);
                s.suspicion = (s.suspicion + 0.1).min(0.95);
                s.risk_appetite = (s.risk_appetite - 0.08).max(0.0);
                s.win_streak = 0;
                s.loss_streak += 1;
            }
        }
        s.last_trade_ts = now_ms;
        self.recompute_mood();
        json_log(
            "state_model",
            obj(&[
                ("event", v_str("trade_feedback")),
                ("status", v_str(match trade.status {
                    TradeStatus::Filled => "filled",
                    TradeStatus::Failed => "failed",
                })),
                ("confidence", v_num(self.state.confidence)),
                ("mood", v_str(self.state.primary_mood.label())),
            ]),
        );
    }

    /// Fixed priority cascade; first match wins.
    fn recompute_mood(&mut self) {
        let s = &mut self.state;
        let primary = if s.regret > 0.6 {
            Mood::Regretful
        } else if s.fatigue > 0.7 {
            Mood::Fatigued
        } else if s.suspicion > 0.6 {
            Mood::Suspicious
        } else if s.confidence > 0.7 && s.conviction > 0.6 {
            Mood::Confident
        } else if s.aggression > 0.6 && s.confidence > 0.5 {
            Mood::Aggressive
        } else if s.conviction > 0.7 {
            Mood::Obsessed
        } else if s.confidence < 0.4 {
            Mood::Cautious
        } else {
            Mood::Neutral
        };

        let mut candidates = [
            (Mood::Regretful, s.regret),
            (Mood::Suspicious, s.suspicion),
            (Mood::Cautious, if s.confidence < 0.5 { 0.8 } else { 0.0 }),
            (Mood::Fatigued, s.fatigue),
        ];
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let secondary = candidates
            .iter()
            .find(|(mood, score)| *mood != primary && *score > 0.4)
            .map(|(mood, _)| *mood);

        s.primary_mood = primary;
        s.secondary_mood = secondary;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::{failed_trade, filled_trade};

    fn model() -> StateModel {
        StateModel::new(0)
    }

    #[test]
    fn regret_outranks_suspicion() {
        let mut m = model();
        m.state.regret = 0.7;
        m.state.suspicion = 0.8;
        m.recompute_mood();
        assert_eq!(m.state.primary_mood, Mood::Regretful);
        // Suspicion is the strongest non-primary score above 0.4.
        assert_eq!(m.state.secondary_mood, Some(Mood::Suspicious));
    }

    #[test]
    fn mood_cascade_order() {
        let mut m = model();
        m.state.fatigue = 0.8;
        m.state.suspicion = 0.9;
        m.recompute_mood();
        assert_eq!(m.state.primary_mood, Mood::Fatigued);

        m.state.fatigue = 0.0;
        m.recompute_mood();
        assert_eq!(m.state.primary_mood, Mood::Suspicious);

        m.state.suspicion = 0.0;
        m.state.confidence = 0.8;
        m.state.conviction = 0.7;
        m.recompute_mood();
        assert_eq!(m.state.primary_mood, Mood::Confident);

        m.state.confidence = 0.55;
        m.state.conviction = 0.2;
        m.state.aggression = 0.7;
        m.recompute_mood();
        assert_eq!(m.state.primary_mood, Mood::Aggressive);

        m.state.aggression = 0.0;
        m.state.conviction = 0.75;
        m.recompute_mood();
        assert_eq!(m.state.primary_mood, Mood::Obsessed);

        m.state.conviction = 0.0;
        m.state.confidence = 0.3;
        m.recompute_mood();
        assert_eq!(m.state.primary_mood, Mood::Cautious);

        m.state.confidence = 0.5;
        m.recompute_mood();
        assert_eq!(m.state.primary_mood, Mood::Neutral);
    }

    #[test]
    fn no_secondary_below_threshold() {
        let mut m = model();
        m.state.confidence = 0.6;
        m.state.regret = 0.3;
        m.state.suspicion = 0.35;
        m.state.fatigue = 0.2;
        m.recompute_mood();
        assert_eq!(m.state.secondary_mood, None);
    }

    #[test]
    fn tick_decays_toward_baseline() {
        let mut m = model();
        m.state.regret = 0.5;
        m.state.suspicion = 0.5;
        m.state.aggression = 0.5;
        m.state.conviction = 0.5;
        m.state.confidence = 0.9;
        m.tick(1_000);
        assert!((m.state.regret - 0.49).abs() < 1e-9);
        assert!((m.state.suspicion - 0.495).abs() < 1e-9);
        assert!((m.state.aggression - 0.485).abs() < 1e-9);
        assert!((m.state.conviction - 0.475).abs() < 1e-9);
        assert!((m.state.confidence - 0.88).abs() < 1e-9);
        // Less than two days idle: no fatigue build-up.
        assert!((m.state.fatigue - 0.1).abs() < 1e-9);
    }

    #[test]
    fn fatigue_builds_after_two_idle_days() {
        let mut m = model();
        m.tick(2 * DAY_MS + 1);
        assert!((m.state.fatigue - 0.12).abs() < 1e-9);
        // Capped at 0.9.
        m.state.fatigue = 0.89;
        m.tick(3 * DAY_MS);
        assert!((m.state.fatigue - 0.9).abs() < 1e-9);
    }

    #[test]
    fn fill_feedback_lifts_confidence_and_streak() {
        let mut m = model();
        let trade = filled_trade("SOL", 10.0, 1.0);
        m.update_from_trade(&trade, 5_000);
        assert!((m.state.confidence - 0.58).abs() < 1e-9);
        assert!((m.state.conviction - 0.36).abs() < 1e-9);
        assert!((m.state.risk_appetite - 0.53).abs() < 1e-9);
        assert_eq!(m.state.win_streak, 1);
        assert_eq!(m.state.loss_streak, 0);
        assert_eq!(m.state.last_trade_ts, 5_000);
    }

    #[test]
    fn failure_feedback_cuts_deeper_than_fills_lift() {
        let mut m = model();
        let up = filled_trade("SOL", 10.0, 1.0);
        let down = failed_trade("SOL", "insufficient capital");
        m.update_from_trade(&up, 1_000);
        m.update_from_trade(&down, 2_000);
        assert!(m.state.confidence < 0.5);
        assert!((m.state.suspicion - 0.3).abs() < 1e-9);
        assert!((m.state.regret - 0.15).abs() < 1e-9);
        assert_eq!(m.state.win_streak, 0);
        assert_eq!(m.state.loss_streak, 1);
    }

    #[test]
    fn win_streak_builds_aggression() {
        let mut m = model();
        let trade = filled_trade("SOL", 10.0, 1.0);
        m.update_from_trade(&trade, 1_000);
        m.update_from_trade(&trade, 2_000);
        assert!((m.state.aggression - 0.3).abs() < 1e-9);
        m.update_from_trade(&trade, 3_000);
        assert!((m.state.aggression - 0.34).abs() < 1e-9);
    }

    #[test]
    fn set_mode_leaves_scalars_alone() {
        let mut m = model();
        let before = m.snapshot();
        m.set_mode(Mode::SafeMode);
        assert_eq!(m.state.mode, Mode::SafeMode);
        assert_eq!(m.state.confidence, before.confidence);
        assert_eq!(m.state.primary_mood, before.primary_mood);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let mut m = model();
        let mut snap = m.snapshot();
        snap.confidence = 0.99;
        snap.token_convictions.set("SOL", 0.9);
        assert!((m.state.confidence - 0.5).abs() < 1e-9);
        assert!((m.conviction_for("SOL") - DEFAULT_CONVICTION).abs() < 1e-9);
    }

    #[test]
    fn conviction_defaults_to_half() {
        let book = ConvictionBook::default();
        assert!((book.get("anything") - 0.5).abs() < 1e-9);
        let mut book = book;
        book.nudge("SOL", 0.8);
        assert!((book.get("SOL") - 1.0).abs() < 1e-9, "clamped at 1.0");
        book.nudge("SOL", -2.0);
        assert!((book.get("SOL") - 0.0).abs() < 1e-9, "clamped at 0.0");
    }
}
