//! Signal engine: condenses the rolling event window into a small set of
//! decaying, confidence-scored signals.
//!
//! Each detector is a pure function over the window. Detection results are
//! merged into at most one live signal per (kind, token): a repeat detection
//! reinforces the existing signal instead of duplicating it. Confidence
//! decays exponentially from a fixed anchor, so repeated decay passes at the
//! same instant are idempotent.

use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::events::{EventKind, MarketEvent};
use crate::logging::{json_log, obj, v_num, v_str};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    VolumeSurge,
    EarlyMomentum,
    LiquidityPull,
    PriceExhaustion,
    Dormancy,
    HypeBurst,
}

impl SignalKind {
    pub fn label(&self) -> &'static str {
        match self {
            SignalKind::VolumeSurge => "volume_surge",
            SignalKind::EarlyMomentum => "early_momentum",
            SignalKind::LiquidityPull => "liquidity_pull",
            SignalKind::PriceExhaustion => "price_exhaustion",
            SignalKind::Dormancy => "dormancy",
            SignalKind::HypeBurst => "hype_burst",
        }
    }

    /// Only momentum-shaped signals qualify as entry triggers.
    pub fn is_entry_trigger(&self) -> bool {
        matches!(self, SignalKind::VolumeSurge | SignalKind::EarlyMomentum)
    }
}

/// A scored, decaying interpretation of recent events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub created_ts: u64,
    pub kind: SignalKind,
    pub token: Option<String>,
    pub confidence: f64,
    pub strength: f64,
    pub urgency: f64,
    pub summary: String,
    pub source_event_ids: Vec<String>,
    pub expires_at: u64,
    pub decay_rate: f64,
    // Decay is recomputed from this anchor, never compounded step by step.
    // Reinforcement re-bases it; an untouched signal decays from creation.
    anchor_confidence: f64,
    anchor_ts: u64,
}

impl Signal {
    pub fn score(&self) -> f64 {
        self.confidence * self.strength * self.urgency
    }

    pub fn is_for(&self, token: &str) -> bool {
        self.token.as_deref() == Some(token)
    }
}

/// Raw detector output, pre-merge.
#[derive(Debug, Clone)]
pub struct Detection {
    pub kind: SignalKind,
    pub token: Option<String>,
    pub confidence: f64,
    pub strength: f64,
    pub urgency: f64,
    pub summary: String,
    pub source_event_ids: Vec<String>,
}

type Detector = fn(&[MarketEvent], &[String]) -> Result<Vec<Detection>>;

const DETECTORS: &[(&str, Detector)] = &[
    ("volume_surge", detect_volume_surge),
    ("early_momentum", detect_early_momentum),
    ("liquidity_pull", detect_liquidity_pull),
    ("price_exhaustion", detect_price_exhaustion),
    ("dormancy", detect_dormancy),
    ("hype_burst", detect_hype_burst),
];

// =============================================================================
// Detectors
// =============================================================================

fn tokens_in(window: &[MarketEvent]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for e in window {
        if let Some(t) = &e.token {
            if !out.contains(t) {
                out.push(t.clone());
            }
        }
    }
    out
}

/// Two or more volume spikes for one token inside the window.
fn detect_volume_surge(window: &[MarketEvent], _tracked: &[String]) -> Result<Vec<Detection>> {
    let mut out = Vec::new();
    for token in tokens_in(window) {
        let mut max_mult = 0.0_f64;
        let mut ids = Vec::new();
        for e in window.iter().filter(|e| e.is_for_token(&token)) {
            if let EventKind::VolumeSpike { multiplier, .. } = e.kind {
                if !multiplier.is_finite() {
                    bail!("non-finite volume multiplier in event {}", e.id);
                }
                max_mult = max_mult.max(multiplier);
                ids.push(e.id.clone());
            }
        }
        if ids.len() >= 2 {
            out.push(Detection {
                kind: SignalKind::VolumeSurge,
                token: Some(token.clone()),
                confidence: (0.5 + 0.15 * (max_mult - 1.0)).min(0.95),
                strength: (max_mult / 5.0).min(1.0),
                urgency: 0.7,
                summary: format!("{}x volume surge on {}", max_mult, token),
                source_event_ids: ids,
            });
        }
    }
    Ok(out)
}

/// A >+5% price move co-occurring with volume activity for the same token.
fn detect_early_momentum(window: &[MarketEvent], _tracked: &[String]) -> Result<Vec<Detection>> {
    let mut out = Vec::new();
    for token in tokens_in(window) {
        let mut best_change = 0.0_f64;
        let mut price_ids = Vec::new();
        let mut volume_ids = Vec::new();
        for e in window.iter().filter(|e| e.is_for_token(&token)) {
            match e.kind {
                EventKind::PriceMove { change_pct, .. } if change_pct > 5.0 => {
                    if best_change < change_pct {
                        best_change = change_pct;
                    }
                    price_ids.push(e.id.clone());
                }
                EventKind::VolumeSpike { .. } => volume_ids.push(e.id.clone()),
                _ => {}
            }
        }
        if !price_ids.is_empty() && !volume_ids.is_empty() {
            let mut ids = price_ids;
            ids.extend(volume_ids);
            out.push(Detection {
                kind: SignalKind::EarlyMomentum,
                token: Some(token.clone()),
                confidence: 0.6,
                strength: (best_change.abs() / 20.0).min(1.0),
                urgency: 0.8,
                summary: format!("+{:.1}% move with volume on {}", best_change, token),
                source_event_ids: ids,
            });
        }
    }
    Ok(out)
}

/// Liquidity dropping more than 15% is an exit-grade warning.
fn detect_liquidity_pull(window: &[MarketEvent], _tracked: &[String]) -> Result<Vec<Detection>> {
    let mut out = Vec::new();
    for e in window {
        if let EventKind::LiquidityShift { change_pct } = e.kind {
            if !change_pct.is_finite() {
                bail!("non-finite liquidity change in event {}", e.id);
            }
            let drop = -change_pct;
            if drop > 15.0 {
                out.push(Detection {
                    kind: SignalKind::LiquidityPull,
                    token: e.token.clone(),
                    confidence: 0.75,
                    strength: (drop / 50.0).min(1.0),
                    urgency: if drop > 30.0 { 0.9 } else { 0.6 },
                    summary: format!(
                        "liquidity down {:.1}% on {}",
                        drop,
                        e.token.as_deref().unwrap_or("?")
                    ),
                    source_event_ids: vec![e.id.clone()],
                });
            }
        }
    }
    Ok(out)
}

/// A token that moved hard earlier in the window but has gone flat.
fn detect_price_exhaustion(window: &[MarketEvent], _tracked: &[String]) -> Result<Vec<Detection>> {
    let mut out = Vec::new();
    for token in tokens_in(window) {
        let mut moves: Vec<(&MarketEvent, f64)> = window
            .iter()
            .filter(|e| e.is_for_token(&token))
            .filter_map(|e| match e.kind {
                EventKind::PriceMove { change_pct, .. } => Some((e, change_pct)),
                _ => None,
            })
            .collect();
        if moves.len() < 3 {
            continue;
        }
        moves.sort_by_key(|(e, _)| e.ts);
        let recent = &moves[moves.len() - 3..];
        let recent_avg =
            recent.iter().map(|(_, c)| c.abs()).sum::<f64>() / recent.len() as f64;
        let had_spike = moves[..moves.len() - 3].iter().any(|(_, c)| c.abs() > 10.0);
        if recent_avg < 2.0 && had_spike {
            out.push(Detection {
                kind: SignalKind::PriceExhaustion,
                token: Some(token.clone()),
                confidence: 0.55,
                strength: 0.5,
                urgency: 0.4,
                summary: format!("momentum flattening on {}", token),
                source_event_ids: recent.iter().map(|(e, _)| e.id.clone()).collect(),
            });
        }
    }
    Ok(out)
}

/// Tracked tokens with no in-window activity at all.
fn detect_dormancy(window: &[MarketEvent], tracked: &[String]) -> Result<Vec<Detection>> {
    let mut out = Vec::new();
    for token in tracked {
        if !window.iter().any(|e| e.is_for_token(token)) {
            out.push(Detection {
                kind: SignalKind::Dormancy,
                token: Some(token.clone()),
                confidence: 0.7,
                strength: 0.5,
                urgency: 0.2,
                summary: format!("{} has gone quiet", token),
                source_event_ids: Vec::new(),
            });
        }
    }
    Ok(out)
}

/// Two or more social events (mentions, sentiment) for one key.
fn detect_hype_burst(window: &[MarketEvent], _tracked: &[String]) -> Result<Vec<Detection>> {
    let mut by_key: HashMap<String, Vec<&MarketEvent>> = HashMap::new();
    for e in window.iter().filter(|e| e.kind.is_social()) {
        let key = e.token.clone().unwrap_or_else(|| "global".to_string());
        by_key.entry(key).or_default().push(e);
    }
    let mut out = Vec::new();
    let mut keys: Vec<_> = by_key.keys().cloned().collect();
    keys.sort();
    for key in keys {
        let events = &by_key[&key];
        if events.len() >= 2 {
            out.push(Detection {
                kind: SignalKind::HypeBurst,
                token: if key == "global" { None } else { Some(key.clone()) },
                confidence: 0.5,
                strength: (events.len() as f64 / 5.0).min(1.0),
                urgency: 0.5,
                summary: format!("{} social events around {}", events.len(), key),
                source_event_ids: events.iter().map(|e| e.id.clone()).collect(),
            });
        }
    }
    Ok(out)
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub window_ms: u64,
    pub min_confidence: f64,
    pub decay_half_life_ms: u64,
    pub decay_rate: f64,
    pub reinforce_step: f64,
}

impl SignalConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            window_ms: cfg.window_ms,
            min_confidence: cfg.min_confidence,
            decay_half_life_ms: cfg.decay_half_life_ms,
            decay_rate: cfg.decay_rate,
            reinforce_step: cfg.reinforce_step,
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            window_ms: 900_000,
            min_confidence: 0.3,
            decay_half_life_ms: 300_000,
            decay_rate: 0.5,
            reinforce_step: 0.1,
        }
    }
}

pub struct SignalEngine {
    cfg: SignalConfig,
    window: Vec<MarketEvent>,
    live: HashMap<(SignalKind, Option<String>), Signal>,
    seq: u64,
}

impl SignalEngine {
    pub fn new(cfg: SignalConfig) -> Self {
        Self { cfg, window: Vec::new(), live: HashMap::new(), seq: 0 }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Append events, run every detector, merge detections into the live
    /// set. Returns newly created signals only; reinforcements mutate in
    /// place. A failing detector is logged and skipped without touching the
    /// window or the other detectors.
    pub fn process_events(
        &mut self,
        events: &[MarketEvent],
        tracked: &[String],
        now_ms: u64,
    ) -> Vec<Signal> {
        self.window.extend(events.iter().cloned());
        let cutoff = now_ms.saturating_sub(self.cfg.window_ms);
        self.window.retain(|e| e.ts >= cutoff);

        let mut detections = Vec::new();
        for (name, detector) in DETECTORS {
            match detector(&self.window, tracked) {
                Ok(found) => detections.extend(found),
                Err(err) => {
                    json_log(
                        "signal_engine",
                        obj(&[
                            ("detector", v_str(name)),
                            ("status", v_str("error")),
                            ("error", v_str(&err.to_string())),
                        ]),
                    );
                }
            }
        }

        let mut created = Vec::new();
        for det in detections {
            if det.confidence < self.cfg.min_confidence {
                continue;
            }
            let key = (det.kind, det.token.clone());
            // Reinforcement only applies within a signal's lifetime; an
            // expired entry is replaced, not revived.
            if self.live.get(&key).map(|s| now_ms >= s.expires_at).unwrap_or(false) {
                self.live.remove(&key);
            }
            if let Some(existing) = self.live.get_mut(&key) {
                // Reinforce: bump capped at 0.99, never below the fresh
                // detection, re-anchor so the bump survives decay.
                let bumped = (existing.confidence + self.cfg.reinforce_step)
                    .max(det.confidence)
                    .min(0.99);
                existing.confidence = bumped;
                existing.anchor_confidence = bumped;
                existing.anchor_ts = now_ms;
                existing.strength = existing.strength.max(det.strength);
                existing.urgency = existing.urgency.max(det.urgency);
                existing.expires_at = now_ms + 3 * self.cfg.decay_half_life_ms;
                for id in det.source_event_ids {
                    if !existing.source_event_ids.contains(&id) {
                        existing.source_event_ids.push(id);
                    }
                }
                json_log(
                    "signal_engine",
                    obj(&[
                        ("status", v_str("reinforced")),
                        ("signal_id", v_str(&existing.id)),
                        ("confidence", v_num(existing.confidence)),
                    ]),
                );
            } else {
                self.seq += 1;
                let signal = Signal {
                    id: format!("S-{}-{}", det.kind.label(), self.seq),
                    created_ts: now_ms,
                    kind: det.kind,
                    token: det.token,
                    confidence: det.confidence,
                    strength: det.strength,
                    urgency: det.urgency,
                    summary: det.summary,
                    source_event_ids: det.source_event_ids,
                    expires_at: now_ms + 3 * self.cfg.decay_half_life_ms,
                    decay_rate: self.cfg.decay_rate,
                    anchor_confidence: det.confidence,
                    anchor_ts: now_ms,
                };
                self.live.insert(key, signal.clone());
                created.push(signal);
            }
        }
        created
    }

    /// Decay every live signal and evict the dead. Confidence is always
    /// recomputed from the anchor, so calling this twice at the same
    /// instant changes nothing.
    pub fn update_signals(&mut self, now_ms: u64) -> Vec<Signal> {
        for signal in self.live.values_mut() {
            let elapsed = now_ms.saturating_sub(signal.anchor_ts) as f64;
            let half_lives = elapsed / self.cfg.decay_half_life_ms as f64;
            signal.confidence =
                (signal.anchor_confidence * signal.decay_rate.powf(half_lives)).clamp(0.0, 1.0);
        }
        let min_confidence = self.cfg.min_confidence;
        self.live
            .retain(|_, s| s.confidence >= min_confidence && now_ms < s.expires_at);

        let mut active: Vec<Signal> = self.live.values().cloned().collect();
        active.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        active
    }
}

// =============================================================================
// Test support
// =============================================================================

/// Hand-built signal for exercising downstream components.
#[cfg(test)]
pub fn test_signal(
    kind: SignalKind,
    token: Option<String>,
    confidence: f64,
    strength: f64,
    urgency: f64,
) -> Signal {
    Signal {
        id: format!("S-{}-test", kind.label()),
        created_ts: 0,
        kind,
        token,
        confidence,
        strength,
        urgency,
        summary: String::new(),
        source_event_ids: vec![],
        expires_at: u64::MAX,
        decay_rate: 0.5,
        anchor_confidence: confidence,
        anchor_ts: 0,
    }
}

// =============================================================================
// Tests
// =============================================================================
