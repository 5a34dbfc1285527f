//! Event feed boundary. The agent only ever sees `Vec<MarketEvent>` from an
//! async poll; what produces them is swappable. Two in-repo producers: a
//! seeded synthetic generator for live-ish runs and a JSONL replay for
//! deterministic ones.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Config;
use crate::events::{EventKind, EventSource, MarketEvent};
use crate::logging::{json_log, obj, v_num, v_str};

#[async_trait]
pub trait EventFeed: Send {
    /// Observations that became available up to `now_ms`. An empty batch is
    /// normal; an error is a feed problem the caller logs and rides out.
    async fn poll(&mut self, now_ms: u64) -> Result<Vec<MarketEvent>>;
}

pub fn build_feed(cfg: &Config) -> Result<Box<dyn EventFeed>> {
    match cfg.feed_kind.as_str() {
        "replay" => {
            let feed = ReplayFeed::from_path(&cfg.replay_path)?;
            json_log(
                "feed",
                obj(&[
                    ("kind", v_str("replay")),
                    ("path", v_str(&cfg.replay_path)),
                    ("queued", v_num(feed.remaining() as f64)),
                ]),
            );
            Ok(Box::new(feed))
        }
        _ => {
            json_log(
                "feed",
                obj(&[
                    ("kind", v_str("synthetic")),
                    ("seed", v_num(cfg.feed_seed as f64)),
                ]),
            );
            Ok(Box::new(SyntheticFeed::new(cfg.tracked_tokens.clone(), cfg.feed_seed)))
        }
    }
}

// =============================================================================
// Synthetic feed
// =============================================================================

/// Seeded random-walk event generator over the tracked tokens. Same seed,
/// same stream.
pub struct SyntheticFeed {
    tokens: Vec<String>,
    rng: StdRng,
    prices: Vec<f64>,
    seq: u64,
}

impl SyntheticFeed {
    pub fn new(tokens: Vec<String>, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let prices = tokens.iter().map(|_| rng.gen_range(0.5..5.0)).collect();
        Self { tokens, rng, prices, seq: 0 }
    }

    fn next_id(&mut self) -> String {
        self.seq += 1;
        format!("E-{}", self.seq)
    }
}

#[async_trait]
impl EventFeed for SyntheticFeed {
    async fn poll(&mut self, now_ms: u64) -> Result<Vec<MarketEvent>> {
        let mut out = Vec::new();
        for i in 0..self.tokens.len() {
            let token = self.tokens[i].clone();
            // Random walk, occasionally jumpy.
            let jumpy = self.rng.gen_bool(0.15);
            let change_pct: f64 = if jumpy {
                self.rng.gen_range(-18.0..18.0)
            } else {
                self.rng.gen_range(-3.0..3.0)
            };
            self.prices[i] = (self.prices[i] * (1.0 + change_pct / 100.0)).max(1e-6);
            let price = self.prices[i];
            let id = self.next_id();
            out.push(MarketEvent::new(
                id,
                now_ms,
                EventSource::Market,
                &token,
                EventKind::PriceMove { price, change_pct },
            ));

            if self.rng.gen_bool(0.35) {
                let multiplier = self.rng.gen_range(1.0..6.0);
                let id = self.next_id();
                out.push(MarketEvent::new(
                    id,
                    now_ms,
                    EventSource::Market,
                    &token,
                    EventKind::VolumeSpike { volume: multiplier * 10_000.0, multiplier },
                ));
            }
            if self.rng.gen_bool(0.05) {
                let change_pct = self.rng.gen_range(-45.0..10.0);
                let id = self.next_id();
                out.push(MarketEvent::new(
                    id,
                    now_ms,
                    EventSource::Chain,
                    &token,
                    EventKind::LiquidityShift { change_pct },
                ));
            }
            if self.rng.gen_bool(0.2) {
                let count = self.rng.gen_range(5..120);
                let id = self.next_id();
                out.push(MarketEvent::new(
                    id,
                    now_ms,
                    EventSource::Social,
                    &token,
                    EventKind::MentionSpike { count },
                ));
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Replay feed
// =============================================================================

/// Replays a JSONL file of `MarketEvent` records in timestamp order,
/// releasing each batch once the loop clock reaches it.
pub struct ReplayFeed {
    queue: VecDeque<MarketEvent>,
}

impl ReplayFeed {
    pub fn from_path(path: &str) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open replay file {}", path))?;
        let mut events = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match serde_json::from_str::<MarketEvent>(trimmed) {
                Ok(event) => events.push(event),
                Err(err) => {
                    // Malformed line: logged and skipped, replay continues.
                    json_log(
                        "feed",
                        obj(&[
                            ("kind", v_str("replay")),
                            ("status", v_str("bad_line")),
                            ("line", v_num(lineno as f64 + 1.0)),
                            ("error", v_str(&err.to_string())),
                        ]),
                    );
                }
            }
        }
        events.sort_by_key(|e| e.ts);
        Ok(Self { queue: events.into() })
    }

    pub fn from_events(mut events: Vec<MarketEvent>) -> Self {
        events.sort_by_key(|e| e.ts);
        Self { queue: events.into() }
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

#[async_trait]
impl EventFeed for ReplayFeed {
    async fn poll(&mut self, now_ms: u64) -> Result<Vec<MarketEvent>> {
        let mut out = Vec::new();
        while self.queue.front().map(|e| e.ts <= now_ms).unwrap_or(false) {
            out.push(self.queue.pop_front().expect("front checked"));
        }
        Ok(out)
    }
}

// =============================================================================
// Tests
// =============================================================================
