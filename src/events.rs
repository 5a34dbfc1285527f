use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Market,
    Chain,
    Social,
}

/// Typed event payloads. Detector logic matches on these exhaustively;
/// there is deliberately no open key/value map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    PriceMove { price: f64, change_pct: f64 },
    VolumeSpike { volume: f64, multiplier: f64 },
    LiquidityShift { change_pct: f64 },
    MentionSpike { count: u32 },
    SentimentShift { delta: f64 },
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::PriceMove { .. } => "price_move",
            EventKind::VolumeSpike { .. } => "volume_spike",
            EventKind::LiquidityShift { .. } => "liquidity_shift",
            EventKind::MentionSpike { .. } => "mention_spike",
            EventKind::SentimentShift { .. } => "sentiment_shift",
        }
    }

    pub fn is_social(&self) -> bool {
        matches!(self, EventKind::MentionSpike { .. } | EventKind::SentimentShift { .. })
    }
}

/// One timestamped market observation. Immutable once produced; owned by
/// the signal window until it ages out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEvent {
    pub id: String,
    pub ts: u64,
    pub source: EventSource,
    pub token: Option<String>,
    pub symbol: Option<String>,
    pub kind: EventKind,
}

impl MarketEvent {
    pub fn new(id: String, ts: u64, source: EventSource, token: &str, kind: EventKind) -> Self {
        Self {
            id,
            ts,
            source,
            token: Some(token.to_string()),
            symbol: Some(token.to_string()),
            kind,
        }
    }

    pub fn is_for_token(&self, token: &str) -> bool {
        self.token.as_deref() == Some(token)
    }
}
