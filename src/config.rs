use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tokens the agent watches (dormancy detection keys off this list).
    pub tracked_tokens: Vec<String>,
    pub tick_ms: u64,

    // Signal engine
    pub window_ms: u64,
    pub decay_half_life_ms: u64,
    pub decay_rate: f64,
    pub min_confidence: f64,
    pub reinforce_step: f64,

    // Decision engine
    pub intent_cooldown_ms: u64,
    pub min_signal_confidence: f64,

    // Risk guardrails
    pub max_position_size_pct: f64,
    pub max_total_exposure_pct: f64,
    pub max_daily_loss_pct: f64,
    pub daily_trade_limit: Option<u32>,

    // Paper execution
    pub starting_capital: f64,
    pub slippage_pct: f64,

    // Loop plumbing
    pub feed_timeout_ms: u64,
    pub exec_timeout_ms: u64,
    pub sqlite_path: String,
    pub persist_every_ticks: u64,
    pub feed_kind: String,
    pub replay_path: String,
    pub feed_seed: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            tracked_tokens: std::env::var("TRACKED_TOKENS")
                .unwrap_or_else(|_| "SOL,WIF,BONK".to_string())
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            tick_ms: env_parse("TICK_MS", 60_000),
            window_ms: env_parse("WINDOW_MS", 900_000),
            decay_half_life_ms: env_parse("DECAY_HALF_LIFE_MS", 300_000),
            decay_rate: env_parse("DECAY_RATE", 0.5),
            min_confidence: env_parse("MIN_CONFIDENCE", 0.3),
            reinforce_step: env_parse("REINFORCE_STEP", 0.1),
            intent_cooldown_ms: env_parse("INTENT_COOLDOWN_MS", 120_000),
            min_signal_confidence: env_parse("MIN_SIGNAL_CONFIDENCE", 0.45),
            max_position_size_pct: env_parse("MAX_POS_PCT", 10.0),
            max_total_exposure_pct: env_parse("MAX_EXPOSURE_PCT", 50.0),
            max_daily_loss_pct: env_parse("MAX_DAILY_LOSS_PCT", 5.0),
            daily_trade_limit: std::env::var("MAX_TRADES_DAY").ok().and_then(|v| v.parse().ok()),
            starting_capital: env_parse("STARTING_CAPITAL", 1_000.0),
            slippage_pct: env_parse("SLIPPAGE_PCT", 0.5),
            feed_timeout_ms: env_parse("FEED_TIMEOUT_MS", 10_000),
            exec_timeout_ms: env_parse("EXEC_TIMEOUT_MS", 10_000),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./agent.sqlite".to_string()),
            persist_every_ticks: env_parse("PERSIST_TICKS", 10),
            feed_kind: std::env::var("FEED").unwrap_or_else(|_| "synthetic".to_string()),
            replay_path: std::env::var("REPLAY_PATH").unwrap_or_else(|_| "./events.jsonl".to_string()),
            feed_seed: env_parse("FEED_SEED", 7),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// SHA256 over the serialized config, for run provenance.
    pub fn config_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_json().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::from_env();
        assert!(cfg.window_ms > 0);
        assert!(cfg.decay_rate > 0.0 && cfg.decay_rate < 1.0);
        assert!(cfg.max_position_size_pct <= cfg.max_total_exposure_pct);
        assert!(!cfg.tracked_tokens.is_empty());
    }

    #[test]
    fn config_hash_deterministic() {
        let cfg = Config::from_env();
        assert_eq!(cfg.config_hash(), cfg.config_hash());
        assert_eq!(cfg.config_hash().len(), 64);
    }

    #[test]
    fn config_json_round_trip() {
        let cfg = Config::from_env();
        let json = cfg.to_json();
        let parsed: Config = serde_json::from_str(&json).expect("config JSON should parse");
        assert_eq!(parsed.tracked_tokens, cfg.tracked_tokens);
        assert_eq!(parsed.config_hash(), cfg.config_hash());
    }
}
