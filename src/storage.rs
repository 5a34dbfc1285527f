//! Persisted state shapes and the SQLite snapshot store.
//!
//! Everything the loop needs to survive a restart is one self-contained
//! JSON record: agent state, book, trailing trade ledger, tracked tokens.
//! Token convictions are serialized as an explicit key/value list so the
//! record stays portable across consumers.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::executor::{Position, TradeResult};
use crate::state::{AgentState, ConvictionBook, Mode, Mood};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConviction {
    pub token: String,
    pub conviction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedAgentState {
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
    pub token_convictions: Vec<TokenConviction>,
}

impl PersistedAgentState {
    pub fn from_state(state: &AgentState) -> Self {
        Self {
            confidence: state.confidence,
            suspicion: state.suspicion,
            conviction: state.conviction,
            fatigue: state.fatigue,
            aggression: state.aggression,
            regret: state.regret,
            risk_appetite: state.risk_appetite,
            primary_mood: state.primary_mood,
            secondary_mood: state.secondary_mood,
            mode: state.mode,
            win_streak: state.win_streak,
            loss_streak: state.loss_streak,
            last_trade_ts: state.last_trade_ts,
            token_convictions: state
                .token_convictions
                .entries()
                .map(|(token, conviction)| TokenConviction {
                    token: token.clone(),
                    conviction: *conviction,
                })
                .collect(),
        }
    }

    pub fn into_state(self) -> AgentState {
        let mut convictions = ConvictionBook::default();
        for tc in &self.token_convictions {
            convictions.set(&tc.token, tc.conviction);
        }
        AgentState {
            confidence: self.confidence,
            suspicion: self.suspicion,
            conviction: self.conviction,
            fatigue: self.fatigue,
            aggression: self.aggression,
            regret: self.regret,
            risk_appetite: self.risk_appetite,
            primary_mood: self.primary_mood,
            secondary_mood: self.secondary_mood,
            mode: self.mode,
            win_streak: self.win_streak,
            loss_streak: self.loss_streak,
            last_trade_ts: self.last_trade_ts,
            token_convictions: convictions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedBook {
    pub capital: f64,
    pub positions: Vec<Position>,
}

/// One complete loop snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub ts: u64,
    pub state: PersistedAgentState,
    pub book: PersistedBook,
    pub ledger: Vec<TradeResult>,
    pub tracked_tokens: Vec<String>,
    pub total_value: f64,
}

pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS snapshots (
                ts INTEGER NOT NULL,
                total_value REAL NOT NULL,
                record TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_ts ON snapshots(ts);
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn persist_snapshot(&mut self, record: &SnapshotRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO snapshots (ts, total_value, record) VALUES (?1, ?2, ?3)",
            params![record.ts as i64, record.total_value, json],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_latest(&self) -> Result<Option<SnapshotRecord>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM snapshots ORDER BY ts DESC, rowid DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateModel;

    fn record(ts: u64, capital: f64) -> SnapshotRecord {
        let mut model = StateModel::new(0);
        model.nudge_conviction("SOL", 0.2);
        SnapshotRecord {
            ts,
            state: PersistedAgentState::from_state(&model.snapshot()),
            book: PersistedBook { capital, positions: vec![] },
            ledger: vec![],
            tracked_tokens: vec!["SOL".to_string()],
            total_value: capital,
        }
    }

    #[test]
    fn convictions_serialize_as_key_value_list() {
        let r = record(1_000, 100.0);
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"token_convictions\":[{\"token\":\"SOL\",\"conviction\":0.7"));
        let back: SnapshotRecord = serde_json::from_str(&json).unwrap();
        let state = back.state.into_state();
        assert!((state.token_convictions.get("SOL") - 0.7).abs() < 1e-9);
        assert!((state.token_convictions.get("BONK") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn snapshot_round_trip_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.sqlite");
        let mut store = StateStore::new(path.to_str().unwrap()).unwrap();
        store.init().unwrap();
        assert!(store.load_latest().unwrap().is_none());

        store.persist_snapshot(&record(1_000, 100.0)).unwrap();
        store.persist_snapshot(&record(2_000, 95.0)).unwrap();

        let latest = store.load_latest().unwrap().unwrap();
        assert_eq!(latest.ts, 2_000);
        assert!((latest.book.capital - 95.0).abs() < 1e-9);
        assert_eq!(latest.tracked_tokens, vec!["SOL".to_string()]);
    }

    #[test]
    fn init_is_idempotent() {
        let mut store = StateStore::in_memory().unwrap();
        store.init().unwrap();
        store.init().unwrap();
        store.persist_snapshot(&record(1_000, 100.0)).unwrap();
        assert!(store.load_latest().unwrap().is_some());
    }
}
