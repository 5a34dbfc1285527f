//! Paper execution: turns an approved intent into a simulated fill and
//! keeps the book (capital + positions) consistent.
//!
//! The `Executor` trait is the contract a real DEX executor must satisfy.
//! Business failures (insufficient capital, missing position) are `Failed`
//! trade results, never errors; `Err` is reserved for transport-fatal
//! conditions a real executor might hit.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::decision::{Intent, IntentKind};
use crate::logging::{json_log, obj, v_num, v_str};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Filled,
    Failed,
}

/// Immutable record of one simulated fill (or refusal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub id: String,
    pub intent_id: String,
    pub ts: u64,
    pub kind: IntentKind,
    pub token: Option<String>,
    pub requested_size_pct: Option<f64>,
    pub filled_amount: f64,
    pub price: f64,
    pub slippage_pct: f64,
    pub status: TradeStatus,
    pub error: Option<String>,
    pub realized_pnl: Option<f64>,
    pub tx_signature: Option<String>,
    pub signal_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub token: String,
    pub symbol: String,
    pub amount: f64,
    pub avg_entry_price: f64,
    pub current_price: Option<f64>,
    pub unrealized_pnl: Option<f64>,
    pub unrealized_pnl_pct: Option<f64>,
    pub opened_at: u64,
    pub last_updated_at: u64,
    pub entry_intent_id: String,
    pub trade_ids: Vec<String>,
}

impl Position {
    pub fn market_value(&self) -> f64 {
        self.amount * self.current_price.unwrap_or(self.avg_entry_price)
    }

    pub fn pnl_pct(&self) -> f64 {
        self.unrealized_pnl_pct.unwrap_or(0.0)
    }
}

/// Contract for anything that can turn an approved intent into a fill.
/// A real (non-paper) implementation must be wrapped so only one execution
/// is in flight at a time, and must time out rather than stall the tick.
#[async_trait]
pub trait Executor: Send {
    async fn execute(&mut self, intent: &Intent, now_ms: u64) -> Result<TradeResult>;
}

// =============================================================================
// Paper book
// =============================================================================

/// Simulated portfolio: free capital plus one position per token.
pub struct PaperBook {
    capital: f64,
    positions: HashMap<String, Position>,
    prices: HashMap<String, f64>,
    slippage_pct: f64,
    seq: u64,
}

impl PaperBook {
    pub fn new(starting_capital: f64, slippage_pct: f64) -> Self {
        Self {
            capital: starting_capital,
            positions: HashMap::new(),
            prices: HashMap::new(),
            slippage_pct,
            seq: 0,
        }
    }

    /// Rebuild a book from a persisted snapshot.
    pub fn restore(capital: f64, positions: Vec<Position>, slippage_pct: f64) -> Self {
        let mut book = Self::new(capital, slippage_pct);
        for pos in positions {
            if let Some(price) = pos.current_price {
                book.prices.insert(pos.token.clone(), price);
            }
            book.positions.insert(pos.token.clone(), pos);
        }
        book
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn position(&self, token: &str) -> Option<&Position> {
        self.positions.get(token)
    }

    /// Open positions, deterministically ordered by token.
    pub fn positions(&self) -> Vec<Position> {
        let mut out: Vec<Position> = self.positions.values().cloned().collect();
        out.sort_by(|a, b| a.token.cmp(&b.token));
        out
    }

    pub fn observe_price(&mut self, token: &str, price: f64) {
        if price.is_finite() && price > 0.0 {
            self.prices.insert(token.to_string(), price);
        }
    }

    pub fn last_price(&self, token: &str) -> Option<f64> {
        self.prices.get(token).copied()
    }

    /// capital + mark-to-market position value. The conservation invariant:
    /// this never changes except through slippage and price moves.
    pub fn total_value(&self) -> f64 {
        self.capital + self.positions.values().map(|p| p.market_value()).sum::<f64>()
    }

    pub fn total_exposure_pct(&self) -> f64 {
        if self.capital <= 0.0 && self.positions.is_empty() {
            return 0.0;
        }
        let exposure: f64 = self.positions.values().map(|p| p.market_value()).sum();
        if self.capital > 0.0 {
            exposure / self.capital * 100.0
        } else {
            100.0
        }
    }

    /// Refresh mark-to-market fields on every open position. Missing prices
    /// are skipped, capital is never touched here.
    pub fn update_positions(&mut self, prices: &HashMap<String, f64>, now_ms: u64) {
        for (token, price) in prices {
            if price.is_finite() && *price > 0.0 {
                self.prices.insert(token.clone(), *price);
            }
        }
        for pos in self.positions.values_mut() {
            let Some(price) = self.prices.get(&pos.token).copied() else {
                continue;
            };
            pos.current_price = Some(price);
            pos.unrealized_pnl = Some((price - pos.avg_entry_price) * pos.amount);
            pos.unrealized_pnl_pct = if pos.avg_entry_price > 0.0 {
                Some((price - pos.avg_entry_price) / pos.avg_entry_price * 100.0)
            } else {
                None
            };
            pos.last_updated_at = now_ms;
        }
    }

    pub fn apply(&mut self, intent: &Intent, now_ms: u64) -> TradeResult {
        let result = match intent.kind {
            IntentKind::Enter => self.enter(intent, now_ms),
            IntentKind::Add => self.add(intent, now_ms),
            IntentKind::Reduce => self.reduce(intent, now_ms),
            IntentKind::Exit => self.exit(intent, now_ms),
            _ => self.refuse(intent, now_ms, "intent kind has no execution path"),
        };
        json_log(
            "paper_exec",
            obj(&[
                ("trade_id", v_str(&result.id)),
                ("intent_id", v_str(&intent.id)),
                ("kind", v_str(intent.kind.label())),
                ("status", v_str(match result.status {
                    TradeStatus::Filled => "filled",
                    TradeStatus::Failed => "failed",
                })),
                ("filled_amount", v_num(result.filled_amount)),
                ("price", v_num(result.price)),
                ("capital", v_num(self.capital)),
                ("total_value", v_num(self.total_value())),
            ]),
        );
        result
    }

    fn next_trade_id(&mut self) -> String {
        self.seq += 1;
        format!("T-{}", self.seq)
    }

    fn blank(&mut self, intent: &Intent, now_ms: u64) -> TradeResult {
        TradeResult {
            id: self.next_trade_id(),
            intent_id: intent.id.clone(),
            ts: now_ms,
            kind: intent.kind,
            token: intent.token.clone(),
            requested_size_pct: intent.effective_size_pct(),
            filled_amount: 0.0,
            price: 0.0,
            slippage_pct: self.slippage_pct,
            status: TradeStatus::Failed,
            error: None,
            realized_pnl: None,
            tx_signature: None,
            signal_ids: intent.signal_ids.clone(),
        }
    }

    fn refuse(&mut self, intent: &Intent, now_ms: u64, why: &str) -> TradeResult {
        let mut r = self.blank(intent, now_ms);
        r.error = Some(why.to_string());
        r
    }

    fn enter(&mut self, intent: &Intent, now_ms: u64) -> TradeResult {
        let mut r = self.blank(intent, now_ms);
        let Some(token) = intent.token.clone() else {
            r.error = Some("enter requires a token".to_string());
            return r;
        };
        let Some(size_pct) = intent.effective_size_pct() else {
            r.error = Some("enter requires a size".to_string());
            return r;
        };
        if self.positions.contains_key(&token) {
            r.error = Some(format!("position already open for {}", token));
            return r;
        }
        let Some(price) = self.last_price(&token) else {
            r.error = Some(format!("no observed price for {}", token));
            return r;
        };
        let invest = self.capital * size_pct / 100.0;
        if invest > self.capital {
            r.error = Some(format!(
                "insufficient capital: need {:.4}, have {:.4}",
                invest, self.capital
            ));
            return r;
        }
        let actual_price = price * (1.0 + self.slippage_pct / 100.0);
        let amount = invest / actual_price;
        self.capital -= invest;
        self.positions.insert(
            token.clone(),
            Position {
                token: token.clone(),
                symbol: intent.symbol_or_token(),
                amount,
                avg_entry_price: actual_price,
                current_price: Some(price),
                unrealized_pnl: None,
                unrealized_pnl_pct: None,
                opened_at: now_ms,
                last_updated_at: now_ms,
                entry_intent_id: intent.id.clone(),
                trade_ids: vec![r.id.clone()],
            },
        );
        r.status = TradeStatus::Filled;
        r.filled_amount = amount;
        r.price = actual_price;
        r
    }

    fn add(&mut self, intent: &Intent, now_ms: u64) -> TradeResult {
        let mut r = self.blank(intent, now_ms);
        let Some(token) = intent.token.clone() else {
            r.error = Some("add requires a token".to_string());
            return r;
        };
        let Some(size_pct) = intent.effective_size_pct() else {
            r.error = Some("add requires a size".to_string());
            return r;
        };
        if !self.positions.contains_key(&token) {
            r.error = Some(format!("no open position for {}", token));
            return r;
        }
        let Some(price) = self.last_price(&token) else {
            r.error = Some(format!("no observed price for {}", token));
            return r;
        };
        let invest = self.capital * size_pct / 100.0;
        if invest > self.capital {
            r.error = Some(format!(
                "insufficient capital: need {:.4}, have {:.4}",
                invest, self.capital
            ));
            return r;
        }
        let actual_price = price * (1.0 + self.slippage_pct / 100.0);
        let added = invest / actual_price;
        let pos = self.positions.get_mut(&token).expect("checked above");
        // Capital-weighted average entry across the old lot and the new lot.
        pos.avg_entry_price = (pos.amount * pos.avg_entry_price + invest) / (pos.amount + added);
        pos.amount += added;
        pos.last_updated_at = now_ms;
        pos.trade_ids.push(r.id.clone());
        self.capital -= invest;
        r.status = TradeStatus::Filled;
        r.filled_amount = added;
        r.price = actual_price;
        r
    }

    fn reduce(&mut self, intent: &Intent, now_ms: u64) -> TradeResult {
        let mut r = self.blank(intent, now_ms);
        let Some(token) = intent.token.clone() else {
            r.error = Some("reduce requires a token".to_string());
            return r;
        };
        let Some(size_pct) = intent.effective_size_pct() else {
            r.error = Some("reduce requires a size".to_string());
            return r;
        };
        if !self.positions.contains_key(&token) {
            r.error = Some(format!("no open position for {}", token));
            return r;
        }
        let price = match self.last_price(&token) {
            Some(p) => p,
            None => self.positions[&token].avg_entry_price,
        };
        let actual_price = price * (1.0 - self.slippage_pct / 100.0);
        let pos = self.positions.get_mut(&token).expect("checked above");
        let sold = pos.amount * (size_pct / 100.0).clamp(0.0, 1.0);
        let proceeds = sold * actual_price;
        let realized = (actual_price - pos.avg_entry_price) * sold;
        // The position stays open even at amount ≈ 0; cleanup is the
        // caller's call, and PnL% divides by entry price, not amount.
        pos.amount -= sold;
        pos.last_updated_at = now_ms;
        pos.trade_ids.push(r.id.clone());
        self.capital += proceeds;
        r.status = TradeStatus::Filled;
        r.filled_amount = sold;
        r.price = actual_price;
        r.realized_pnl = Some(realized);
        r
    }

    fn exit(&mut self, intent: &Intent, now_ms: u64) -> TradeResult {
        let mut r = self.blank(intent, now_ms);
        let Some(token) = intent.token.clone() else {
            r.error = Some("exit requires a token".to_string());
            return r;
        };
        let Some(pos) = self.positions.remove(&token) else {
            r.error = Some(format!("no open position for {}", token));
            return r;
        };
        let price = self.last_price(&token).unwrap_or(pos.avg_entry_price);
        let actual_price = price * (1.0 - self.slippage_pct / 100.0);
        let proceeds = pos.amount * actual_price;
        let realized = (actual_price - pos.avg_entry_price) * pos.amount;
        self.capital += proceeds;
        r.status = TradeStatus::Filled;
        r.filled_amount = pos.amount;
        r.price = actual_price;
        r.realized_pnl = Some(realized);
        r
    }
}

/// The in-repo `Executor`: applies intents to the paper book synchronously.
pub struct PaperExecutor {
    pub book: PaperBook,
}

impl PaperExecutor {
    pub fn new(book: PaperBook) -> Self {
        Self { book }
    }
}

#[async_trait]
impl Executor for PaperExecutor {
    async fn execute(&mut self, intent: &Intent, now_ms: u64) -> Result<TradeResult> {
        Ok(self.book.apply(intent, now_ms))
    }
}

// =============================================================================
// Test support
// =============================================================================

#[cfg(test)]
pub mod test_support {
    use super::*;

    pub fn filled_trade(token: &str, amount: f64, price: f64) -> TradeResult {
        TradeResult {
            id: "T-test".to_string(),
            intent_id: "I-test".to_string(),
            ts: 0,
            kind: IntentKind::Enter,
            token: Some(token.to_string()),
            requested_size_pct: Some(10.0),
            filled_amount: amount,
            price,
            slippage_pct: 0.0,
            status: TradeStatus::Filled,
            error: None,
            realized_pnl: None,
            tx_signature: None,
            signal_ids: vec![],
        }
    }

    pub fn failed_trade(token: &str, error: &str) -> TradeResult {
        TradeResult {
            status: TradeStatus::Failed,
            error: Some(error.to_string()),
            realized_pnl: None,
            ..filled_trade(token, 0.0, 0.0)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::test_support::intent;

    fn book() -> PaperBook {
        let mut b = PaperBook::new(100.0, 0.0);
        b.observe_price("SOL", 1.0);
        b
    }

    #[test]
    fn enter_debits_capital_and_opens_position() {
        let mut b = book();
        let r = b.apply(&intent(IntentKind::Enter, Some("SOL"), Some(10.0)), 1_000);
        assert_eq!(r.status, TradeStatus::Filled);
        assert!((r.filled_amount - 10.0).abs() < 1e-9);
        assert!((b.capital() - 90.0).abs() < 1e-9);
        let pos = b.position("SOL").unwrap();
        assert!((pos.amount - 10.0).abs() < 1e-9);
        assert!((pos.avg_entry_price - 1.0).abs() < 1e-9);
        assert_eq!(pos.entry_intent_id, "I-test-1");
    }

    #[test]
    fn enter_without_price_fails_soft() {
        let mut b = book();
        let r = b.apply(&intent(IntentKind::Enter, Some("WIF"), Some(10.0)), 1_000);
        assert_eq!(r.status, TradeStatus::Failed);
        assert!(r.error.unwrap().contains("no observed price"));
        assert!((b.capital() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn double_enter_is_refused() {
        let mut b = book();
        b.apply(&intent(IntentKind::Enter, Some("SOL"), Some(10.0)), 1_000);
        let r = b.apply(&intent(IntentKind::Enter, Some("SOL"), Some(10.0)), 2_000);
        assert_eq!(r.status, TradeStatus::Failed);
        assert!(r.error.unwrap().contains("already open"));
    }

    #[test]
    fn enter_applies_slippage() {
        let mut b = PaperBook::new(100.0, 1.0);
        b.observe_price("SOL", 1.0);
        let r = b.apply(&intent(IntentKind::Enter, Some("SOL"), Some(10.0)), 1_000);
        assert!((r.price - 1.01).abs() < 1e-9);
        let pos = b.position("SOL").unwrap();
        assert!((pos.amount - 10.0 / 1.01).abs() < 1e-9);
    }

    #[test]
    fn add_uses_capital_weighted_average_entry() {
        let mut b = book();
        b.apply(&intent(IntentKind::Enter, Some("SOL"), Some(10.0)), 1_000);
        b.observe_price("SOL", 2.0);
        // 25% of remaining 90 = 22.5 at price 2.0 → 11.25 more units.
        let r = b.apply(&intent(IntentKind::Add, Some("SOL"), Some(25.0)), 2_000);
        assert_eq!(r.status, TradeStatus::Filled);
        let pos = b.position("SOL").unwrap();
        assert!((pos.amount - 21.25).abs() < 1e-9);
        // (10*1.0 + 22.5) / 21.25
        assert!((pos.avg_entry_price - 32.5 / 21.25).abs() < 1e-9);
        assert!((b.capital() - 67.5).abs() < 1e-9);
    }

    #[test]
    fn add_without_position_fails_soft() {
        let mut b = book();
        let r = b.apply(&intent(IntentKind::Add, Some("SOL"), Some(25.0)), 1_000);
        assert_eq!(r.status, TradeStatus::Failed);
        assert!(r.error.unwrap().contains("no open position"));
    }

    #[test]
    fn reduce_keeps_position_open_even_at_zero() {
        let mut b = book();
        b.apply(&intent(IntentKind::Enter, Some("SOL"), Some(10.0)), 1_000);
        let r = b.apply(&intent(IntentKind::Reduce, Some("SOL"), Some(100.0)), 2_000);
        assert_eq!(r.status, TradeStatus::Filled);
        assert!((b.capital() - 100.0).abs() < 1e-9);
        let pos = b.position("SOL").expect("reduce must not auto-close");
        assert!(pos.amount.abs() < 1e-12);
    }

    #[test]
    fn reduce_half_credits_proceeds() {
        let mut b = book();
        b.apply(&intent(IntentKind::Enter, Some("SOL"), Some(10.0)), 1_000);
        b.observe_price("SOL", 1.5);
        let r = b.apply(&intent(IntentKind::Reduce, Some("SOL"), Some(50.0)), 2_000);
        assert!((r.filled_amount - 5.0).abs() < 1e-9);
        assert!((b.capital() - 97.5).abs() < 1e-9);
        assert!((r.realized_pnl.unwrap() - 2.5).abs() < 1e-9);
        assert!((b.position("SOL").unwrap().amount - 5.0).abs() < 1e-9);
    }

    #[test]
    fn exit_closes_and_credits() {
        let mut b = book();
        b.apply(&intent(IntentKind::Enter, Some("SOL"), Some(10.0)), 1_000);
        b.observe_price("SOL", 1.2);
        let r = b.apply(&intent(IntentKind::Exit, Some("SOL"), None), 2_000);
        assert_eq!(r.status, TradeStatus::Filled);
        assert!((b.capital() - 102.0).abs() < 1e-9);
        assert!((r.realized_pnl.unwrap() - 2.0).abs() < 1e-9);
        assert!(b.position("SOL").is_none());
    }

    #[test]
    fn exit_without_position_fails_soft() {
        let mut b = book();
        let r = b.apply(&intent(IntentKind::Exit, Some("SOL"), None), 1_000);
        assert_eq!(r.status, TradeStatus::Failed);
        assert!(r.error.unwrap().contains("no open position"));
    }

    #[test]
    fn update_positions_marks_to_market_without_touching_capital() {
        let mut b = book();
        b.apply(&intent(IntentKind::Enter, Some("SOL"), Some(10.0)), 1_000);
        let capital_before = b.capital();
        let mut prices = HashMap::new();
        prices.insert("SOL".to_string(), 1.2);
        b.update_positions(&prices, 2_000);
        let pos = b.position("SOL").unwrap();
        assert!((pos.unrealized_pnl.unwrap() - 2.0).abs() < 1e-9);
        assert!((pos.unrealized_pnl_pct.unwrap() - 20.0).abs() < 1e-9);
        assert_eq!(pos.last_updated_at, 2_000);
        assert_eq!(b.capital(), capital_before);
    }

    #[test]
    fn missing_price_is_skipped_not_fatal() {
        let mut b = book();
        b.apply(&intent(IntentKind::Enter, Some("SOL"), Some(10.0)), 1_000);
        b.update_positions(&HashMap::new(), 2_000);
        // Still marked with the last observed price from entry time.
        let pos = b.position("SOL").unwrap();
        assert!(pos.unrealized_pnl.is_some());
    }

    #[test]
    fn conservation_with_zero_slippage_and_flat_prices() {
        let mut b = book();
        let start = b.total_value();
        b.apply(&intent(IntentKind::Enter, Some("SOL"), Some(10.0)), 1_000);
        assert!((b.total_value() - start).abs() < 1e-9);
        b.apply(&intent(IntentKind::Add, Some("SOL"), Some(25.0)), 2_000);
        assert!((b.total_value() - start).abs() < 1e-9);
        b.apply(&intent(IntentKind::Reduce, Some("SOL"), Some(50.0)), 3_000);
        assert!((b.total_value() - start).abs() < 1e-9);
        b.apply(&intent(IntentKind::Exit, Some("SOL"), None), 4_000);
        assert!((b.total_value() - start).abs() < 1e-9);
        assert!((b.capital() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn exposure_pct_tracks_open_positions() {
        let mut b = book();
        assert!((b.total_exposure_pct() - 0.0).abs() < 1e-9);
        b.apply(&intent(IntentKind::Enter, Some("SOL"), Some(20.0)), 1_000);
        // 20 invested against 80 free capital.
        assert!((b.total_exposure_pct() - 25.0).abs() < 1e-9);
    }
}
