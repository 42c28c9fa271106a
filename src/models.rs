/// models.rs – Core data types shared across the client modules.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub type PositionId = i64;
pub type SymbolId = i64;
pub type AccountId = i64;
pub type OrderId = i64;
pub type DealId = i64;

/// Fallback contract size when the symbol list has none (or zero).
pub const DEFAULT_CONTRACT_SIZE: f64 = 100_000.0;
/// Fallback price scaling exponent for symbols we have no metadata for.
pub const DEFAULT_PIPS_POSITION: u32 = 5;
/// Volume units per standard lot.
pub const UNITS_PER_LOT: f64 = 100.0;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// Broker wire code (1 = BUY, 2 = SELL).
    pub fn code(self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Side::Buy),
            2 => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" | "B" => Ok(Side::Buy),
            "SELL" | "S" => Ok(Side::Sell),
            _ => Err(anyhow::anyhow!("Unknown side: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit(f64),
    Stop(f64),
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit(_) => "LIMIT",
            OrderType::Stop(_) => "STOP",
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit(p) => write!(f, "LIMIT @ {p}"),
            OrderType::Stop(p) => write!(f, "STOP @ {p}"),
        }
    }
}

/// Execution kinds the client acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionKind {
    Filled,
    Close,
    Cancel,
    Other(i64),
}

impl ExecutionKind {
    /// Close-like executions remove the position locally.
    pub fn is_close_like(self) -> bool {
        matches!(self, ExecutionKind::Close | ExecutionKind::Cancel)
    }
}

impl std::fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionKind::Filled => f.write_str("ORDER_FILLED"),
            ExecutionKind::Close => f.write_str("CLOSE_POSITION"),
            ExecutionKind::Cancel => f.write_str("ORDER_CANCEL"),
            ExecutionKind::Other(code) => write!(f, "EXECUTION_{code}"),
        }
    }
}

/// Candle period for trendbar history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendbarPeriod {
    M1,
    M2,
    M3,
    M4,
    M5,
    M10,
    M15,
    M30,
    H1,
    H4,
    H12,
    D1,
    W1,
    MN1,
}

impl TrendbarPeriod {
    const ALL: [TrendbarPeriod; 14] = [
        TrendbarPeriod::M1,
        TrendbarPeriod::M2,
        TrendbarPeriod::M3,
        TrendbarPeriod::M4,
        TrendbarPeriod::M5,
        TrendbarPeriod::M10,
        TrendbarPeriod::M15,
        TrendbarPeriod::M30,
        TrendbarPeriod::H1,
        TrendbarPeriod::H4,
        TrendbarPeriod::H12,
        TrendbarPeriod::D1,
        TrendbarPeriod::W1,
        TrendbarPeriod::MN1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TrendbarPeriod::M1 => "M1",
            TrendbarPeriod::M2 => "M2",
            TrendbarPeriod::M3 => "M3",
            TrendbarPeriod::M4 => "M4",
            TrendbarPeriod::M5 => "M5",
            TrendbarPeriod::M10 => "M10",
            TrendbarPeriod::M15 => "M15",
            TrendbarPeriod::M30 => "M30",
            TrendbarPeriod::H1 => "H1",
            TrendbarPeriod::H4 => "H4",
            TrendbarPeriod::H12 => "H12",
            TrendbarPeriod::D1 => "D1",
            TrendbarPeriod::W1 => "W1",
            TrendbarPeriod::MN1 => "MN1",
        }
    }

    /// Broker wire code (M1 = 1 … MN1 = 14).
    pub fn code(self) -> i64 {
        Self::ALL
            .iter()
            .position(|p| *p == self)
            .map_or(0, |i| i as i64 + 1)
    }
}

impl std::fmt::Display for TrendbarPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrendbarPeriod {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == upper)
            .ok_or_else(|| anyhow::anyhow!("Unknown period: {s} (M1..M30, H1, H4, H12, D1, W1, MN1)"))
    }
}

/// Reference-data and history listings the menu only reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Assets,
    AssetClasses,
    SymbolCategories,
    Trendbars,
    DealOffsets,
    PositionOrders,
}

impl CatalogKind {
    pub fn label(self) -> &'static str {
        match self {
            CatalogKind::Assets => "assets",
            CatalogKind::AssetClasses => "asset classes",
            CatalogKind::SymbolCategories => "symbol categories",
            CatalogKind::Trendbars => "trendbars",
            CatalogKind::DealOffsets => "deal offsets",
            CatalogKind::PositionOrders => "orders for position",
        }
    }
}

// ---------------------------------------------------------------------------
// Position / symbols / quotes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: PositionId,
    pub symbol_id: SymbolId,
    pub side: Side,
    /// Volume in minor units (100 = 1 lot).
    pub volume_units: i64,
    pub entry_price: f64,
    /// Epoch millis.
    pub open_timestamp: i64,
    /// Margin in account currency, when the broker reports it.
    pub used_margin: Option<f64>,
}

impl Position {
    pub fn lots(&self) -> f64 {
        self.volume_units as f64 / UNITS_PER_LOT
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.open_timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol_id: SymbolId,
    pub name: String,
    pub pips_position: u32,
    pub contract_size: f64,
}

impl SymbolInfo {
    /// Contract size with the platform fallback for missing/zero values.
    pub fn effective_contract_size(&self) -> f64 {
        if self.contract_size.is_finite() && self.contract_size > 0.0 {
            self.contract_size
        } else {
            DEFAULT_CONTRACT_SIZE
        }
    }

    /// Convert a raw integer wire price into human-readable units.
    pub fn scale_price(&self, raw: u64) -> f64 {
        scale_price(raw, self.pips_position)
    }
}

pub fn scale_price(raw: u64, pips_position: u32) -> f64 {
    raw as f64 / 10f64.powi(pips_position as i32)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub bid: f64,
    pub ask: f64,
}

/// One entry of an unrealized-PnL batch, already in account currency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnlReport {
    pub position_id: PositionId,
    pub net: f64,
    pub gross: f64,
}

/// A pending order from a reconcile snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub order_id: OrderId,
    pub symbol_id: Option<SymbolId>,
    pub status: i64,
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountMeta {
    pub account_id: AccountId,
    pub currency: String,
    pub broker: String,
    pub is_live: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TraderInfo {
    pub account_id: AccountId,
    pub balance: f64,
    pub equity: Option<f64>,
    pub free_margin: Option<f64>,
}

// ---------------------------------------------------------------------------
// Rolling notice log
// ---------------------------------------------------------------------------

/// Bounded, oldest-evicted-first list of operator notices.
#[derive(Debug, Clone)]
pub struct NoticeLog {
    entries: VecDeque<String>,
    capacity: usize,
}

impl NoticeLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, msg: impl Into<String>) {
        let entry = format!("[{}] {}", Utc::now().format("%H:%M:%S"), msg.into());
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// The newest `n` entries, oldest first.
    pub fn latest(&self, n: usize) -> impl Iterator<Item = &String> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }

    /// True if a retained entry carries exactly this message.
    pub fn contains(&self, msg: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.split_once("] ").is_some_and(|(_, body)| body == msg))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_log_evicts_oldest() {
        let mut log = NoticeLog::new(3);
        for i in 0..5 {
            log.push(format!("n{i}"));
        }
        assert_eq!(log.len(), 3);
        let kept: Vec<&String> = log.latest(3).collect();
        assert!(kept[0].ends_with("n2"));
        assert!(kept[2].ends_with("n4"));
        assert!(log.contains("n3"));
        assert!(!log.contains("n1"));
    }

    #[test]
    fn latest_returns_newest_tail() {
        let mut log = NoticeLog::new(6);
        for i in 0..4 {
            log.push(format!("n{i}"));
        }
        let tail: Vec<&String> = log.latest(2).collect();
        assert_eq!(tail.len(), 2);
        assert!(tail[0].ends_with("n2"));
        assert!(tail[1].ends_with("n3"));
    }

    #[test]
    fn trendbar_period_codes() {
        assert_eq!("m1".parse::<TrendbarPeriod>().unwrap().code(), 1);
        assert_eq!("H4".parse::<TrendbarPeriod>().unwrap().code(), 10);
        assert_eq!("MN1".parse::<TrendbarPeriod>().unwrap().code(), 14);
        assert!("M7".parse::<TrendbarPeriod>().is_err());
    }

    #[test]
    fn contract_size_falls_back_when_zero() {
        let sym = SymbolInfo {
            symbol_id: 1,
            name: "EURUSD".into(),
            pips_position: 5,
            contract_size: 0.0,
        };
        assert_eq!(sym.effective_contract_size(), DEFAULT_CONTRACT_SIZE);
        assert!((sym.scale_price(120_005) - 1.20005).abs() < 1e-12);
    }

    #[test]
    fn side_parses_case_insensitively() {
        assert_eq!("buy".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("SELL".parse::<Side>().unwrap(), Side::Sell);
        assert!("hold".parse::<Side>().is_err());
        assert_eq!(Side::from_code(2), Some(Side::Sell));
    }
}
