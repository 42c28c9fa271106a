/// pnl.rs – Latest quotes per symbol and unrealized PnL derivation.
///
/// Broker-reported PnL always wins. Without it, PnL is estimated locally from
/// the exit-side quote: a BUY is valued at the bid, a SELL at the ask. The
/// same convention is used for the "Market" column so the two never disagree.
use std::collections::HashMap;

use crate::models::{Position, PriceQuote, Side, SymbolId, SymbolInfo, DEFAULT_CONTRACT_SIZE};

// ---------------------------------------------------------------------------
// Quote book
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct QuoteBook {
    quotes: HashMap<SymbolId, PriceQuote>,
}

impl QuoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a tick. Absent or zero sides keep the last known non-zero value;
    /// a lone side fills the other when nothing was known. Returns the stored
    /// quote, or `None` if neither side has ever been seen.
    pub fn apply_tick(
        &mut self,
        symbol_id: SymbolId,
        bid: Option<f64>,
        ask: Option<f64>,
    ) -> Option<PriceQuote> {
        let prev = self.quotes.get(&symbol_id).copied();
        let bid = usable(bid).or(prev.map(|q| q.bid));
        let ask = usable(ask).or(prev.map(|q| q.ask));
        let quote = match (bid, ask) {
            (Some(bid), Some(ask)) => PriceQuote { bid, ask },
            (Some(bid), None) => PriceQuote { bid, ask: bid },
            (None, Some(ask)) => PriceQuote { bid: ask, ask },
            (None, None) => return None,
        };
        self.quotes.insert(symbol_id, quote);
        Some(quote)
    }

    pub fn get(&self, symbol_id: SymbolId) -> Option<&PriceQuote> {
        self.quotes.get(&symbol_id)
    }

    pub fn contains(&self, symbol_id: SymbolId) -> bool {
        self.quotes.contains_key(&symbol_id)
    }

    pub fn remove(&mut self, symbol_id: SymbolId) {
        self.quotes.remove(&symbol_id);
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &PriceQuote)> {
        self.quotes.iter().map(|(id, q)| (*id, q))
    }
}

fn usable(side: Option<f64>) -> Option<f64> {
    side.filter(|v| v.is_finite() && *v != 0.0)
}

// ---------------------------------------------------------------------------
// PnL
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PnlSource {
    Broker,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pnl {
    pub value: f64,
    pub source: PnlSource,
}

/// Price the position would be closed at.
pub fn exit_price(side: Side, quote: &PriceQuote) -> f64 {
    match side {
        Side::Buy => quote.bid,
        Side::Sell => quote.ask,
    }
}

/// `delta * lots * contract_size`, delta signed by side.
pub fn local_pnl(position: &Position, contract_size: f64, market: f64) -> f64 {
    let delta = match position.side {
        Side::Buy => market - position.entry_price,
        Side::Sell => position.entry_price - market,
    };
    delta * position.lots() * contract_size
}

/// Unrealized PnL for one position, or `None` when it cannot be known yet.
pub fn compute_pnl(
    position: &Position,
    symbol: Option<&SymbolInfo>,
    quote: Option<&PriceQuote>,
    cached: Option<f64>,
) -> Option<Pnl> {
    if let Some(value) = cached {
        return Some(Pnl {
            value,
            source: PnlSource::Broker,
        });
    }
    let quote = quote?;
    let contract_size = symbol
        .map(SymbolInfo::effective_contract_size)
        .unwrap_or(DEFAULT_CONTRACT_SIZE);
    Some(Pnl {
        value: local_pnl(position, contract_size, exit_price(position.side, quote)),
        source: PnlSource::Local,
    })
}

/// Sum of known values; unknown entries contribute nothing.
pub fn running_total<I>(values: I) -> f64
where
    I: IntoIterator<Item = Option<f64>>,
{
    values.into_iter().flatten().sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(side: Side, entry: f64, units: i64) -> Position {
        Position {
            position_id: 1,
            symbol_id: 7,
            side,
            volume_units: units,
            entry_price: entry,
            open_timestamp: 0,
            used_margin: None,
        }
    }

    #[test]
    fn zero_side_keeps_previous_value() {
        let mut book = QuoteBook::new();
        book.apply_tick(7, Some(1.2000), Some(1.2002));
        let q = book.apply_tick(7, Some(0.0), Some(1.2005)).unwrap();
        assert_eq!(q, PriceQuote { bid: 1.2000, ask: 1.2005 });
    }

    #[test]
    fn lone_side_fills_the_other() {
        let mut book = QuoteBook::new();
        let q = book.apply_tick(3, None, Some(2.5)).unwrap();
        assert_eq!(q, PriceQuote { bid: 2.5, ask: 2.5 });
        assert!(book.apply_tick(4, None, Some(0.0)).is_none());
        assert!(!book.contains(4));
    }

    #[test]
    fn broker_value_takes_precedence() {
        let p = position(Side::Buy, 1.0, 100);
        let q = PriceQuote { bid: 2.0, ask: 2.0 };
        let pnl = compute_pnl(&p, None, Some(&q), Some(-4.0)).unwrap();
        assert_eq!(pnl.value, -4.0);
        assert_eq!(pnl.source, PnlSource::Broker);
    }

    #[test]
    fn buy_valued_at_bid_sell_at_ask() {
        let sym = SymbolInfo {
            symbol_id: 7,
            name: "EURUSD".into(),
            pips_position: 5,
            contract_size: 100_000.0,
        };
        let q = PriceQuote { bid: 1.1010, ask: 1.1012 };
        let buy = compute_pnl(&position(Side::Buy, 1.1000, 100), Some(&sym), Some(&q), None).unwrap();
        assert!((buy.value - 100.0).abs() < 1e-6);
        let sell = compute_pnl(&position(Side::Sell, 1.1000, 50), Some(&sym), Some(&q), None).unwrap();
        assert!((sell.value + 60.0).abs() < 1e-6);
        assert_eq!(sell.source, PnlSource::Local);
    }

    #[test]
    fn unknown_without_quote() {
        assert!(compute_pnl(&position(Side::Buy, 1.0, 100), None, None, None).is_none());
        assert_eq!(running_total([Some(2.0), None, Some(-0.5)]), 1.5);
    }
}
