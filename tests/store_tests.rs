/// Integration tests for position ordering, viewport scrolling and local PnL.
///
/// The crate is a binary, so the modules are pulled in with `#[path]`.
#[path = "../src/models.rs"]
mod models;

#[path = "../src/store.rs"]
mod store;

#[path = "../src/pnl.rs"]
mod pnl;

#[path = "../src/viewport.rs"]
mod viewport;

use models::{Position, PositionId, Side, SymbolId, SymbolInfo};
use pnl::{compute_pnl, running_total, PnlSource, QuoteBook};
use store::PositionStore;
use viewport::Viewport;

fn pos(id: PositionId, symbol: SymbolId, side: Side, entry: f64) -> Position {
    Position {
        position_id: id,
        symbol_id: symbol,
        side,
        volume_units: 100,
        entry_price: entry,
        open_timestamp: 1_700_000_000_000,
        used_margin: None,
    }
}

fn eurusd() -> SymbolInfo {
    SymbolInfo {
        symbol_id: 1,
        name: "EURUSD".into(),
        pips_position: 5,
        contract_size: 100_000.0,
    }
}

#[test]
fn ordering_is_pnl_descending_with_ascending_id_ties() {
    let mut store = PositionStore::new();
    store.replace_all((1..=5).map(|id| pos(id, 1, Side::Buy, 1.1)));
    store.set_pnl(1, -3.0);
    store.set_pnl(2, 7.5);
    store.set_pnl(3, 0.0);
    store.set_pnl(5, 7.5);

    // 4 has no PnL and sorts as zero, after 3.
    assert_eq!(store.ordered(), &[2, 5, 3, 4, 1]);
    for pair in store.ordered().to_vec().windows(2) {
        let (a, b) = (store.pnl(pair[0]).unwrap_or(0.0), store.pnl(pair[1]).unwrap_or(0.0));
        assert!(a >= b);
    }
}

#[test]
fn ordering_is_rebuilt_only_after_changes() {
    let mut store = PositionStore::new();
    store.replace_all([pos(1, 1, Side::Buy, 1.1), pos(2, 1, Side::Buy, 1.1)]);
    store.ordered();
    store.ordered();
    assert_eq!(store.ordering_rebuilds(), 1);

    assert!(store.set_pnl(1, 4.0));
    assert!(store.ordering_dirty());
    store.ordered();
    assert_eq!(store.ordering_rebuilds(), 2);

    // Same value again: nothing to do.
    assert!(!store.set_pnl(1, 4.0));
    store.ordered();
    assert_eq!(store.ordering_rebuilds(), 2);
}

#[test]
fn reconcile_then_broker_pnl_gives_expected_rows() {
    let mut store = PositionStore::new();
    let outcome = store.replace_all([pos(10, 1, Side::Buy, 1.1), pos(11, 2, Side::Sell, 1.3)]);
    assert_eq!(outcome.added, vec![10, 11]);
    assert!(outcome.removed.is_empty());

    store.set_pnl(10, -12.0);
    store.set_pnl(11, 40.0);
    assert_eq!(store.ordered(), &[11, 10]);

    let total = running_total(store.all().map(|p| store.pnl(p.position_id)));
    assert!((total - 28.0).abs() < 1e-9);

    // A later snapshot drops 11: its PnL goes with it.
    let outcome = store.replace_all([pos(10, 1, Side::Buy, 1.1)]);
    assert_eq!(outcome.removed, vec![11]);
    assert_eq!(store.pnl(11), None);
    assert_eq!(store.ordered(), &[10]);
}

#[test]
fn local_pnl_uses_exit_side_and_keeps_last_quote() {
    let mut quotes = QuoteBook::new();
    let sym = eurusd();
    let buy = pos(1, 1, Side::Buy, 1.1);
    let sell = pos(2, 1, Side::Sell, 1.1);

    quotes.apply_tick(1, Some(1.1010), Some(1.1012));
    let b = compute_pnl(&buy, Some(&sym), quotes.get(1), None).unwrap();
    let s = compute_pnl(&sell, Some(&sym), quotes.get(1), None).unwrap();
    assert_eq!(b.source, PnlSource::Local);
    assert!((b.value - 1.0 * 100_000.0 * 0.0010).abs() < 1e-6);
    assert!((s.value + 1.0 * 100_000.0 * 0.0012).abs() < 1e-6);

    // A bid-only tick keeps the previous ask.
    quotes.apply_tick(1, Some(1.1020), None);
    let q = quotes.get(1).unwrap();
    assert_eq!((q.bid, q.ask), (1.1020, 1.1012));

    // Broker PnL wins over the local estimate.
    let cached = compute_pnl(&buy, Some(&sym), quotes.get(1), Some(-3.0)).unwrap();
    assert_eq!((cached.value, cached.source), (-3.0, PnlSource::Broker));
}

#[test]
fn unknown_pnl_is_left_out_of_the_total() {
    let quotes = QuoteBook::new();
    let p = pos(1, 1, Side::Buy, 1.1);
    assert!(compute_pnl(&p, None, quotes.get(1), None).is_none());
    assert_eq!(running_total([None, Some(2.0), None, Some(-0.5)]), 1.5);
}

#[test]
fn selection_scrolls_and_wraps() {
    let mut vp = Viewport::default();
    let (n, budget) = (5, 2);

    vp.move_selection(1, n, budget);
    vp.move_selection(1, n, budget);
    assert_eq!((vp.selected, vp.offset), (2, 1));
    assert_eq!(vp.visible(n, budget), 1..3);

    vp.move_selection(-3, n, budget);
    assert_eq!((vp.selected, vp.offset), (4, 3));

    vp.move_selection(1, n, budget);
    assert_eq!((vp.selected, vp.offset), (0, 0));

    // Rows vanish under the cursor.
    vp.selected = 4;
    vp.offset = 3;
    vp.clamp(2, budget);
    assert_eq!((vp.selected, vp.offset), (1, 1));
}
