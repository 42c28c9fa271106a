/// Integration tests for the stop-loss key flow and its one-shot trigger.
#[path = "../src/models.rs"]
mod models;

#[path = "../src/keys.rs"]
mod keys;

#[path = "../src/stop_loss.rs"]
mod stop_loss;

use keys::{InputMode, Key, KeyAction, KeyInput};
use models::{NoticeLog, Position, Side};
use stop_loss::StopLossMonitor;

fn position(id: i64) -> Position {
    Position {
        position_id: id,
        symbol_id: 1,
        side: Side::Buy,
        volume_units: 100,
        entry_price: 1.1,
        open_timestamp: 1_700_000_000_000,
        used_margin: None,
    }
}

/// Feed raw bytes the way a terminal would deliver them.
fn type_bytes(input: &mut KeyInput, bytes: &[u8], selected: Option<i64>) -> Vec<KeyAction> {
    bytes
        .iter()
        .filter_map(|b| Key::from_byte(*b))
        .filter_map(|k| input.handle(k, selected).action)
        .collect()
}

#[test]
fn typed_stop_loss_is_saved_for_selected_row() {
    let mut input = KeyInput::new();
    let actions = type_bytes(&mut input, b"y53\r", Some(7));
    assert_eq!(
        actions,
        vec![KeyAction::SetStopLoss {
            position_id: 7,
            value: 53.0
        }]
    );
    assert_eq!(input.mode(), &InputMode::Idle);
}

#[test]
fn escape_abandons_the_prompt() {
    let mut input = KeyInput::new();
    let actions = type_bytes(&mut input, b"y12\x1b", Some(7));
    assert!(actions.is_empty());
    assert_eq!(input.mode(), &InputMode::Idle);
    assert!(input.prompt("EUR").is_none());
}

#[test]
fn prompt_shows_currency_and_buffer() {
    let mut input = KeyInput::new();
    type_bytes(&mut input, b"y4", Some(3));
    let prompt = input.prompt("EUR").unwrap();
    assert!(prompt.contains("EUR"));
    assert!(prompt.contains("4_"));
}

#[test]
fn stop_loss_fires_once_per_arming() {
    let mut input = KeyInput::new();
    let mut stops = StopLossMonitor::new();
    let mut notices = NoticeLog::new(6);
    let p = position(7);

    for action in type_bytes(&mut input, b"y53\n", Some(7)) {
        if let KeyAction::SetStopLoss { position_id, value } = action {
            stops.set(position_id, value);
        }
    }

    let closes: Vec<_> = [-50.0, -150.0, -200.0]
        .into_iter()
        .filter_map(|net| stops.on_pnl(Some(&p), 7, net, &mut notices))
        .collect();
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].net_pnl, -150.0);
    assert_eq!(closes[0].volume_units, 100);
    assert_eq!(stops.get(7), None);
    assert_eq!(notices.len(), 1);
}

#[test]
fn keys_without_a_selection_do_nothing() {
    let mut input = KeyInput::new();
    assert!(type_bytes(&mut input, b"yx\r", None).is_empty());
    assert_eq!(input.mode(), &InputMode::Idle);
    assert_eq!(
        type_bytes(&mut input, b"q", None),
        vec![KeyAction::Exit]
    );
}
