/// stop_loss.rs – Operator-set maximum-loss thresholds and their one-shot
/// trigger on broker PnL updates.
use std::collections::HashMap;

use tracing::info;

use crate::models::{NoticeLog, Position, PositionId};

/// Close order emitted when a stop-loss fires.
#[derive(Debug, Clone, PartialEq)]
pub struct StopLossHit {
    pub position_id: PositionId,
    pub volume_units: i64,
    pub net_pnl: f64,
    pub threshold: f64,
}

#[derive(Debug, Default)]
pub struct StopLossMonitor {
    /// position id → max loss magnitude (always positive).
    thresholds: HashMap<PositionId, f64>,
}

impl StopLossMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a stop at `value`; stored as a magnitude.
    pub fn set(&mut self, position_id: PositionId, value: f64) {
        self.thresholds.insert(position_id, value.abs());
    }

    pub fn clear(&mut self, position_id: PositionId) -> Option<f64> {
        self.thresholds.remove(&position_id)
    }

    pub fn get(&self, position_id: PositionId) -> Option<f64> {
        self.thresholds.get(&position_id).copied()
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Check one PnL update. On a hit the stop is cleared before the close is
    /// returned, so it can never fire twice for the same configuration.
    pub fn on_pnl(
        &mut self,
        position: Option<&Position>,
        position_id: PositionId,
        net_pnl: f64,
        notices: &mut NoticeLog,
    ) -> Option<StopLossHit> {
        let threshold = self.get(position_id)?;
        if net_pnl > -threshold {
            return None;
        }
        // Without the position we don't know the volume; keep the stop armed
        // until a reconcile brings it back or removes it.
        let position = position?;
        self.thresholds.remove(&position_id);

        let msg = format!("SL hit on {position_id}: closing at net {net_pnl:.2}");
        info!("{msg} (threshold {threshold:.2})");
        notices.push(msg);

        Some(StopLossHit {
            position_id,
            volume_units: position.volume_units,
            net_pnl,
            threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn position(id: PositionId) -> Position {
        Position {
            position_id: id,
            symbol_id: 1,
            side: Side::Sell,
            volume_units: 250,
            entry_price: 1.0,
            open_timestamp: 0,
            used_margin: None,
        }
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let mut sl = StopLossMonitor::new();
        let mut log = NoticeLog::new(6);
        let p = position(1);
        sl.set(1, 100.0);
        assert!(sl.on_pnl(Some(&p), 1, -99.99, &mut log).is_none());
        let hit = sl.on_pnl(Some(&p), 1, -100.0, &mut log).unwrap();
        assert_eq!(hit.volume_units, 250);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn no_stop_means_no_trigger() {
        let mut sl = StopLossMonitor::new();
        let mut log = NoticeLog::new(6);
        assert!(sl.on_pnl(Some(&position(3)), 3, -1e9, &mut log).is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn unknown_position_keeps_stop_armed() {
        let mut sl = StopLossMonitor::new();
        let mut log = NoticeLog::new(6);
        sl.set(5, -20.0);
        assert_eq!(sl.get(5), Some(20.0));
        assert!(sl.on_pnl(None, 5, -50.0, &mut log).is_none());
        assert_eq!(sl.get(5), Some(20.0));
    }

    #[test]
    fn rearming_allows_a_second_trigger() {
        let mut sl = StopLossMonitor::new();
        let mut log = NoticeLog::new(6);
        let p = position(1);
        sl.set(1, 10.0);
        assert!(sl.on_pnl(Some(&p), 1, -11.0, &mut log).is_some());
        assert!(sl.on_pnl(Some(&p), 1, -12.0, &mut log).is_none());
        sl.set(1, 10.0);
        assert!(sl.on_pnl(Some(&p), 1, -12.0, &mut log).is_some());
    }
}
