/// broker.rs – Broker command/event types and the websocket transport task.
///
/// The transport owns the connection: it forwards outbound commands, answers
/// pings, keeps the session alive with heartbeats and reconnects after a fixed
/// delay. Decoded events are posted to the main loop; nothing here touches
/// client state.
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::BrokerConfig;
use crate::event_loop::{LoopHandle, LoopTask};
use crate::models::{
    AccountId, AccountMeta, CatalogKind, DealId, ExecutionKind, OrderId, OrderType, PendingOrder,
    PnlReport, Position, PositionId, Side, SymbolId, SymbolInfo, TraderInfo, TrendbarPeriod,
};

// ---------------------------------------------------------------------------
// Commands / events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerCommand {
    ApplicationAuth {
        client_id: String,
        client_secret: String,
    },
    AccountListByToken {
        access_token: String,
    },
    AccountAuth {
        account_id: AccountId,
        access_token: String,
    },
    AccountLogout {
        account_id: AccountId,
    },
    Version,
    Trader {
        account_id: AccountId,
    },
    SymbolsList {
        account_id: AccountId,
    },
    SubscribeSpots {
        account_id: AccountId,
        symbol_ids: Vec<SymbolId>,
    },
    UnsubscribeSpots {
        account_id: AccountId,
        symbol_ids: Vec<SymbolId>,
    },
    Reconcile {
        account_id: AccountId,
    },
    UnrealizedPnl {
        account_id: AccountId,
    },
    TickData {
        account_id: AccountId,
        symbol_id: SymbolId,
        from_ms: i64,
        to_ms: i64,
    },
    NewOrder {
        account_id: AccountId,
        symbol_id: SymbolId,
        side: Side,
        volume_units: i64,
        order_type: OrderType,
    },
    ClosePosition {
        account_id: AccountId,
        position_id: PositionId,
        volume_units: i64,
    },
    CancelOrder {
        account_id: AccountId,
        order_id: OrderId,
    },
    OrderDetails {
        account_id: AccountId,
        order_id: OrderId,
    },
    AssetList {
        account_id: AccountId,
    },
    AssetClassList {
        account_id: AccountId,
    },
    SymbolCategoryList {
        account_id: AccountId,
    },
    Trendbars {
        account_id: AccountId,
        symbol_id: SymbolId,
        period: TrendbarPeriod,
        from_ms: i64,
        to_ms: i64,
    },
    DealOffsetList {
        account_id: AccountId,
        deal_id: DealId,
    },
    OrdersByPosition {
        account_id: AccountId,
        position_id: PositionId,
        from_ms: i64,
        to_ms: i64,
    },
    Heartbeat,
}

/// Raw tick from a tick-data response; prices are unscaled wire integers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawTick {
    pub timestamp: i64,
    pub bid: Option<u64>,
    pub ask: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    AppAuthorized,
    AccountList(Vec<AccountMeta>),
    AccountAuthorized(AccountId),
    SpotSubscribed,
    SpotUnsubscribed,
    /// Unscaled wire prices; zero or missing sides are `None`.
    SpotTick {
        symbol_id: SymbolId,
        bid: Option<u64>,
        ask: Option<u64>,
    },
    TickData {
        symbol_id: Option<SymbolId>,
        ticks: Vec<RawTick>,
    },
    Symbols(Vec<SymbolInfo>),
    Reconcile {
        account_id: AccountId,
        positions: Vec<Position>,
        orders: Vec<PendingOrder>,
    },
    /// Already scaled by the response's money digits.
    UnrealizedPnl(Vec<PnlReport>),
    Execution {
        kind: ExecutionKind,
        position: Option<Position>,
        position_id: Option<PositionId>,
        order_id: Option<OrderId>,
    },
    Trader(TraderInfo),
    OrderDetails {
        order_id: OrderId,
        status: i64,
    },
    /// Listing answered for the operator; entries are display lines.
    Catalog {
        kind: CatalogKind,
        entries: Vec<String>,
    },
    Version(String),
    LoggedOut,
    Error {
        code: String,
        description: String,
    },
    Heartbeat,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Outbound {
    Command(BrokerCommand),
    Stop,
}

/// Sender side of the transport. Commands queued while disconnected are
/// dropped on reconnect; the session is re-established from scratch.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl BrokerHandle {
    pub fn send(&self, cmd: BrokerCommand) {
        debug!("→ {cmd:?}");
        if self.tx.send(Outbound::Command(cmd)).is_err() {
            warn!("broker transport gone; command dropped");
        }
    }

    /// Close the connection and stop reconnecting.
    pub fn stop(&self) -> Result<()> {
        self.tx
            .send(Outbound::Stop)
            .map_err(|_| anyhow::anyhow!("broker transport already stopped"))
    }

    #[cfg(test)]
    pub fn test_pair() -> (Self, SentCommands) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, SentCommands { rx })
    }
}

/// Test-side view of everything sent through a [`BrokerHandle`].
#[cfg(test)]
pub struct SentCommands {
    rx: mpsc::UnboundedReceiver<Outbound>,
}

#[cfg(test)]
impl SentCommands {
    /// Commands sent since the last call, in order.
    pub fn drain(&mut self) -> Vec<BrokerCommand> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            if let Outbound::Command(cmd) = msg {
                out.push(cmd);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

enum SessionEnd {
    Stopped,
    Closed,
}

/// Start the transport task. It connects immediately and keeps reconnecting
/// until [`BrokerHandle::stop`] is called.
pub fn spawn(
    cfg: &BrokerConfig,
    loop_handle: LoopHandle,
) -> (BrokerHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let url = cfg.endpoint().to_string();
    let reconnect = Duration::from_secs_f64(cfg.reconnect_delay_secs);
    let heartbeat = Duration::from_secs_f64(cfg.heartbeat_secs);

    let task = tokio::spawn(async move {
        loop {
            if drain_stale(&mut rx) {
                break;
            }
            let reason = match ws_run(&url, heartbeat, &mut rx, &loop_handle).await {
                Ok(SessionEnd::Stopped) => {
                    info!("Broker transport stopped");
                    break;
                }
                Ok(SessionEnd::Closed) => "connection closed by server".to_string(),
                Err(e) => format!("{e:#}"),
            };
            warn!("Broker disconnected: {reason} – reconnecting in {reconnect:?}");
            if !loop_handle.send(LoopTask::Disconnected(reason)) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(reconnect) => {}
                _ = wait_for_stop(&mut rx) => break,
            }
        }
    });

    (BrokerHandle { tx }, task)
}

/// Discard commands queued for a dead session. Returns true if a stop was
/// among them.
fn drain_stale(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> bool {
    let mut dropped = 0usize;
    while let Ok(out) = rx.try_recv() {
        match out {
            Outbound::Stop => return true,
            Outbound::Command(_) => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!("Dropped {dropped} command(s) queued while disconnected");
    }
    false
}

/// Resolves on stop or when every handle is gone.
async fn wait_for_stop(rx: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match rx.recv().await {
            None | Some(Outbound::Stop) => return,
            Some(Outbound::Command(cmd)) => debug!("Not connected, dropping {cmd:?}"),
        }
    }
}

async fn ws_run(
    url: &str,
    heartbeat: Duration,
    rx: &mut mpsc::UnboundedReceiver<Outbound>,
    loop_handle: &LoopHandle,
) -> Result<SessionEnd> {
    info!("Connecting to broker: {url}");
    let (ws, _) = connect_async(url).await.context("WebSocket connect")?;
    let (mut sink, mut stream) = ws.split();
    loop_handle.send(LoopTask::Connected);

    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;

    loop {
        tokio::select! {
            out = rx.recv() => match out {
                Some(Outbound::Command(cmd)) => {
                    let text = codec::encode(&cmd)?;
                    sink.send(Message::Text(text)).await.context("WebSocket send")?;
                }
                Some(Outbound::Stop) | None => {
                    sink.send(Message::Close(None)).await.ok();
                    return Ok(SessionEnd::Stopped);
                }
            },
            msg = stream.next() => {
                let Some(msg) = msg else {
                    return Ok(SessionEnd::Closed);
                };
                match msg.context("WebSocket read error")? {
                    Message::Text(text) => {
                        if let Some(event) = codec::decode(&text) {
                            loop_handle.send(LoopTask::Broker(event));
                        }
                    }
                    Message::Ping(data) => {
                        sink.send(Message::Pong(data)).await.ok();
                    }
                    Message::Close(_) => return Ok(SessionEnd::Closed),
                    _ => {}
                }
            }
            _ = ticker.tick() => {
                let text = codec::encode(&BrokerCommand::Heartbeat)?;
                sink.send(Message::Text(text)).await.context("heartbeat")?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_discards_commands_and_spots_stop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Outbound::Command(BrokerCommand::Version)).unwrap();
        tx.send(Outbound::Command(BrokerCommand::Heartbeat)).unwrap();
        assert!(!drain_stale(&mut rx));
        assert!(rx.try_recv().is_err());

        tx.send(Outbound::Command(BrokerCommand::Version)).unwrap();
        tx.send(Outbound::Stop).unwrap();
        assert!(drain_stale(&mut rx));
    }

    #[tokio::test]
    async fn wait_for_stop_ends_when_handles_drop() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        tx.send(Outbound::Command(BrokerCommand::Version)).unwrap();
        drop(tx);
        wait_for_stop(&mut rx).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stop_fails_once_transport_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = BrokerHandle { tx };
        drop(rx);
        assert!(handle.stop().is_err());
    }
}
