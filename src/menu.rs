/// menu.rs – Line-oriented operator commands and the blocking prompt reader.
use std::io::{BufRead, Write};
use std::sync::mpsc;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use crate::event_loop::{LoopHandle, LoopTask};
use crate::models::{
    AccountId, DealId, OrderId, OrderType, PositionId, Side, SymbolId, TrendbarPeriod,
};

pub const USAGE: &str = "\
Commands:
  accounts                               list accounts
  account <id>                           switch / authorize account
  positions                              reconcile and list positions
  prices                                 latest quotes
  subscribe <symbolId>                   subscribe to spot prices
  assets                                 list assets
  classes                                list asset classes
  categories                             list symbol categories
  trendbars <symbolId> <period> [weeks]  candles, period M1..MN1 (default 1 week)
  ticks <symbolId> [days]                bid tick history (default 1 day)
  market <symbolId> <buy|sell> <lots>    market order
  limit <symbolId> <side> <lots> <price> limit order
  stop <symbolId> <side> <lots> <price>  stop order
  close <positionId> <lots>              close (part of) a position
  cancel <orderId>                       cancel a pending order
  order <orderId>                        order details
  deals <dealId>                         offsets of a deal
  position-orders <positionId> [from] [to]  orders of a position (epoch ms)
  pnl                                    unrealized PnL per position
  live                                   live PnL dashboard
  refresh                                reconcile and refresh PnL
  trader                                 balance of the current account
  version                                broker API version
  help                                   this text
  quit                                   exit";

#[derive(Debug, Clone, PartialEq)]
pub enum MenuCommand {
    Accounts,
    Account(AccountId),
    Positions,
    Prices,
    Subscribe(SymbolId),
    Assets,
    AssetClasses,
    SymbolCategories,
    Trendbars {
        symbol_id: SymbolId,
        period: TrendbarPeriod,
        weeks: i64,
    },
    Ticks {
        symbol_id: SymbolId,
        days: i64,
    },
    Order {
        symbol_id: SymbolId,
        side: Side,
        lots: f64,
        order_type: OrderType,
    },
    Close {
        position_id: PositionId,
        lots: f64,
    },
    Cancel(OrderId),
    OrderDetails(OrderId),
    DealOffsets(DealId),
    PositionOrders {
        position_id: PositionId,
        from_ms: Option<i64>,
        to_ms: Option<i64>,
    },
    Pnl,
    Live,
    Refresh,
    Trader,
    Version,
    Help,
    Quit,
    Empty,
}

pub fn parse(line: &str) -> Result<MenuCommand> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((head, args)) = words.split_first() else {
        return Ok(MenuCommand::Empty);
    };
    let verb = head.to_lowercase();
    let cmd = match (verb.as_str(), args) {
        ("accounts", []) => MenuCommand::Accounts,
        ("account", [id]) => MenuCommand::Account(int(id, "account id")?),
        ("positions", []) => MenuCommand::Positions,
        ("prices", []) => MenuCommand::Prices,
        ("subscribe", [sid]) => MenuCommand::Subscribe(int(sid, "symbol id")?),
        ("assets", []) => MenuCommand::Assets,
        ("classes", []) => MenuCommand::AssetClasses,
        ("categories", []) => MenuCommand::SymbolCategories,
        ("trendbars", [sid, period, rest @ ..]) if rest.len() <= 1 => MenuCommand::Trendbars {
            symbol_id: int(sid, "symbol id")?,
            period: period.parse()?,
            weeks: optional_count(rest.first(), "weeks")?,
        },
        ("ticks", [sid, rest @ ..]) if rest.len() <= 1 => MenuCommand::Ticks {
            symbol_id: int(sid, "symbol id")?,
            days: optional_count(rest.first(), "days")?,
        },
        ("market", [sid, side, lots]) => MenuCommand::Order {
            symbol_id: int(sid, "symbol id")?,
            side: side.parse()?,
            lots: lots_arg(lots)?,
            order_type: OrderType::Market,
        },
        ("limit" | "stop", [sid, side, lots, price]) => {
            let price = price_arg(price)?;
            MenuCommand::Order {
                symbol_id: int(sid, "symbol id")?,
                side: side.parse()?,
                lots: lots_arg(lots)?,
                order_type: if verb == "stop" {
                    OrderType::Stop(price)
                } else {
                    OrderType::Limit(price)
                },
            }
        }
        ("close", [pid, lots]) => MenuCommand::Close {
            position_id: int(pid, "position id")?,
            lots: lots_arg(lots)?,
        },
        ("cancel", [oid]) => MenuCommand::Cancel(int(oid, "order id")?),
        ("order", [oid]) => MenuCommand::OrderDetails(int(oid, "order id")?),
        ("deals", [did]) => MenuCommand::DealOffsets(int(did, "deal id")?),
        ("position-orders", [pid, range @ ..]) if range.len() <= 2 => {
            let bound = |i: usize| range.get(i).map(|raw| int(raw, "timestamp")).transpose();
            MenuCommand::PositionOrders {
                position_id: int(pid, "position id")?,
                from_ms: bound(0)?,
                to_ms: bound(1)?,
            }
        }
        ("pnl", []) => MenuCommand::Pnl,
        ("live", []) => MenuCommand::Live,
        ("refresh", []) => MenuCommand::Refresh,
        ("trader", []) => MenuCommand::Trader,
        ("version", []) => MenuCommand::Version,
        ("help" | "?", []) => MenuCommand::Help,
        ("quit" | "exit", []) => MenuCommand::Quit,
        (other, _) => bail!("unknown command or wrong arguments: {other}"),
    };
    Ok(cmd)
}

fn int(raw: &str, what: &str) -> Result<i64> {
    raw.parse()
        .with_context(|| format!("{what} must be an integer, got {raw:?}"))
}

/// Positive look-back count; 1 when omitted.
fn optional_count(raw: Option<&&str>, what: &str) -> Result<i64> {
    let Some(raw) = raw else {
        return Ok(1);
    };
    let n = int(raw, what)?;
    if n <= 0 {
        bail!("{what} must be > 0");
    }
    Ok(n)
}

fn lots_arg(raw: &str) -> Result<f64> {
    let lots: f64 = raw
        .parse()
        .with_context(|| format!("lots must be a number, got {raw:?}"))?;
    if !lots.is_finite() || lots <= 0.0 {
        bail!("lots must be > 0");
    }
    Ok(lots)
}

fn price_arg(raw: &str) -> Result<f64> {
    let price: f64 = raw
        .parse()
        .with_context(|| format!("price must be a number, got {raw:?}"))?;
    if !price.is_finite() || price <= 0.0 {
        bail!("price must be > 0");
    }
    Ok(price)
}

/// Lots → wire volume units (1 lot = 100 units), rounded.
pub fn lots_to_units(lots: f64) -> i64 {
    (lots * crate::models::UNITS_PER_LOT).round() as i64
}

// ---------------------------------------------------------------------------
// Prompt reader
// ---------------------------------------------------------------------------

/// Reads one stdin line per request on a detached thread, so a pending read
/// never holds up process exit. The loop only asks while the dashboard does
/// not own the terminal.
pub struct MenuReader {
    requests: mpsc::Sender<()>,
    waiting: bool,
}

impl MenuReader {
    pub fn spawn(loop_handle: LoopHandle) -> Result<Self> {
        let (requests, rx) = mpsc::channel::<()>();
        std::thread::Builder::new()
            .name("menu-reader".into())
            .spawn(move || read_lines(&rx, &loop_handle))
            .context("spawning menu reader")?;
        Ok(Self {
            requests,
            waiting: false,
        })
    }

    /// Ask for the next line unless a prompt is already outstanding.
    pub fn prompt(&mut self) {
        if self.waiting {
            return;
        }
        if self.requests.send(()).is_err() {
            warn!("menu reader has exited");
            return;
        }
        self.waiting = true;
    }

    /// A line arrived; the next `prompt` may ask again.
    pub fn answered(&mut self) {
        self.waiting = false;
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }
}

fn read_lines(requests: &mpsc::Receiver<()>, loop_handle: &LoopHandle) {
    let stdin = std::io::stdin();
    while requests.recv().is_ok() {
        print!("> ");
        std::io::stdout().flush().ok();
        let mut line = String::new();
        let task = match stdin.lock().read_line(&mut line) {
            Ok(0) => LoopTask::Shutdown("stdin closed"),
            Ok(_) => LoopTask::Menu(line),
            Err(e) => {
                warn!("stdin read failed: {e}");
                LoopTask::Menu(String::new())
            }
        };
        let stop = matches!(task, LoopTask::Shutdown(_));
        if !loop_handle.send(task) || stop {
            break;
        }
    }
    debug!("menu reader exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_orders() {
        assert_eq!(
            parse("market 1 buy 0.5").unwrap(),
            MenuCommand::Order {
                symbol_id: 1,
                side: Side::Buy,
                lots: 0.5,
                order_type: OrderType::Market
            }
        );
        assert_eq!(
            parse("stop 2 SELL 1 1.095").unwrap(),
            MenuCommand::Order {
                symbol_id: 2,
                side: Side::Sell,
                lots: 1.0,
                order_type: OrderType::Stop(1.095)
            }
        );
        assert!(matches!(
            parse("limit 2 s 1 1.1").unwrap(),
            MenuCommand::Order {
                order_type: OrderType::Limit(_),
                ..
            }
        ));
    }

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse("  LIVE ").unwrap(), MenuCommand::Live);
        assert_eq!(parse("").unwrap(), MenuCommand::Empty);
        assert_eq!(parse("account 42").unwrap(), MenuCommand::Account(42));
        assert_eq!(
            parse("close 7 0.25").unwrap(),
            MenuCommand::Close {
                position_id: 7,
                lots: 0.25
            }
        );
    }

    #[test]
    fn parses_history_and_reference_commands() {
        assert_eq!(parse("classes").unwrap(), MenuCommand::AssetClasses);
        assert_eq!(
            parse("trendbars 3 h4").unwrap(),
            MenuCommand::Trendbars {
                symbol_id: 3,
                period: TrendbarPeriod::H4,
                weeks: 1
            }
        );
        assert_eq!(
            parse("ticks 3 2").unwrap(),
            MenuCommand::Ticks {
                symbol_id: 3,
                days: 2
            }
        );
        assert_eq!(
            parse("position-orders 8 1000").unwrap(),
            MenuCommand::PositionOrders {
                position_id: 8,
                from_ms: Some(1000),
                to_ms: None
            }
        );
        assert!(parse("trendbars 3 M7").is_err());
        assert!(parse("ticks 3 0").is_err());
        assert!(parse("deals").is_err());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse("market 1 hold 1").is_err());
        assert!(parse("market 1 buy -1").is_err());
        assert!(parse("close x 1").is_err());
        assert!(parse("limit 1 buy 1").is_err());
        assert!(parse("frobnicate").is_err());
    }

    #[test]
    fn lots_round_to_units() {
        assert_eq!(lots_to_units(0.016), 2);
        assert_eq!(lots_to_units(1.0), 100);
        assert_eq!(lots_to_units(2.5), 250);
    }
}
