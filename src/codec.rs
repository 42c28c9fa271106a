/// codec.rs – JSON envelope encoding/decoding for the broker's Open API.
///
/// Every message is `{"clientMsgId", "payloadType", "payload"}`. Outbound
/// commands map to request payload types; inbound payload types map to
/// [`BrokerEvent`] variants through one explicit table in [`decode`].
use anyhow::{bail, Context, Result};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker::{BrokerCommand, BrokerEvent, RawTick};
use crate::models::{
    AccountMeta, CatalogKind, ExecutionKind, OrderType, PendingOrder, PnlReport, Position, Side,
    SymbolInfo, TraderInfo, DEFAULT_PIPS_POSITION,
};

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

pub mod payload {
    pub const ERROR_COMMON: u32 = 50;
    pub const HEARTBEAT: u32 = 51;
    pub const APP_AUTH_REQ: u32 = 2100;
    pub const APP_AUTH_RES: u32 = 2101;
    pub const ACCOUNT_AUTH_REQ: u32 = 2102;
    pub const ACCOUNT_AUTH_RES: u32 = 2103;
    pub const VERSION_REQ: u32 = 2104;
    pub const VERSION_RES: u32 = 2105;
    pub const NEW_ORDER_REQ: u32 = 2106;
    pub const CANCEL_ORDER_REQ: u32 = 2108;
    pub const CLOSE_POSITION_REQ: u32 = 2111;
    pub const ASSET_LIST_REQ: u32 = 2112;
    pub const ASSET_LIST_RES: u32 = 2113;
    pub const SYMBOLS_LIST_REQ: u32 = 2114;
    pub const SYMBOLS_LIST_RES: u32 = 2115;
    pub const TRADER_REQ: u32 = 2121;
    pub const TRADER_RES: u32 = 2122;
    pub const RECONCILE_REQ: u32 = 2124;
    pub const RECONCILE_RES: u32 = 2125;
    pub const EXECUTION_EVENT: u32 = 2126;
    pub const SUBSCRIBE_SPOTS_REQ: u32 = 2127;
    pub const SUBSCRIBE_SPOTS_RES: u32 = 2128;
    pub const UNSUBSCRIBE_SPOTS_REQ: u32 = 2129;
    pub const UNSUBSCRIBE_SPOTS_RES: u32 = 2130;
    pub const SPOT_EVENT: u32 = 2131;
    pub const TRENDBARS_REQ: u32 = 2137;
    pub const TRENDBARS_RES: u32 = 2138;
    pub const ERROR_RES: u32 = 2142;
    pub const TICK_DATA_REQ: u32 = 2145;
    pub const TICK_DATA_RES: u32 = 2146;
    pub const ACCOUNTS_BY_TOKEN_REQ: u32 = 2149;
    pub const ACCOUNTS_BY_TOKEN_RES: u32 = 2150;
    pub const ASSET_CLASS_LIST_REQ: u32 = 2153;
    pub const ASSET_CLASS_LIST_RES: u32 = 2154;
    pub const SYMBOL_CATEGORY_REQ: u32 = 2160;
    pub const SYMBOL_CATEGORY_RES: u32 = 2161;
    pub const ACCOUNT_LOGOUT_REQ: u32 = 2162;
    pub const ACCOUNT_LOGOUT_RES: u32 = 2163;
    pub const ORDER_DETAILS_REQ: u32 = 2181;
    pub const ORDER_DETAILS_RES: u32 = 2182;
    pub const ORDERS_BY_POSITION_REQ: u32 = 2183;
    pub const ORDERS_BY_POSITION_RES: u32 = 2184;
    pub const DEAL_OFFSET_LIST_REQ: u32 = 2185;
    pub const DEAL_OFFSET_LIST_RES: u32 = 2186;
    pub const UNREALIZED_PNL_REQ: u32 = 2187;
    pub const UNREALIZED_PNL_RES: u32 = 2188;
}

const EXECUTION_ORDER_FILLED: i64 = 3;
const EXECUTION_ORDER_CANCELLED: i64 = 5;
const EXECUTION_ORDER_PARTIAL_FILL: i64 = 11;
const POSITION_STATUS_CLOSED: i64 = 2;
const QUOTE_TYPE_BID: i64 = 1;
const DEFAULT_MONEY_DIGITS: i64 = 2;

/// Tick-data responses don't carry the symbol; it rides in the message id.
const TICK_MSG_PREFIX: &str = "tick-";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutEnvelope {
    client_msg_id: String,
    payload_type: u32,
    payload: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InEnvelope {
    #[serde(default)]
    client_msg_id: Option<String>,
    payload_type: u32,
    #[serde(default)]
    payload: Value,
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

pub fn encode(cmd: &BrokerCommand) -> Result<String> {
    let (payload_type, payload) = request(cmd);
    let client_msg_id = match cmd {
        BrokerCommand::TickData { symbol_id, .. } => {
            format!("{TICK_MSG_PREFIX}{symbol_id}-{}", Uuid::new_v4().simple())
        }
        _ => Uuid::new_v4().simple().to_string(),
    };
    let envelope = OutEnvelope {
        client_msg_id,
        payload_type,
        payload,
    };
    serde_json::to_string(&envelope).context("encoding broker command")
}

fn request(cmd: &BrokerCommand) -> (u32, Value) {
    use BrokerCommand::*;
    match cmd {
        ApplicationAuth {
            client_id,
            client_secret,
        } => (
            payload::APP_AUTH_REQ,
            json!({ "clientId": client_id, "clientSecret": client_secret }),
        ),
        AccountListByToken { access_token } => (
            payload::ACCOUNTS_BY_TOKEN_REQ,
            json!({ "accessToken": access_token }),
        ),
        AccountAuth {
            account_id,
            access_token,
        } => (
            payload::ACCOUNT_AUTH_REQ,
            json!({ "ctidTraderAccountId": account_id, "accessToken": access_token }),
        ),
        AccountLogout { account_id } => (
            payload::ACCOUNT_LOGOUT_REQ,
            json!({ "ctidTraderAccountId": account_id }),
        ),
        Version => (payload::VERSION_REQ, json!({})),
        Trader { account_id } => (
            payload::TRADER_REQ,
            json!({ "ctidTraderAccountId": account_id }),
        ),
        SymbolsList { account_id } => (
            payload::SYMBOLS_LIST_REQ,
            json!({ "ctidTraderAccountId": account_id, "includeArchivedSymbols": false }),
        ),
        SubscribeSpots {
            account_id,
            symbol_ids,
        } => (
            payload::SUBSCRIBE_SPOTS_REQ,
            json!({ "ctidTraderAccountId": account_id, "symbolId": symbol_ids }),
        ),
        UnsubscribeSpots {
            account_id,
            symbol_ids,
        } => (
            payload::UNSUBSCRIBE_SPOTS_REQ,
            json!({ "ctidTraderAccountId": account_id, "symbolId": symbol_ids }),
        ),
        Reconcile { account_id } => (
            payload::RECONCILE_REQ,
            json!({ "ctidTraderAccountId": account_id }),
        ),
        UnrealizedPnl { account_id } => (
            payload::UNREALIZED_PNL_REQ,
            json!({ "ctidTraderAccountId": account_id }),
        ),
        TickData {
            account_id,
            symbol_id,
            from_ms,
            to_ms,
        } => (
            payload::TICK_DATA_REQ,
            json!({
                "ctidTraderAccountId": account_id,
                "symbolId": symbol_id,
                "type": QUOTE_TYPE_BID,
                "fromTimestamp": from_ms,
                "toTimestamp": to_ms,
            }),
        ),
        NewOrder {
            account_id,
            symbol_id,
            side,
            volume_units,
            order_type,
        } => {
            let mut body = json!({
                "ctidTraderAccountId": account_id,
                "symbolId": symbol_id,
                "tradeSide": side.code(),
                "volume": volume_units,
            });
            let (code, price_field) = match order_type {
                OrderType::Market => (1, None),
                OrderType::Limit(price) => (2, Some(("limitPrice", *price))),
                OrderType::Stop(price) => (3, Some(("stopPrice", *price))),
            };
            body["orderType"] = json!(code);
            if let Some((field, price)) = price_field {
                body[field] = json!(price);
            }
            (payload::NEW_ORDER_REQ, body)
        }
        ClosePosition {
            account_id,
            position_id,
            volume_units,
        } => (
            payload::CLOSE_POSITION_REQ,
            json!({
                "ctidTraderAccountId": account_id,
                "positionId": position_id,
                "volume": volume_units,
            }),
        ),
        CancelOrder {
            account_id,
            order_id,
        } => (
            payload::CANCEL_ORDER_REQ,
            json!({ "ctidTraderAccountId": account_id, "orderId": order_id }),
        ),
        OrderDetails {
            account_id,
            order_id,
        } => (
            payload::ORDER_DETAILS_REQ,
            json!({ "ctidTraderAccountId": account_id, "orderId": order_id }),
        ),
        AssetList { account_id } => (
            payload::ASSET_LIST_REQ,
            json!({ "ctidTraderAccountId": account_id }),
        ),
        AssetClassList { account_id } => (
            payload::ASSET_CLASS_LIST_REQ,
            json!({ "ctidTraderAccountId": account_id }),
        ),
        SymbolCategoryList { account_id } => (
            payload::SYMBOL_CATEGORY_REQ,
            json!({ "ctidTraderAccountId": account_id }),
        ),
        Trendbars {
            account_id,
            symbol_id,
            period,
            from_ms,
            to_ms,
        } => (
            payload::TRENDBARS_REQ,
            json!({
                "ctidTraderAccountId": account_id,
                "symbolId": symbol_id,
                "period": period.code(),
                "fromTimestamp": from_ms,
                "toTimestamp": to_ms,
            }),
        ),
        DealOffsetList {
            account_id,
            deal_id,
        } => (
            payload::DEAL_OFFSET_LIST_REQ,
            json!({ "ctidTraderAccountId": account_id, "dealId": deal_id }),
        ),
        OrdersByPosition {
            account_id,
            position_id,
            from_ms,
            to_ms,
        } => (
            payload::ORDERS_BY_POSITION_REQ,
            json!({
                "ctidTraderAccountId": account_id,
                "positionId": position_id,
                "fromTimestamp": from_ms,
                "toTimestamp": to_ms,
            }),
        ),
        Heartbeat => (payload::HEARTBEAT, json!({})),
    }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode one inbound text frame. Unknown payload types and malformed
/// messages yield `None` and are logged.
pub fn decode(text: &str) -> Option<BrokerEvent> {
    match try_decode(text) {
        Ok(event) => event,
        Err(e) => {
            warn!("Failed to decode broker message: {e:#}");
            None
        }
    }
}

pub fn try_decode(text: &str) -> Result<Option<BrokerEvent>> {
    let env: InEnvelope = serde_json::from_str(text).context("envelope")?;
    let p = &env.payload;

    let event = match env.payload_type {
        payload::HEARTBEAT => BrokerEvent::Heartbeat,
        payload::APP_AUTH_RES => BrokerEvent::AppAuthorized,
        payload::ACCOUNT_AUTH_RES => BrokerEvent::AccountAuthorized(req_i64(p, "ctidTraderAccountId")?),
        payload::VERSION_RES => BrokerEvent::Version(str_or(p, "version", "?")),
        payload::ACCOUNTS_BY_TOKEN_RES => {
            BrokerEvent::AccountList(rows(array(p, "ctidTraderAccount"), "account", parse_account))
        }
        payload::SYMBOLS_LIST_RES => {
            BrokerEvent::Symbols(rows(array(p, "symbol"), "symbol", parse_symbol))
        }
        payload::TRADER_RES => BrokerEvent::Trader(parse_trader(p)?),
        payload::RECONCILE_RES => BrokerEvent::Reconcile {
            account_id: req_i64(p, "ctidTraderAccountId")?,
            positions: rows(array(p, "position"), "position", parse_position),
            orders: rows(array(p, "order"), "order", parse_order),
        },
        payload::SUBSCRIBE_SPOTS_RES => BrokerEvent::SpotSubscribed,
        payload::UNSUBSCRIBE_SPOTS_RES => BrokerEvent::SpotUnsubscribed,
        payload::SPOT_EVENT => BrokerEvent::SpotTick {
            symbol_id: req_i64(p, "symbolId")?,
            bid: price(p, "bid"),
            ask: price(p, "ask"),
        },
        payload::TICK_DATA_RES => BrokerEvent::TickData {
            symbol_id: opt_i64(p, "symbolId")
                .or_else(|| env.client_msg_id.as_deref().and_then(tick_symbol)),
            ticks: parse_ticks(array(p, "tickData"))?,
        },
        payload::UNREALIZED_PNL_RES => BrokerEvent::UnrealizedPnl(parse_unrealized(p)),
        payload::EXECUTION_EVENT => parse_execution(p)?,
        payload::ORDER_DETAILS_RES => {
            let order = p.get("order").context("order details without order")?;
            BrokerEvent::OrderDetails {
                order_id: req_i64(order, "orderId")?,
                status: opt_i64(order, "orderStatus").unwrap_or(0),
            }
        }
        payload::ASSET_LIST_RES => catalog(CatalogKind::Assets, array(p, "asset"), |v| {
            named(v, "assetId", "displayName")
        }),
        payload::ASSET_CLASS_LIST_RES => {
            catalog(CatalogKind::AssetClasses, array(p, "assetClass"), |v| named(v, "id", "name"))
        }
        payload::SYMBOL_CATEGORY_RES => {
            catalog(CatalogKind::SymbolCategories, array(p, "symbolCategory"), |v| {
                named(v, "id", "name")
            })
        }
        payload::TRENDBARS_RES => catalog(CatalogKind::Trendbars, array(p, "trendbar"), trendbar),
        payload::DEAL_OFFSET_LIST_RES => {
            let offsets: Vec<Value> = array(p, "offsetBy")
                .iter()
                .chain(array(p, "offsetting"))
                .cloned()
                .collect();
            catalog(CatalogKind::DealOffsets, &offsets, |v| {
                Ok(format!(
                    "deal {} volume {}",
                    req_i64(v, "dealId")?,
                    opt_i64(v, "volume").unwrap_or(0)
                ))
            })
        }
        payload::ORDERS_BY_POSITION_RES => {
            catalog(CatalogKind::PositionOrders, array(p, "order"), |v| {
                let order = parse_order(v)?;
                Ok(format!("order {} status {}", order.order_id, order.status))
            })
        }
        payload::ACCOUNT_LOGOUT_RES => BrokerEvent::LoggedOut,
        payload::ERROR_RES | payload::ERROR_COMMON => BrokerEvent::Error {
            code: str_or(p, "errorCode", "UNKNOWN"),
            description: str_or(p, "description", ""),
        },
        other => {
            debug!("Ignoring payload type {other}");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn parse_account(v: &Value) -> Result<AccountMeta> {
    Ok(AccountMeta {
        account_id: req_i64(v, "ctidTraderAccountId")?,
        currency: str_or(v, "depositCurrency", ""),
        broker: v
            .get("brokerTitleShort")
            .or_else(|| v.get("brokerName"))
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string(),
        is_live: v.get("isLive").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn parse_symbol(v: &Value) -> Result<SymbolInfo> {
    let symbol_id = req_i64(v, "symbolId")?;
    Ok(SymbolInfo {
        symbol_id,
        name: v
            .get("symbolName")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("ID:{symbol_id}")),
        pips_position: opt_i64(v, "digits")
            .and_then(|d| u32::try_from(d).ok())
            .unwrap_or(DEFAULT_PIPS_POSITION),
        // lotSize is in hundredths of a unit; zero falls back downstream.
        contract_size: opt_i64(v, "lotSize").map(|l| l as f64 / 100.0).unwrap_or(0.0),
    })
}

fn parse_trader(p: &Value) -> Result<TraderInfo> {
    let trader = p.get("trader").context("trader response without trader")?;
    let digits = opt_i64(trader, "moneyDigits").unwrap_or(DEFAULT_MONEY_DIGITS);
    Ok(TraderInfo {
        account_id: req_i64(trader, "ctidTraderAccountId")?,
        balance: scale_money(opt_i64(trader, "balance").unwrap_or(0), digits),
        equity: None,
        free_margin: None,
    })
}

pub fn parse_position(v: &Value) -> Result<Position> {
    let position_id = req_i64(v, "positionId")?;
    let trade = v
        .get("tradeData")
        .with_context(|| format!("position {position_id} without tradeData"))?;
    let side_code = req_i64(trade, "tradeSide")?;
    let digits = opt_i64(v, "moneyDigits").unwrap_or(DEFAULT_MONEY_DIGITS);
    Ok(Position {
        position_id,
        symbol_id: req_i64(trade, "symbolId")?,
        side: Side::from_code(side_code)
            .with_context(|| format!("position {position_id}: unknown side {side_code}"))?,
        volume_units: req_i64(trade, "volume")?,
        // A missing price is kept as NaN; the dashboard reports it per row.
        entry_price: v.get("price").and_then(Value::as_f64).unwrap_or(f64::NAN),
        open_timestamp: opt_i64(trade, "openTimestamp").unwrap_or(0),
        used_margin: opt_i64(v, "usedMargin").map(|m| scale_money(m, digits)),
    })
}

fn catalog(kind: CatalogKind, raw: &[Value], line: impl Fn(&Value) -> Result<String>) -> BrokerEvent {
    BrokerEvent::Catalog {
        kind,
        entries: rows(raw, kind.label(), line),
    }
}

/// `name (id)`, falling back to `name` when no display name is set.
fn named(v: &Value, id_key: &str, name_key: &str) -> Result<String> {
    let id = req_i64(v, id_key)?;
    let name = v
        .get(name_key)
        .or_else(|| v.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("?");
    Ok(format!("{name} ({id})"))
}

/// Trendbar prices are a low plus deltas; they stay unscaled here.
fn trendbar(v: &Value) -> Result<String> {
    let minutes = req_i64(v, "utcTimestampInMinutes")?;
    let low = opt_i64(v, "low").unwrap_or(0);
    let at = DateTime::from_timestamp(minutes * 60, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| minutes.to_string());
    Ok(format!(
        "{at} O {} H {} L {low} C {} vol {}",
        low + opt_i64(v, "deltaOpen").unwrap_or(0),
        low + opt_i64(v, "deltaHigh").unwrap_or(0),
        low + opt_i64(v, "deltaClose").unwrap_or(0),
        opt_i64(v, "volume").unwrap_or(0)
    ))
}

fn parse_order(v: &Value) -> Result<PendingOrder> {
    Ok(PendingOrder {
        order_id: req_i64(v, "orderId")?,
        symbol_id: v.get("tradeData").and_then(|t| opt_i64(t, "symbolId")),
        status: opt_i64(v, "orderStatus").unwrap_or(0),
    })
}

/// The first tick is absolute; each following tick is a delta on the previous
/// one, for both price and timestamp.
fn parse_ticks(raw: &[Value]) -> Result<Vec<RawTick>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut tick = 0i64;
    let mut timestamp = 0i64;
    for v in raw {
        tick += req_i64(v, "tick")?;
        timestamp += opt_i64(v, "timestamp").unwrap_or(0);
        out.push(RawTick {
            timestamp,
            bid: u64::try_from(tick).ok().filter(|t| *t > 0),
            ask: None,
        });
    }
    Ok(out)
}

fn parse_unrealized(p: &Value) -> Vec<PnlReport> {
    let digits = opt_i64(p, "moneyDigits").unwrap_or(DEFAULT_MONEY_DIGITS);
    rows(array(p, "positionUnrealizedPnL"), "PnL report", |v| {
        Ok(PnlReport {
            position_id: req_i64(v, "positionId")?,
            net: scale_money(opt_i64(v, "netUnrealizedPnL").unwrap_or(0), digits),
            gross: scale_money(opt_i64(v, "grossUnrealizedPnL").unwrap_or(0), digits),
        })
    })
}

fn parse_execution(p: &Value) -> Result<BrokerEvent> {
    let code = req_i64(p, "executionType")?;
    let raw_position = p.get("position");
    let position = raw_position.and_then(|v| match parse_position(v) {
        Ok(pos) => Some(pos),
        Err(e) => {
            warn!("Execution with malformed position: {e:#}");
            None
        }
    });
    let closed = raw_position
        .and_then(|v| opt_i64(v, "positionStatus"))
        == Some(POSITION_STATUS_CLOSED);
    let kind = match code {
        EXECUTION_ORDER_FILLED | EXECUTION_ORDER_PARTIAL_FILL if closed => ExecutionKind::Close,
        EXECUTION_ORDER_FILLED | EXECUTION_ORDER_PARTIAL_FILL => ExecutionKind::Filled,
        EXECUTION_ORDER_CANCELLED => ExecutionKind::Cancel,
        other => ExecutionKind::Other(other),
    };
    let position_id = position
        .as_ref()
        .map(|pos| pos.position_id)
        .or_else(|| raw_position.and_then(|v| opt_i64(v, "positionId")))
        .or_else(|| p.get("order").and_then(|o| opt_i64(o, "positionId")))
        .or_else(|| p.get("deal").and_then(|d| opt_i64(d, "positionId")));
    let order_id = p.get("order").and_then(|o| opt_i64(o, "orderId"));
    Ok(BrokerEvent::Execution {
        kind,
        // A closed position is not something to upsert.
        position: position.filter(|_| kind == ExecutionKind::Filled),
        position_id,
        order_id,
    })
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Parse each row on its own; a malformed row is logged and skipped.
fn rows<T>(raw: &[Value], what: &str, parse: impl Fn(&Value) -> Result<T>) -> Vec<T> {
    raw.iter()
        .filter_map(|v| match parse(v) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!("Skipping malformed {what}: {e:#}");
                None
            }
        })
        .collect()
}

fn tick_symbol(client_msg_id: &str) -> Option<i64> {
    client_msg_id
        .strip_prefix(TICK_MSG_PREFIX)?
        .split('-')
        .next()?
        .parse()
        .ok()
}

pub fn scale_money(raw: i64, digits: i64) -> f64 {
    raw as f64 / 10f64.powi(digits.clamp(0, 18) as i32)
}

fn array<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn opt_i64(v: &Value, key: &str) -> Option<i64> {
    let field = v.get(key)?;
    field
        .as_i64()
        .or_else(|| field.as_str().and_then(|s| s.parse().ok()))
}

fn req_i64(v: &Value, key: &str) -> Result<i64> {
    match opt_i64(v, key) {
        Some(n) => Ok(n),
        None => bail!("missing integer field {key}"),
    }
}

/// Raw wire price; zero counts as absent.
fn price(v: &Value, key: &str) -> Option<u64> {
    v.get(key).and_then(Value::as_u64).filter(|p| *p > 0)
}

fn str_or(v: &Value, key: &str, default: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrendbarPeriod;

    fn envelope(payload_type: u32, payload: Value) -> String {
        json!({ "clientMsgId": "x", "payloadType": payload_type, "payload": payload }).to_string()
    }

    #[test]
    fn close_position_carries_wire_volume() {
        let text = encode(&BrokerCommand::ClosePosition {
            account_id: 9,
            position_id: 77,
            volume_units: 150,
        })
        .unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["payloadType"], 2111);
        assert_eq!(v["payload"]["positionId"], 77);
        assert_eq!(v["payload"]["volume"], 150);
        assert!(v["clientMsgId"].as_str().is_some_and(|s| !s.is_empty()));
    }

    #[test]
    fn limit_order_sets_limit_price_only() {
        let text = encode(&BrokerCommand::NewOrder {
            account_id: 1,
            symbol_id: 2,
            side: Side::Sell,
            volume_units: 100,
            order_type: OrderType::Limit(1.2345),
        })
        .unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["payload"]["orderType"], 2);
        assert_eq!(v["payload"]["tradeSide"], 2);
        assert_eq!(v["payload"]["limitPrice"], 1.2345);
        assert!(v["payload"].get("stopPrice").is_none());
    }

    #[test]
    fn spot_event_zero_side_is_absent() {
        let ev = decode(&envelope(2131, json!({ "symbolId": 1, "bid": 0, "ask": 120005 })));
        assert_eq!(
            ev,
            Some(BrokerEvent::SpotTick {
                symbol_id: 1,
                bid: None,
                ask: Some(120005)
            })
        );
    }

    #[test]
    fn unrealized_pnl_scaled_by_money_digits() {
        let ev = decode(&envelope(
            2188,
            json!({
                "ctidTraderAccountId": 5,
                "moneyDigits": 3,
                "positionUnrealizedPnL": [
                    { "positionId": 11, "grossUnrealizedPnL": -12500, "netUnrealizedPnL": -13250 }
                ]
            }),
        ));
        let Some(BrokerEvent::UnrealizedPnl(reports)) = ev else {
            panic!("expected pnl batch, got {ev:?}");
        };
        assert_eq!(reports.len(), 1);
        assert!((reports[0].net + 13.25).abs() < 1e-9);
        assert!((reports[0].gross + 12.5).abs() < 1e-9);
    }

    #[test]
    fn reconcile_parses_positions_and_orders() {
        let ev = decode(&envelope(
            2125,
            json!({
                "ctidTraderAccountId": 5,
                "position": [{
                    "positionId": 1,
                    "tradeData": { "symbolId": 3, "volume": 250, "tradeSide": 1, "openTimestamp": 1700000000000i64 },
                    "price": 1.1
                }],
                "order": [{ "orderId": 9, "tradeData": { "symbolId": 3 }, "orderStatus": 1 }]
            }),
        ));
        let Some(BrokerEvent::Reconcile { account_id, positions, orders }) = ev else {
            panic!("expected reconcile, got {ev:?}");
        };
        assert_eq!(account_id, 5);
        assert_eq!(positions[0].side, Side::Buy);
        assert_eq!(positions[0].volume_units, 250);
        assert_eq!(orders[0].symbol_id, Some(3));
    }

    #[test]
    fn malformed_position_does_not_sink_the_snapshot() {
        let ev = decode(&envelope(
            2125,
            json!({
                "ctidTraderAccountId": 5,
                "position": [
                    {
                        "positionId": 1,
                        "tradeData": { "symbolId": 3, "volume": 250, "tradeSide": 1 },
                        "price": 1.1
                    },
                    {
                        "positionId": 2,
                        "tradeData": { "symbolId": 3, "volume": 100 },
                        "price": 1.2
                    }
                ],
                "order": [{ "orderStatus": 1 }, { "orderId": 9 }]
            }),
        ));
        let Some(BrokerEvent::Reconcile { positions, orders, .. }) = ev else {
            panic!("expected reconcile, got {ev:?}");
        };
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].position_id, 1);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id, 9);
    }

    #[test]
    fn execution_with_malformed_position_still_decodes() {
        let ev = decode(&envelope(
            2126,
            json!({
                "executionType": 3,
                "position": { "positionId": 6, "positionStatus": 1, "tradeData": { "symbolId": 3 } },
                "order": { "orderId": 8 }
            }),
        ));
        assert!(matches!(
            ev,
            Some(BrokerEvent::Execution { kind: ExecutionKind::Filled, position: None, position_id: Some(6), order_id: Some(8) })
        ));
    }

    #[test]
    fn execution_kinds() {
        let filled = decode(&envelope(
            2126,
            json!({
                "executionType": 3,
                "position": {
                    "positionId": 4,
                    "positionStatus": 1,
                    "tradeData": { "symbolId": 3, "volume": 100, "tradeSide": 2 },
                    "price": 1.0
                },
                "order": { "orderId": 8 }
            }),
        ));
        assert!(matches!(
            filled,
            Some(BrokerEvent::Execution { kind: ExecutionKind::Filled, position: Some(_), position_id: Some(4), order_id: Some(8) })
        ));

        let closed = decode(&envelope(
            2126,
            json!({
                "executionType": 3,
                "position": {
                    "positionId": 4,
                    "positionStatus": 2,
                    "tradeData": { "symbolId": 3, "volume": 100, "tradeSide": 2 }
                }
            }),
        ));
        assert!(matches!(
            closed,
            Some(BrokerEvent::Execution { kind: ExecutionKind::Close, position: None, position_id: Some(4), .. })
        ));

        let cancelled = decode(&envelope(2126, json!({ "executionType": 5, "order": { "orderId": 2 } })));
        assert!(matches!(
            cancelled,
            Some(BrokerEvent::Execution { kind: ExecutionKind::Cancel, position_id: None, order_id: Some(2), .. })
        ));
    }

    #[test]
    fn tick_data_resolves_symbol_from_message_id() {
        let text = json!({
            "clientMsgId": "tick-42-abc",
            "payloadType": 2146,
            "payload": { "tickData": [
                { "timestamp": 1000, "tick": 120000 },
                { "timestamp": 5, "tick": 7 }
            ]}
        })
        .to_string();
        let Some(BrokerEvent::TickData { symbol_id, ticks }) = decode(&text) else {
            panic!("expected tick data");
        };
        assert_eq!(symbol_id, Some(42));
        assert_eq!(ticks[1].timestamp, 1005);
        assert_eq!(ticks[1].bid, Some(120007));
    }

    #[test]
    fn unknown_and_malformed_are_dropped() {
        assert_eq!(decode(&envelope(9999, json!({}))), None);
        assert_eq!(decode("not json"), None);
        assert_eq!(decode(&envelope(2131, json!({ "bid": 1 }))), None);
    }

    #[test]
    fn symbol_scaling_comes_from_digits_and_lot_size() {
        let ev = decode(&envelope(
            2115,
            json!({ "symbol": [
                { "symbolId": 1, "symbolName": "EURUSD", "digits": 5, "lotSize": 10_000_000 },
                { "symbolId": 2, "symbolName": "XAUUSD", "digits": 2 }
            ]}),
        ));
        let Some(BrokerEvent::Symbols(symbols)) = ev else {
            panic!("expected symbols, got {ev:?}");
        };
        assert_eq!(symbols[0].pips_position, 5);
        assert_eq!(symbols[0].contract_size, 100_000.0);
        assert_eq!(symbols[1].pips_position, 2);
        assert_eq!(symbols[1].effective_contract_size(), 100_000.0);
    }

    #[test]
    fn trendbar_request_uses_period_code() {
        let text = encode(&BrokerCommand::Trendbars {
            account_id: 1,
            symbol_id: 3,
            period: TrendbarPeriod::H1,
            from_ms: 10,
            to_ms: 20,
        })
        .unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["payloadType"], 2137);
        assert_eq!(v["payload"]["period"], 9);
        assert_eq!(v["payload"]["toTimestamp"], 20);
    }

    #[test]
    fn listings_become_catalog_lines() {
        let ev = decode(&envelope(
            2113,
            json!({ "asset": [
                { "assetId": 1, "name": "EUR", "displayName": "Euro" },
                { "name": "broken" },
                { "assetId": 2, "name": "USD" }
            ]}),
        ));
        assert_eq!(
            ev,
            Some(BrokerEvent::Catalog {
                kind: CatalogKind::Assets,
                entries: vec!["Euro (1)".into(), "USD (2)".into()]
            })
        );

        let ev = decode(&envelope(
            2138,
            json!({ "trendbar": [
                { "utcTimestampInMinutes": 28_333_333, "low": 100, "deltaOpen": 2, "deltaHigh": 5, "deltaClose": 3, "volume": 7 }
            ]}),
        ));
        let Some(BrokerEvent::Catalog { kind, entries }) = ev else {
            panic!("expected trendbars, got {ev:?}");
        };
        assert_eq!(kind, CatalogKind::Trendbars);
        assert!(entries[0].ends_with("O 102 H 105 L 100 C 103 vol 7"));

        let ev = decode(&envelope(
            2186,
            json!({ "offsetBy": [{ "dealId": 4, "volume": 100 }], "offsetting": [{ "dealId": 5 }] }),
        ));
        assert_eq!(
            ev,
            Some(BrokerEvent::Catalog {
                kind: CatalogKind::DealOffsets,
                entries: vec!["deal 4 volume 100".into(), "deal 5 volume 0".into()]
            })
        );
    }

    #[test]
    fn error_payload() {
        let ev = decode(&envelope(
            2142,
            json!({ "errorCode": "ACCOUNT_NOT_AUTHORIZED", "description": "nope" }),
        ));
        assert_eq!(
            ev,
            Some(BrokerEvent::Error {
                code: "ACCOUNT_NOT_AUTHORIZED".into(),
                description: "nope".into()
            })
        );
    }
}
