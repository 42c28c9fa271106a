/// handlers.rs – Broker event handling on the main loop.
use tracing::{debug, info, warn};

use crate::app::App;
use crate::broker::{BrokerCommand, BrokerEvent, RawTick};
use crate::models::{
    scale_price, AccountId, AccountMeta, CatalogKind, ExecutionKind, OrderId, PendingOrder, PnlReport,
    Position, PositionId, SymbolId, SymbolInfo, TraderInfo, DEFAULT_PIPS_POSITION,
};
use crate::pnl::compute_pnl;

/// Listing lines echoed to the operator; the rest is summarized.
const CATALOG_PREVIEW: usize = 10;

/// Errors after which retrying cannot help.
const FATAL_ERROR_CODES: &[&str] = &["ACCOUNT_NOT_AUTHORIZED", "CH_CTID_TRADER_ACCOUNT_NOT_FOUND"];

pub fn is_fatal(code: &str) -> bool {
    FATAL_ERROR_CODES.contains(&code)
}

impl App {
    pub(crate) fn on_broker_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::AppAuthorized => self.on_app_authorized(),
            BrokerEvent::AccountList(accounts) => self.on_account_list(accounts),
            BrokerEvent::AccountAuthorized(account_id) => self.on_account_authorized(account_id),
            BrokerEvent::Reconcile {
                account_id,
                positions,
                orders,
            } => self.on_reconcile(account_id, positions, orders),
            BrokerEvent::Trader(info) => self.on_trader(info),
            BrokerEvent::SpotTick {
                symbol_id,
                bid,
                ask,
            } => self.on_spot(symbol_id, bid, ask),
            BrokerEvent::TickData { symbol_id, ticks } => self.on_tick_data(symbol_id, &ticks),
            BrokerEvent::Symbols(symbols) => self.on_symbols(symbols),
            BrokerEvent::UnrealizedPnl(reports) => self.on_unrealized_pnl(&reports),
            BrokerEvent::Execution {
                kind,
                position,
                position_id,
                order_id,
            } => self.on_execution(kind, position, position_id, order_id),
            BrokerEvent::OrderDetails { order_id, status } => {
                self.say(format!("Order {order_id}: status {status}"));
            }
            BrokerEvent::Catalog { kind, entries } => self.on_catalog(kind, &entries),
            BrokerEvent::Version(version) => self.say(format!("Broker API version {version}")),
            BrokerEvent::LoggedOut => info!("Account logged out"),
            BrokerEvent::Error { code, description } => self.on_error(&code, &description),
            BrokerEvent::SpotSubscribed | BrokerEvent::SpotUnsubscribed | BrokerEvent::Heartbeat => {
            }
        }
    }

    // -----------------------------------------------------------------------
    // Authorization chain
    // -----------------------------------------------------------------------

    fn on_app_authorized(&mut self) {
        info!("Application authorized");
        let access_token = self.settings.access_token.clone().unwrap_or_default();
        self.broker
            .send(BrokerCommand::AccountListByToken { access_token });
    }

    fn on_account_list(&mut self, accounts: Vec<AccountMeta>) {
        info!("{} account(s) available", accounts.len());
        self.session.set_accounts(accounts);
        self.print_accounts();

        let matched = self.session.matching(&self.settings.account_ids);
        if matched.is_empty() {
            self.say("None of ACCOUNT_IDS is available; use `account <id>` to pick one.");
            self.offer_menu();
            return;
        }
        let access_token = self.settings.access_token.clone().unwrap_or_default();
        for account_id in matched {
            if self.session.begin_auth(account_id) {
                self.broker.send(BrokerCommand::AccountAuth {
                    account_id,
                    access_token: access_token.clone(),
                });
            }
        }
    }

    fn on_account_authorized(&mut self, account_id: AccountId) {
        info!("Account {account_id} authorized");
        self.session.authorized(account_id);
        if !self.symbols_requested {
            self.symbols_requested = true;
            self.broker.send(BrokerCommand::SymbolsList { account_id });
        }
        self.broker.send(BrokerCommand::Reconcile { account_id });
    }

    fn on_trader(&mut self, info: TraderInfo) {
        let account_id = info.account_id;
        let promoted = self.session.trader_info(info);
        if std::mem::take(&mut self.prints.trader) {
            self.say(format!(
                "Account {account_id}: balance {:.2} {}",
                info.balance,
                self.session.currency()
            ));
        }
        if !promoted {
            return;
        }
        self.say(format!("Account {account_id} ready."));
        self.flush_ready();
        self.broker.send(BrokerCommand::Reconcile { account_id });
        if std::mem::take(&mut self.auto_live) {
            if self.menu_waiting() {
                self.say("Type `live` to open the dashboard.");
            } else if let Err(e) = self.launch_live_dashboard() {
                self.say(format!("Cannot start live view: {e:#}"));
            }
        }
        self.offer_menu();
    }

    // -----------------------------------------------------------------------
    // Positions
    // -----------------------------------------------------------------------

    fn on_reconcile(
        &mut self,
        account_id: AccountId,
        positions: Vec<Position>,
        orders: Vec<PendingOrder>,
    ) {
        self.session.reconciled(account_id);
        let current = self.session.current();
        if current.is_some_and(|id| id != account_id) {
            debug!("Ignoring reconcile for non-current account {account_id}");
        } else {
            let outcome = self.store.replace_all(positions);
            for id in &outcome.removed {
                self.stops.clear(*id);
                self.release_view(*id);
            }
            self.orders = orders;
            debug!(
                "Reconciled {account_id}: {} positions (+{} -{}), {} orders",
                self.store.len(),
                outcome.added.len(),
                outcome.removed.len(),
                self.orders.len()
            );

            if self.dashboard_active() {
                for symbol_id in outcome.added_symbols {
                    self.subscribe(symbol_id);
                }
                let stale: Vec<SymbolId> = self
                    .subscribed
                    .difference(&outcome.referenced_symbols)
                    .copied()
                    .collect();
                self.unsubscribe(stale);
                self.send_when_ready(|account_id| BrokerCommand::UnrealizedPnl { account_id });
                self.request_render();
            }
            if std::mem::take(&mut self.prints.positions) {
                self.print_positions();
            }
        }

        if self.session.trader(account_id).is_none() {
            self.broker.send(BrokerCommand::Trader { account_id });
        }
    }

    fn on_execution(
        &mut self,
        kind: ExecutionKind,
        position: Option<Position>,
        position_id: Option<PositionId>,
        order_id: Option<OrderId>,
    ) {
        info!("Execution {kind}: position {position_id:?} order {order_id:?}");
        match (kind, position, position_id) {
            (ExecutionKind::Filled, Some(position), _) => {
                let symbol_id = position.symbol_id;
                self.store.upsert(position);
                if self.dashboard_active() {
                    self.subscribe(symbol_id);
                }
                self.send_when_ready(|account_id| BrokerCommand::UnrealizedPnl { account_id });
                self.request_render();
            }
            (ExecutionKind::Filled, None, _) => {
                self.request_reconcile();
                if let Some(order_id) = order_id {
                    self.send_when_ready(move |account_id| BrokerCommand::OrderDetails {
                        account_id,
                        order_id,
                    });
                }
            }
            (kind, _, Some(position_id)) if kind.is_close_like() => {
                self.remove_position(position_id);
                self.notice(format!("{kind}: position {position_id}"));
            }
            _ => self.request_reconcile(),
        }
    }

    fn print_positions(&mut self) {
        let currency = self.session.currency().to_string();
        if self.store.is_empty() {
            println!("No open positions.");
            return;
        }
        let ordered = self.store.ordered().to_vec();
        for id in ordered {
            let Some(p) = self.store.get(id) else {
                continue;
            };
            let name = self
                .symbols
                .get(&p.symbol_id)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| format!("ID:{}", p.symbol_id));
            let pnl = compute_pnl(
                p,
                self.symbols.get(&p.symbol_id),
                self.quotes.get(p.symbol_id),
                self.store.pnl(id),
            )
            .map(|pnl| format!("{:+.2} {currency}", pnl.value))
            .unwrap_or_else(|| "-".into());
            println!(
                "{id:>10} {name:<10} {:<4} {:>6.2} lots @ {:<10} PnL {pnl}",
                p.side.as_str(),
                p.lots(),
                p.entry_price
            );
        }
        for order in &self.orders {
            println!(
                "  order {} symbol {:?} status {}",
                order.order_id, order.symbol_id, order.status
            );
        }
    }

    // -----------------------------------------------------------------------
    // Prices
    // -----------------------------------------------------------------------

    fn pips(&self, symbol_id: SymbolId) -> u32 {
        self.symbols
            .get(&symbol_id)
            .map_or(DEFAULT_PIPS_POSITION, |s| s.pips_position)
    }

    fn on_spot(&mut self, symbol_id: SymbolId, bid: Option<u64>, ask: Option<u64>) {
        let pips = self.pips(symbol_id);
        let bid = bid.map(|raw| scale_price(raw, pips));
        let ask = ask.map(|raw| scale_price(raw, pips));
        if self.quotes.apply_tick(symbol_id, bid, ask).is_some() {
            self.request_render();
        }
    }

    /// Tick-data fallback: take the most recent tick as a bid-side quote.
    fn on_tick_data(&mut self, symbol_id: Option<SymbolId>, ticks: &[RawTick]) {
        let Some(symbol_id) = symbol_id else {
            debug!("Tick data without a symbol tag ignored");
            return;
        };
        let latest = ticks.iter().max_by_key(|t| t.timestamp);
        if std::mem::take(&mut self.prints.ticks) {
            let pips = self.pips(symbol_id);
            let last = latest
                .and_then(|t| t.bid)
                .map(|raw| format!(", latest bid {}", scale_price(raw, pips)))
                .unwrap_or_default();
            self.say(format!("{} ticks for symbol {symbol_id}{last}", ticks.len()));
        }
        let Some(latest) = latest else {
            debug!("No ticks for symbol {symbol_id}");
            return;
        };
        self.on_spot(symbol_id, latest.bid, latest.ask);
    }

    fn on_symbols(&mut self, symbols: Vec<SymbolInfo>) {
        info!("{} symbols loaded", symbols.len());
        self.symbols
            .extend(symbols.into_iter().map(|s| (s.symbol_id, s)));
        self.request_render();
    }

    // -----------------------------------------------------------------------
    // PnL / stop-loss
    // -----------------------------------------------------------------------

    fn on_unrealized_pnl(&mut self, reports: &[PnlReport]) {
        let mut changed = false;
        for report in reports {
            changed |= self.store.set_pnl(report.position_id, report.net);
            let hit = self.stops.on_pnl(
                self.store.get(report.position_id),
                report.position_id,
                report.net,
                &mut self.notices,
            );
            if let Some(hit) = hit {
                warn!(
                    "Stop-loss {:.2} hit for {} at {:.2}",
                    hit.threshold, hit.position_id, hit.net_pnl
                );
                let (position_id, volume_units) = (hit.position_id, hit.volume_units);
                self.send_when_ready(move |account_id| BrokerCommand::ClosePosition {
                    account_id,
                    position_id,
                    volume_units,
                });
                changed = true;
            }
        }
        if std::mem::take(&mut self.prints.pnl) {
            let currency = self.session.currency();
            if reports.is_empty() {
                println!("No unrealized PnL reported.");
            }
            for r in reports {
                println!(
                    "{:>10} net {:+.2} gross {:+.2} {currency}",
                    r.position_id, r.net, r.gross
                );
            }
        }
        if changed {
            self.request_render();
        }
    }

    // -----------------------------------------------------------------------
    // Listings
    // -----------------------------------------------------------------------

    fn on_catalog(&self, kind: CatalogKind, entries: &[String]) {
        self.say(format!("{} {}", entries.len(), kind.label()));
        for entry in entries.iter().take(CATALOG_PREVIEW) {
            self.say(format!("  {entry}"));
        }
        if entries.len() > CATALOG_PREVIEW {
            self.say(format!("  … {} more", entries.len() - CATALOG_PREVIEW));
        }
    }

    // -----------------------------------------------------------------------
    // Errors
    // -----------------------------------------------------------------------

    fn on_error(&mut self, code: &str, description: &str) {
        let msg = format!("Broker error {code}: {description}");
        warn!("{msg}");
        if !self.dashboard_active() {
            println!("{msg}");
        }
        self.notice(msg.clone());
        if is_fatal(code) {
            self.fatal = Some(msg);
            self.shutdown("fatal broker error");
        } else {
            self.offer_menu();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_authorization_failures_are_fatal() {
        assert!(is_fatal("ACCOUNT_NOT_AUTHORIZED"));
        assert!(is_fatal("CH_CTID_TRADER_ACCOUNT_NOT_FOUND"));
        assert!(!is_fatal("MARKET_CLOSED"));
        assert!(!is_fatal(""));
    }
}
