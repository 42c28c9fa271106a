/// app.rs – Application state owned by the main loop.
///
/// Everything mutable lives here and is only touched from the loop: broker
/// events, decoded keys, menu lines and timers all arrive as [`LoopTask`]s and
/// run to completion one at a time. Broker event handlers are in
/// `handlers.rs`.
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::broker::{BrokerCommand, BrokerHandle};
use crate::config::Settings;
use crate::dashboard::{self, CrossTerm, Screen, Sources};
use crate::event_loop::{DashboardTimer, LoopHandle, LoopTask};
use crate::input::InputThread;
use crate::keys::{Key, KeyAction, KeyInput};
use crate::menu::{self, MenuCommand, MenuReader};
use crate::models::{AccountId, NoticeLog, PendingOrder, PositionId, SymbolId, SymbolInfo};
use crate::pnl::QuoteBook;
use crate::render::{RenderGate, RenderScheduler};
use crate::session::Session;
use crate::shutdown::{self, ShutdownLatch};
use crate::stop_loss::StopLossMonitor;
use crate::store::PositionStore;
use crate::viewport::Viewport;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
/// How far back a tick-data fallback looks for the latest price.
const TICK_LOOKBACK_MS: i64 = DAY_MS;

/// Menu requests whose answer arrives asynchronously.
#[derive(Debug, Default)]
pub(crate) struct PendingPrints {
    pub positions: bool,
    pub pnl: bool,
    pub trader: bool,
    pub ticks: bool,
}

pub struct App {
    pub(crate) settings: Settings,
    pub(crate) broker: BrokerHandle,
    pub(crate) handle: LoopHandle,

    pub(crate) session: Session,
    pub(crate) store: PositionStore,
    pub(crate) quotes: QuoteBook,
    pub(crate) symbols: HashMap<SymbolId, SymbolInfo>,
    pub(crate) stops: StopLossMonitor,
    pub(crate) notices: NoticeLog,
    pub(crate) orders: Vec<PendingOrder>,
    pub(crate) subscribed: BTreeSet<SymbolId>,
    pub(crate) symbols_requested: bool,
    pub(crate) connected: bool,
    pub(crate) prints: PendingPrints,
    /// Open the dashboard as soon as an account becomes ready.
    pub(crate) auto_live: bool,

    // Live dashboard
    keys: KeyInput,
    viewport: Viewport,
    row_budget: usize,
    details: Option<PositionId>,
    render: RenderScheduler,
    dashboard_active: Arc<AtomicBool>,
    generation: u64,
    terminal: Option<CrossTerm>,
    terminal_touched: bool,
    input: Option<InputThread>,

    menu: Option<MenuReader>,
    timers: JoinSet<LoopTask>,
    shutdown: ShutdownLatch,
    pub(crate) fatal: Option<String>,
}

impl App {
    pub fn new(settings: Settings, broker: BrokerHandle, handle: LoopHandle) -> Self {
        let render_handle = handle.clone();
        let render = RenderScheduler::new(
            Duration::from_millis(settings.dashboard.render_min_interval_ms),
            move || {
                render_handle.send(LoopTask::Render);
            },
        );
        let notices = NoticeLog::new(settings.dashboard.notice_capacity);
        Self {
            settings,
            broker,
            handle,
            session: Session::new(),
            store: PositionStore::new(),
            quotes: QuoteBook::new(),
            symbols: HashMap::new(),
            stops: StopLossMonitor::new(),
            notices,
            orders: Vec::new(),
            subscribed: BTreeSet::new(),
            symbols_requested: false,
            connected: false,
            prints: PendingPrints::default(),
            auto_live: false,
            keys: KeyInput::new(),
            viewport: Viewport::default(),
            row_budget: 1,
            details: None,
            render,
            dashboard_active: Arc::new(AtomicBool::new(false)),
            generation: 0,
            terminal: None,
            terminal_touched: false,
            input: None,
            menu: None,
            timers: JoinSet::new(),
            shutdown: ShutdownLatch::new(),
            fatal: None,
        }
    }

    pub fn attach_menu(&mut self, menu: MenuReader) {
        self.menu = Some(menu);
    }

    pub fn launch_when_ready(&mut self) {
        self.auto_live = true;
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    pub async fn run(&mut self, mut rx: UnboundedReceiver<LoopTask>) -> Result<()> {
        println!("Connecting… type `help` for commands.");
        if !self.auto_live {
            self.offer_menu();
        }

        loop {
            let task = tokio::select! {
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
                Some(joined) = self.timers.join_next(), if !self.timers.is_empty() => match joined {
                    Ok(task) => task,
                    Err(e) => {
                        if !e.is_cancelled() {
                            warn!("Timer task failed: {e}");
                        }
                        continue;
                    }
                },
            };
            self.dispatch(task);
            if self.shutdown.is_started() {
                break;
            }
        }

        match self.fatal.take() {
            Some(msg) => Err(anyhow!(msg)),
            None => Ok(()),
        }
    }

    pub(crate) fn dispatch(&mut self, task: LoopTask) {
        match task {
            LoopTask::Render => self.on_render(),
            LoopTask::Key(key) => self.on_key(key),
            LoopTask::Menu(line) => self.on_menu_line(&line),
            LoopTask::Broker(event) => self.on_broker_event(event),
            LoopTask::Connected => self.on_connected(),
            LoopTask::Disconnected(reason) => self.on_disconnected(&reason),
            LoopTask::Timer { generation, timer } => self.on_timer(generation, timer),
            LoopTask::ReturnToMenu => self.offer_menu(),
            LoopTask::ReconcileAfterClose => self.request_reconcile(),
            LoopTask::Shutdown(reason) => self.shutdown(reason),
        }
    }

    fn spawn_after(&mut self, delay: Duration, task: LoopTask) {
        self.timers.spawn(async move {
            tokio::time::sleep(delay).await;
            task
        });
    }

    /// Arm a dashboard timer for the current dashboard session.
    fn arm(&mut self, delay: Duration, timer: DashboardTimer) {
        let generation = self.generation;
        self.spawn_after(delay, LoopTask::Timer { generation, timer });
    }

    // -----------------------------------------------------------------------
    // Output helpers
    // -----------------------------------------------------------------------

    /// Operator-facing message: printed unless the dashboard owns the
    /// terminal, always logged.
    pub(crate) fn say(&self, msg: impl std::fmt::Display) {
        info!("{msg}");
        if !self.dashboard_active() {
            println!("{msg}");
        }
    }

    pub(crate) fn notice(&mut self, msg: impl Into<String>) {
        self.notices.push(msg);
        self.request_render();
    }

    pub(crate) fn request_render(&self) {
        if self.dashboard_active() {
            self.render.request_render();
        }
    }

    /// A stdin read is outstanding; the dashboard must not start under it.
    pub(crate) fn menu_waiting(&self) -> bool {
        self.menu.as_ref().is_some_and(MenuReader::is_waiting)
    }

    pub(crate) fn offer_menu(&mut self) {
        if self.dashboard_active() || self.shutdown.is_started() {
            return;
        }
        if let Some(menu) = self.menu.as_mut() {
            menu.prompt();
        }
    }

    // -----------------------------------------------------------------------
    // Broker plumbing
    // -----------------------------------------------------------------------

    /// Send now if an account is current, otherwise once one becomes ready.
    pub(crate) fn send_when_ready<F>(&mut self, build: F)
    where
        F: FnOnce(AccountId) -> BrokerCommand + Send + 'static,
    {
        match self.session.when_ready(Box::new(build)) {
            Some(cmd) => self.broker.send(cmd),
            None => debug!("Queued until an account is ready ({})", self.session.queued()),
        }
    }

    pub(crate) fn flush_ready(&mut self) {
        for cmd in self.session.flush_ready() {
            self.broker.send(cmd);
        }
    }

    pub(crate) fn request_reconcile(&mut self) {
        self.send_when_ready(|account_id| BrokerCommand::Reconcile { account_id });
    }

    fn on_connected(&mut self) {
        self.connected = true;
        self.session.reset();
        self.subscribed.clear();
        self.say("Connected to broker; authorizing application…");
        let (Some(client_id), Some(client_secret)) = (
            self.settings.client_id.clone(),
            self.settings.client_secret.clone(),
        ) else {
            self.fatal = Some("CLIENT_ID / CLIENT_SECRET are not set".into());
            self.shutdown("missing credentials");
            return;
        };
        self.broker.send(BrokerCommand::ApplicationAuth {
            client_id,
            client_secret,
        });
        self.request_render();
    }

    fn on_disconnected(&mut self, reason: &str) {
        self.connected = false;
        let msg = format!(
            "Disconnected ({reason}); reconnecting in {}s",
            self.settings.broker.reconnect_delay_secs
        );
        self.say(&msg);
        self.notice(msg);
    }

    /// Subscribe every symbol held by a position that isn't subscribed yet.
    fn subscribe_missing(&mut self) {
        let missing: Vec<SymbolId> = self
            .store
            .symbols_in_use()
            .difference(&self.subscribed)
            .copied()
            .collect();
        if missing.is_empty() {
            return;
        }
        self.subscribed.extend(missing.iter().copied());
        self.send_when_ready(move |account_id| BrokerCommand::SubscribeSpots {
            account_id,
            symbol_ids: missing,
        });
    }

    pub(crate) fn subscribe(&mut self, symbol_id: SymbolId) {
        if self.subscribed.insert(symbol_id) {
            self.send_when_ready(move |account_id| BrokerCommand::SubscribeSpots {
                account_id,
                symbol_ids: vec![symbol_id],
            });
        }
    }

    pub(crate) fn unsubscribe(&mut self, symbols: Vec<SymbolId>) {
        let symbol_ids: Vec<SymbolId> = symbols
            .into_iter()
            .filter(|sid| self.subscribed.remove(sid))
            .collect();
        if symbol_ids.is_empty() {
            return;
        }
        self.send_when_ready(move |account_id| BrokerCommand::UnsubscribeSpots {
            account_id,
            symbol_ids,
        });
    }

    /// One-shot tick-data request for held symbols that still have no quote.
    fn fetch_missing_ticks(&mut self) {
        let to_ms = Utc::now().timestamp_millis();
        let from_ms = to_ms - TICK_LOOKBACK_MS;
        let missing: Vec<SymbolId> = self
            .store
            .symbols_in_use()
            .into_iter()
            .filter(|sid| !self.quotes.contains(*sid))
            .collect();
        for symbol_id in missing {
            self.send_when_ready(move |account_id| BrokerCommand::TickData {
                account_id,
                symbol_id,
                from_ms,
                to_ms,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    pub fn dashboard_active(&self) -> bool {
        self.dashboard_active.load(Ordering::Acquire)
    }

    /// Take over the terminal and start the live PnL view.
    pub fn launch_live_dashboard(&mut self) -> Result<()> {
        if self.dashboard_active() {
            return Ok(());
        }
        if self.session.current().is_none() {
            bail!("no account is ready yet");
        }
        self.terminal_touched = true;
        self.terminal = Some(dashboard::setup_terminal().context("entering dashboard")?);
        self.activate();
        match InputThread::spawn(Arc::clone(&self.dashboard_active), self.handle.clone()) {
            Ok(input) => self.input = Some(input),
            Err(e) => {
                shutdown::step("stop dashboard", || self.stop_dashboard());
                return Err(e);
            }
        }
        info!("Live dashboard started (generation {})", self.generation);
        Ok(())
    }

    /// Shared by the real dashboard and headless tests: flag, timers,
    /// subscriptions, first PnL request.
    fn activate(&mut self) {
        self.generation += 1;
        self.dashboard_active.store(true, Ordering::Release);
        self.keys.reset();
        self.viewport.reset();
        self.details = None;

        self.subscribe_missing();
        self.send_when_ready(|account_id| BrokerCommand::UnrealizedPnl { account_id });

        let cfg = &self.settings.dashboard;
        let (ticks, pnl, reconcile, prices) = (
            Duration::from_millis(cfg.missing_tick_delay_ms),
            Duration::from_millis(cfg.pnl_poll_ms),
            Duration::from_secs_f64(cfg.reconcile_poll_secs),
            Duration::from_secs_f64(cfg.price_refresh_secs),
        );
        self.arm(ticks, DashboardTimer::FetchMissingTicks);
        self.arm(pnl, DashboardTimer::PnlPoll);
        self.arm(reconcile, DashboardTimer::ReconcilePoll);
        self.arm(prices, DashboardTimer::PriceRefresh);
        self.request_render();
    }

    /// Leave the dashboard: clear the active flag, join the input thread,
    /// give the terminal back. Safe to call when not active.
    pub fn stop_dashboard(&mut self) -> Result<()> {
        self.dashboard_active.store(false, Ordering::Release);
        self.render.cancel();
        self.keys.reset();
        self.details = None;

        let joined = match self.input.take() {
            Some(mut input) => input.stop(),
            None => Ok(()),
        };
        let restored = match self.terminal.take() {
            Some(mut terminal) => dashboard::restore_terminal(&mut terminal),
            None => Ok(()),
        };
        joined.and(restored)
    }

    /// Close `lots` of a position. Sent once an account is ready.
    pub fn close_position(&mut self, position_id: PositionId, lots: f64) -> Result<()> {
        let volume_units = menu::lots_to_units(lots);
        if volume_units <= 0 {
            bail!("volume for position {position_id} rounds to zero");
        }
        info!("Closing position {position_id}: {lots} lots ({volume_units} units)");
        self.send_when_ready(move |account_id| BrokerCommand::ClosePosition {
            account_id,
            position_id,
            volume_units,
        });
        Ok(())
    }

    /// Reconcile, refresh PnL and, while live, fill in subscriptions.
    pub fn refresh_all(&mut self) {
        self.request_reconcile();
        self.send_when_ready(|account_id| BrokerCommand::UnrealizedPnl { account_id });
        if self.dashboard_active() {
            self.subscribe_missing();
        }
    }

    /// Drop a position locally; unsubscribe its symbol if nothing else uses it.
    pub(crate) fn remove_position(&mut self, position_id: PositionId) {
        let Some(removed) = self.store.remove(position_id) else {
            return;
        };
        self.stops.clear(position_id);
        self.release_view(position_id);
        if removed.symbol_released && self.dashboard_active() {
            self.unsubscribe(vec![removed.position.symbol_id]);
        }
        self.viewport.clamp(self.store.len(), self.row_budget);
        self.request_render();
    }

    /// Close details and cancel a stop-loss prompt bound to a position that
    /// left the store.
    pub(crate) fn release_view(&mut self, position_id: PositionId) {
        if self.details == Some(position_id) {
            self.details = None;
        }
        if self.keys.target() == Some(position_id) {
            self.keys.reset();
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    fn on_timer(&mut self, generation: u64, timer: DashboardTimer) {
        if generation != self.generation || !self.dashboard_active() {
            debug!("Dropping stale {timer:?} timer");
            return;
        }
        let cfg = &self.settings.dashboard;
        match timer {
            DashboardTimer::PnlPoll => {
                let delay = Duration::from_millis(cfg.pnl_poll_ms);
                if let Some(account_id) = self.session.current() {
                    self.broker.send(BrokerCommand::UnrealizedPnl { account_id });
                }
                self.arm(delay, timer);
            }
            DashboardTimer::ReconcilePoll => {
                let delay = Duration::from_secs_f64(cfg.reconcile_poll_secs);
                if let Some(account_id) = self.session.current() {
                    self.broker.send(BrokerCommand::Reconcile { account_id });
                }
                self.arm(delay, timer);
            }
            DashboardTimer::PriceRefresh => {
                let delay = Duration::from_secs_f64(cfg.price_refresh_secs);
                self.subscribe_missing();
                self.fetch_missing_ticks();
                self.arm(delay, timer);
            }
            DashboardTimer::FetchMissingTicks => self.fetch_missing_ticks(),
        }
    }

    // -----------------------------------------------------------------------
    // Keys
    // -----------------------------------------------------------------------

    fn selected_id(&mut self) -> Option<PositionId> {
        self.store
            .selected(self.viewport.selected)
            .map(|p| p.position_id)
    }

    pub(crate) fn on_key(&mut self, key: Key) {
        if !self.dashboard_active() {
            return;
        }
        let selected = self.selected_id();
        let outcome = self.keys.handle(key, selected);
        if let Some(action) = outcome.action {
            if let Err(e) = self.apply_key_action(action) {
                warn!("Key action failed: {e:#}");
                self.notice(format!("{e:#}"));
            }
        }
        if outcome.render {
            self.request_render();
        }
    }

    fn apply_key_action(&mut self, action: KeyAction) -> Result<()> {
        match action {
            KeyAction::MoveSelection(delta) => {
                self.viewport
                    .move_selection(delta, self.store.len(), self.row_budget);
                self.details = None;
                let selected = self.selected_id();
                self.keys.retarget(selected);
            }
            KeyAction::SetStopLoss { position_id, value } => {
                self.stops.set(position_id, value);
                info!(
                    "SL for {position_id} set to {value:.2} {}",
                    self.session.currency()
                );
            }
            KeyAction::ClosePosition(position_id) => {
                let lots = self
                    .store
                    .get(position_id)
                    .map(|p| p.lots())
                    .with_context(|| format!("position {position_id} is gone"))?;
                self.close_position(position_id, lots)?;
                self.remove_position(position_id);
                let delay = Duration::from_millis(self.settings.dashboard.reconcile_after_close_ms);
                self.spawn_after(delay, LoopTask::ReconcileAfterClose);
                self.request_render();
            }
            KeyAction::ShowDetails(position_id) => self.details = Some(position_id),
            KeyAction::Exit => {
                self.stop_dashboard()?;
                let delay = Duration::from_millis(self.settings.dashboard.quit_delay_ms);
                self.spawn_after(delay, LoopTask::ReturnToMenu);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Render
    // -----------------------------------------------------------------------

    fn on_render(&mut self) {
        if !self.dashboard_active() {
            self.render.cancel();
            return;
        }
        match self.render.begin(Instant::now()) {
            RenderGate::Draw => {
                if let Err(e) = self.draw() {
                    warn!("Render failed: {e:#}");
                }
            }
            RenderGate::Defer(delay) => self.spawn_after(delay, LoopTask::Render),
        }
    }

    fn draw(&mut self) -> Result<()> {
        let Some(terminal) = self.terminal.as_mut() else {
            return Ok(());
        };
        let height = terminal.size()?.height;
        let budget = dashboard::row_budget(height, self.settings.dashboard.reserved_rows);
        self.row_budget = budget;

        let ordered = self.store.ordered().to_vec();
        self.viewport.clamp(ordered.len(), budget);

        let now = Utc::now();
        let src = Sources {
            store: &self.store,
            symbols: &self.symbols,
            quotes: &self.quotes,
            stops: &self.stops,
        };
        let table = dashboard::build_table(&ordered, &src, self.viewport, budget, now);
        let details = self
            .details
            .and_then(|id| src.store.get(id))
            .and_then(|p| dashboard::row_view(p, &src, now).ok());

        for err in &table.errors {
            if !self.notices.contains(err) {
                self.notices.push(err.clone());
            }
        }

        let currency = self.session.currency();
        let screen = Screen {
            table: &table,
            account: self.session.current(),
            currency,
            connected: self.connected,
            notices: self
                .notices
                .latest(self.settings.dashboard.visible_notices)
                .collect(),
            prompt: self.keys.prompt(currency),
            details,
        };
        terminal.draw(|frame| dashboard::render(frame, &screen))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Menu
    // -----------------------------------------------------------------------

    fn on_menu_line(&mut self, line: &str) {
        if let Some(menu) = self.menu.as_mut() {
            menu.answered();
        }
        let result = menu::parse(line).and_then(|cmd| self.run_menu_command(cmd));
        if let Err(e) = result {
            println!("{e:#}\n(type `help` for commands)");
        }
        self.offer_menu();
    }

    fn run_menu_command(&mut self, cmd: MenuCommand) -> Result<()> {
        match cmd {
            MenuCommand::Empty => {}
            MenuCommand::Help => println!("{}", menu::USAGE),
            MenuCommand::Quit => self.shutdown("quit"),
            MenuCommand::Accounts => self.print_accounts(),
            MenuCommand::Account(account_id) => self.switch_account(account_id)?,
            MenuCommand::Positions => {
                self.prints.positions = true;
                self.request_reconcile();
            }
            MenuCommand::Prices => self.print_prices(),
            MenuCommand::Subscribe(symbol_id) => self.subscribe(symbol_id),
            MenuCommand::Assets => {
                self.send_when_ready(|account_id| BrokerCommand::AssetList { account_id })
            }
            MenuCommand::AssetClasses => {
                self.send_when_ready(|account_id| BrokerCommand::AssetClassList { account_id })
            }
            MenuCommand::SymbolCategories => {
                self.send_when_ready(|account_id| BrokerCommand::SymbolCategoryList { account_id })
            }
            MenuCommand::Trendbars {
                symbol_id,
                period,
                weeks,
            } => {
                let to_ms = Utc::now().timestamp_millis();
                let from_ms = to_ms.saturating_sub(weeks.saturating_mul(7 * DAY_MS));
                self.send_when_ready(move |account_id| BrokerCommand::Trendbars {
                    account_id,
                    symbol_id,
                    period,
                    from_ms,
                    to_ms,
                });
            }
            MenuCommand::Ticks { symbol_id, days } => {
                let to_ms = Utc::now().timestamp_millis();
                let from_ms = to_ms.saturating_sub(days.saturating_mul(DAY_MS));
                self.prints.ticks = true;
                self.send_when_ready(move |account_id| BrokerCommand::TickData {
                    account_id,
                    symbol_id,
                    from_ms,
                    to_ms,
                });
            }
            MenuCommand::Order {
                symbol_id,
                side,
                lots,
                order_type,
            } => {
                let volume_units = menu::lots_to_units(lots);
                println!("Placing {order_type} {side} {lots} lots on symbol {symbol_id}");
                self.send_when_ready(move |account_id| BrokerCommand::NewOrder {
                    account_id,
                    symbol_id,
                    side,
                    volume_units,
                    order_type,
                });
            }
            MenuCommand::Close { position_id, lots } => self.close_position(position_id, lots)?,
            MenuCommand::Cancel(order_id) => {
                self.send_when_ready(move |account_id| BrokerCommand::CancelOrder {
                    account_id,
                    order_id,
                })
            }
            MenuCommand::OrderDetails(order_id) => {
                self.send_when_ready(move |account_id| BrokerCommand::OrderDetails {
                    account_id,
                    order_id,
                })
            }
            MenuCommand::DealOffsets(deal_id) => {
                self.send_when_ready(move |account_id| BrokerCommand::DealOffsetList {
                    account_id,
                    deal_id,
                })
            }
            MenuCommand::PositionOrders {
                position_id,
                from_ms,
                to_ms,
            } => {
                let from_ms = from_ms.unwrap_or(0);
                let to_ms = to_ms.unwrap_or_else(|| Utc::now().timestamp_millis());
                if from_ms > to_ms {
                    bail!("from ({from_ms}) is after to ({to_ms})");
                }
                self.send_when_ready(move |account_id| BrokerCommand::OrdersByPosition {
                    account_id,
                    position_id,
                    from_ms,
                    to_ms,
                });
            }
            MenuCommand::Pnl => {
                self.prints.pnl = true;
                self.send_when_ready(|account_id| BrokerCommand::UnrealizedPnl { account_id });
            }
            MenuCommand::Live => self.launch_live_dashboard()?,
            MenuCommand::Refresh => self.refresh_all(),
            MenuCommand::Trader => {
                self.prints.trader = true;
                self.send_when_ready(|account_id| BrokerCommand::Trader { account_id });
            }
            MenuCommand::Version => self.broker.send(BrokerCommand::Version),
        }
        Ok(())
    }

    fn switch_account(&mut self, account_id: AccountId) -> Result<()> {
        if self.session.accounts().next().is_some() && !self.session.is_listed(account_id) {
            bail!("account {account_id} is not available for this access token");
        }
        if self.session.select(account_id) {
            println!("Current account is now {account_id}");
            self.flush_ready();
            self.request_reconcile();
            return Ok(());
        }
        if self.session.begin_auth(account_id) {
            let access_token = self.settings.access_token.clone().unwrap_or_default();
            self.broker.send(BrokerCommand::AccountAuth {
                account_id,
                access_token,
            });
        } else if self.session.is_authorized(account_id) {
            self.broker.send(BrokerCommand::Reconcile { account_id });
        }
        println!("Authorizing account {account_id}…");
        Ok(())
    }

    pub(crate) fn print_accounts(&self) {
        let current = self.session.current();
        for account in self.session.accounts() {
            let marker = if Some(account.account_id) == current { "*" } else { " " };
            let kind = if account.is_live { "Live" } else { "Demo" };
            let balance = self
                .session
                .trader(account.account_id)
                .map(|t| format!(" balance {:.2}", t.balance))
                .unwrap_or_default();
            println!(
                "{marker} {} [{kind}] broker {} currency {}{balance}",
                account.account_id, account.broker, account.currency
            );
        }
    }

    fn print_prices(&self) {
        let mut quotes: Vec<_> = self.quotes.iter().collect();
        if quotes.is_empty() {
            println!("No prices yet; `subscribe <symbolId>` first");
            return;
        }
        quotes.sort_by_key(|(sid, _)| *sid);
        for (sid, q) in quotes {
            let name = self
                .symbols
                .get(&sid)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| format!("ID:{sid}"));
            println!("{name:<12} bid {} ask {}", q.bid, q.ask);
        }
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Idempotent; every step runs even if an earlier one failed.
    pub fn shutdown(&mut self, reason: &str) {
        if !self.shutdown.begin() {
            return;
        }
        info!("Shutting down: {reason}");
        shutdown::step("stop dashboard", || self.stop_dashboard());
        shutdown::step("abort timers", || {
            self.timers.abort_all();
            Ok(())
        });
        shutdown::step("unsubscribe", || self.unsubscribe_all());
        shutdown::step("logout", || self.logout());
        shutdown::step("stop transport", || self.broker.stop());
        shutdown::step("restore terminal", || {
            if self.terminal_touched {
                dashboard::force_restore()
            } else {
                Ok(())
            }
        });
    }

    fn unsubscribe_all(&mut self) -> Result<()> {
        if self.subscribed.is_empty() {
            return Ok(());
        }
        let account_id = self
            .session
            .current()
            .context("no active account to unsubscribe from")?;
        let symbol_ids: Vec<SymbolId> = std::mem::take(&mut self.subscribed).into_iter().collect();
        self.broker.send(BrokerCommand::UnsubscribeSpots {
            account_id,
            symbol_ids,
        });
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        if !self.connected {
            bail!("not connected");
        }
        let account_id = self.session.current().context("no active session")?;
        self.broker.send(BrokerCommand::AccountLogout { account_id });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Test hooks
    // -----------------------------------------------------------------------

    /// Dashboard state without a terminal or input thread.
    #[cfg(test)]
    pub(crate) fn activate_headless(&mut self) {
        self.activate();
    }

    #[cfg(test)]
    pub(crate) fn selected_for_test(&mut self) -> Option<PositionId> {
        self.selected_id()
    }
}
