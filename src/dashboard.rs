/// dashboard.rs – ratatui live positions dashboard.
///
/// Layout:
///  ┌─ Header ──────────────────────────────────────────────────────────┐
///  │ account │ currency │ positions │ broker link status               │
///  ├─ Open Positions ──────────────────────────────────────────────────┤
///  │ PnL-sorted, scrolled table of positions + TOTAL row               │
///  └───────────────────────────────────────────────────────────────────┘
///    latest notices
///    stop-loss prompt (armed / typing)
///    key help
///
/// Table materialization is split from drawing: [`build_table`] is pure and
/// testable, [`render`] only lays out what it produced.
use std::collections::HashMap;
use std::io::{self, Stdout};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use crossterm::{
    cursor::{Hide, Show},
    execute,
    terminal::{disable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table},
    Frame, Terminal,
};

use crate::models::{Position, PositionId, Side, SymbolId, SymbolInfo};
use crate::pnl::{compute_pnl, exit_price, running_total, Pnl, PnlSource, QuoteBook};
use crate::stop_loss::StopLossMonitor;
use crate::store::PositionStore;
use crate::viewport::Viewport;

pub type CrossTerm = Terminal<CrosstermBackend<Stdout>>;

// ---------------------------------------------------------------------------
// Setup / teardown
// ---------------------------------------------------------------------------

/// Enter the alternate screen. Raw mode is owned by the input thread.
pub fn setup_terminal() -> Result<CrossTerm> {
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, Hide)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

pub fn restore_terminal(terminal: &mut CrossTerm) -> Result<()> {
    execute!(terminal.backend_mut(), LeaveAlternateScreen, Show)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Last-resort reset used at shutdown when no terminal handle is left.
pub fn force_restore() -> Result<()> {
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen, Show)?;
    Ok(())
}

/// Rows available for positions: `max(1, height - reserved)`.
pub fn row_budget(height: u16, reserved_rows: u16) -> usize {
    usize::from(height.saturating_sub(reserved_rows)).max(1)
}

// ---------------------------------------------------------------------------
// Table materialization
// ---------------------------------------------------------------------------

/// Read-only state a table is built from.
pub struct Sources<'a> {
    pub store: &'a PositionStore,
    pub symbols: &'a HashMap<SymbolId, SymbolInfo>,
    pub quotes: &'a QuoteBook,
    pub stops: &'a StopLossMonitor,
}

impl Sources<'_> {
    fn pnl_of(&self, position: &Position) -> Option<Pnl> {
        compute_pnl(
            position,
            self.symbols.get(&position.symbol_id),
            self.quotes.get(position.symbol_id),
            self.store.pnl(position.position_id),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowView {
    pub position_id: PositionId,
    pub symbol: String,
    pub side: Side,
    pub held_for: String,
    pub opened_utc: String,
    pub lots: f64,
    pub entry: f64,
    pub market: Option<f64>,
    pub stop_loss: Option<f64>,
    pub pnl: Option<Pnl>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableRow {
    Position { selected: bool, row: RowView },
    Broken { selected: bool, position_id: PositionId, message: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableView {
    pub rows: Vec<TableRow>,
    /// Over every position, not just the visible slice.
    pub total: f64,
    pub count: usize,
    /// Per-row failures, for the notice log.
    pub errors: Vec<String>,
}

pub fn format_held(elapsed: chrono::Duration) -> String {
    let minutes = elapsed.num_minutes().max(0);
    let (hours, mins) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{mins}m")
    }
}

pub fn row_view(position: &Position, src: &Sources, now: DateTime<Utc>) -> Result<RowView> {
    let id = position.position_id;
    if position.open_timestamp <= 0 {
        bail!("position {id}: missing open time");
    }
    let opened = position
        .opened_at()
        .with_context(|| format!("position {id}: invalid open time {}", position.open_timestamp))?;
    if !position.entry_price.is_finite() {
        bail!("position {id}: missing entry price");
    }
    let symbol = src
        .symbols
        .get(&position.symbol_id)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| format!("ID:{}", position.symbol_id));

    Ok(RowView {
        position_id: id,
        symbol,
        side: position.side,
        held_for: format_held(now - opened),
        opened_utc: opened.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        lots: position.lots(),
        entry: position.entry_price,
        market: src
            .quotes
            .get(position.symbol_id)
            .map(|q| exit_price(position.side, q)),
        stop_loss: src.stops.get(id),
        pnl: src.pnl_of(position),
    })
}

/// Materialize the visible slice of `ordered` plus the running total. A row
/// that fails is rendered as a placeholder; the others are unaffected.
pub fn build_table(
    ordered: &[PositionId],
    src: &Sources,
    viewport: Viewport,
    budget: usize,
    now: DateTime<Utc>,
) -> TableView {
    let total = running_total(
        ordered
            .iter()
            .filter_map(|id| src.store.get(*id))
            .map(|p| src.pnl_of(p).map(|pnl| pnl.value)),
    );

    let mut view = TableView {
        total,
        count: ordered.len(),
        ..TableView::default()
    };
    for index in viewport.visible(ordered.len(), budget) {
        let id = ordered[index];
        let selected = index == viewport.selected;
        let Some(position) = src.store.get(id) else {
            continue;
        };
        match row_view(position, src, now) {
            Ok(row) => view.rows.push(TableRow::Position { selected, row }),
            Err(e) => {
                let message = format!("{e:#}");
                view.errors.push(message.clone());
                view.rows.push(TableRow::Broken {
                    selected,
                    position_id: id,
                    message,
                });
            }
        }
    }
    view
}

// ---------------------------------------------------------------------------
// Render
// ---------------------------------------------------------------------------

pub struct Screen<'a> {
    pub table: &'a TableView,
    pub account: Option<i64>,
    pub currency: &'a str,
    pub connected: bool,
    pub notices: Vec<&'a String>,
    pub prompt: Option<String>,
    pub details: Option<RowView>,
}

const HELP: &str = "j/k move  y set SL  x close  Enter details  q back to menu";

pub fn render(frame: &mut Frame, screen: &Screen) {
    let area = frame.size();
    let footer_lines = screen.notices.len() + usize::from(screen.prompt.is_some()) + 1;

    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(footer_lines as u16),
        ])
        .split(area);

    render_header(frame, outer[0], screen);
    render_positions(frame, outer[1], screen);
    render_footer(frame, outer[2], screen);

    if let Some(details) = &screen.details {
        render_details(frame, outer[1], details, screen.currency);
    }
}

fn render_header(frame: &mut Frame, area: Rect, screen: &Screen) {
    let link = if screen.connected {
        Span::styled("● connected", Style::default().fg(Color::Green))
    } else {
        Span::styled("○ reconnecting", Style::default().fg(Color::Red))
    };
    let account = screen
        .account
        .map(|a| a.to_string())
        .unwrap_or_else(|| "—".into());
    let line = Line::from(vec![
        Span::styled(
            " Live PnL ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("│ Account {account} │ {} │ ", screen.currency)),
        Span::raw(format!("{} open │ ", screen.table.count)),
        link,
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

fn pnl_color(value: f64) -> Color {
    if value >= 0.0 {
        Color::Green
    } else {
        Color::Red
    }
}

fn render_positions(frame: &mut Frame, area: Rect, screen: &Screen) {
    let header_cells = [
        "Position ID", "Symbol", "Side", "Held For", "Lots", "Entry", "Market", "SL", "PnL",
    ]
    .iter()
    .map(|h| Cell::from(*h).style(Style::default().add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let mut rows: Vec<Row> = screen
        .table
        .rows
        .iter()
        .map(|table_row| match table_row {
            TableRow::Position { selected, row } => position_row(*selected, row),
            TableRow::Broken {
                selected,
                position_id,
                message,
            } => {
                let mut cells = vec![Cell::from(marked(*selected, *position_id))];
                cells.push(
                    Cell::from(format!("⚠ {message}")).style(Style::default().fg(Color::Yellow)),
                );
                cells.extend((0..7).map(|_| Cell::from("")));
                highlight(Row::new(cells), *selected)
            }
        })
        .collect();

    let total = screen.table.total;
    rows.push(Row::new(vec![
        Cell::from(""),
        Cell::from(""),
        Cell::from(""),
        Cell::from(""),
        Cell::from(""),
        Cell::from(""),
        Cell::from(""),
        Cell::from("TOTAL").style(Style::default().add_modifier(Modifier::BOLD)),
        Cell::from(format!("{total:+.2}")).style(
            Style::default()
                .fg(pnl_color(total))
                .add_modifier(Modifier::BOLD),
        ),
    ]));

    let table = Table::new(
        rows,
        [
            Constraint::Length(14),
            Constraint::Length(10),
            Constraint::Length(5),
            Constraint::Length(9),
            Constraint::Length(6),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(8),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Open Positions ({}) ", screen.table.count)),
    );

    frame.render_widget(table, area);
}

fn marked(selected: bool, position_id: PositionId) -> String {
    if selected {
        format!("▶ {position_id}")
    } else {
        format!("  {position_id}")
    }
}

fn highlight(row: Row<'_>, selected: bool) -> Row<'_> {
    if selected {
        row.style(Style::default().add_modifier(Modifier::REVERSED))
    } else {
        row
    }
}

fn position_row(selected: bool, row: &RowView) -> Row<'static> {
    let side_color = match row.side {
        Side::Buy => Color::Green,
        Side::Sell => Color::Red,
    };
    let pnl_cell = match row.pnl {
        Some(pnl) => Cell::from(format!("{:+.2}", pnl.value)).style(
            Style::default()
                .fg(pnl_color(pnl.value))
                .add_modifier(Modifier::BOLD),
        ),
        None => Cell::from("N/A").style(Style::default().fg(Color::DarkGray)),
    };
    let cells = vec![
        Cell::from(marked(selected, row.position_id)),
        Cell::from(row.symbol.clone()),
        Cell::from(row.side.as_str()).style(Style::default().fg(side_color)),
        Cell::from(row.held_for.clone()),
        Cell::from(format!("{:.2}", row.lots)),
        Cell::from(format!("{}", row.entry)),
        Cell::from(
            row.market
                .map(|m| format!("{m}"))
                .unwrap_or_else(|| "pending".into()),
        ),
        Cell::from(
            row.stop_loss
                .map(|sl| format!("{sl:.2}"))
                .unwrap_or_else(|| "-".into()),
        )
        .style(Style::default().fg(Color::Red)),
        pnl_cell,
    ];
    highlight(Row::new(cells), selected)
}

fn render_footer(frame: &mut Frame, area: Rect, screen: &Screen) {
    let mut lines: Vec<Line> = screen
        .notices
        .iter()
        .map(|n| Line::from(Span::styled(n.as_str(), Style::default().fg(Color::Red))))
        .collect();
    if let Some(prompt) = &screen.prompt {
        lines.push(Line::from(Span::styled(
            prompt.clone(),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )));
    }
    lines.push(Line::from(Span::styled(
        HELP,
        Style::default().fg(Color::DarkGray),
    )));
    frame.render_widget(Paragraph::new(lines), area);
}

fn render_details(frame: &mut Frame, within: Rect, row: &RowView, currency: &str) {
    let width = within.width.min(60);
    let height = within.height.min(10);
    let area = Rect {
        x: within.x + (within.width - width) / 2,
        y: within.y + (within.height - height) / 2,
        width,
        height,
    };
    let source = match row.pnl.map(|p| p.source) {
        Some(PnlSource::Broker) => "broker",
        Some(PnlSource::Local) => "local",
        None => "unknown",
    };
    let lines = vec![
        Line::from(format!("Symbol:  {}", row.symbol)),
        Line::from(format!("Side:    {}", row.side)),
        Line::from(format!("Lots:    {:.2}", row.lots)),
        Line::from(format!("Entry:   {}", row.entry)),
        Line::from(format!(
            "Market:  {}",
            row.market
                .map(|m| m.to_string())
                .unwrap_or_else(|| "pending".into())
        )),
        Line::from(format!(
            "PnL:     {} {currency} ({source})",
            row.pnl
                .map(|p| format!("{:+.2}", p.value))
                .unwrap_or_else(|| "N/A".into())
        )),
        Line::from(format!("Opened:  {}", row.opened_utc)),
    ];
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Position {} ", row.position_id)),
        ),
        area,
    );
}
