// src/tui/view.rs

use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Cell, List, ListItem, ListState, Paragraph, Row, Table},
    Frame,
};

use crate::display_log::DisplayRow;
use crate::session::Monitor;
use crate::tui::app::{App, Focus};

const DATA_HEADERS: [&str; 8] = ["D0", "D1", "D2", "D3", "D4", "D5", "D6", "D7"];

/// Draw the whole screen.
pub fn render(frame: &mut Frame, app: &App, monitor: &Monitor) {
    frame.render_widget(Block::default().style(app.theme.base()), frame.area());

    let [main, status] =
        Layout::vertical([Constraint::Min(8), Constraint::Length(1)]).areas(frame.area());
    let [filter, right] =
        Layout::horizontal([Constraint::Length(28), Constraint::Min(40)]).areas(main);
    let [screen, transmit] =
        Layout::vertical([Constraint::Min(5), Constraint::Length(3)]).areas(right);

    render_filter_pane(frame, app, monitor, filter);
    render_screen_pane(frame, app, monitor, screen);
    render_transmit_pane(frame, app, transmit);
    render_status_bar(frame, app, monitor, status);
}

fn pane<'a>(app: &App, title: &'a str, focused: bool) -> Block<'a> {
    let colour = if focused {
        app.theme.focused_border()
    } else {
        app.theme.border()
    };
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(colour))
}

fn input<'a>(app: &App, title: &'a str, text: &'a str, focused: bool) -> Paragraph<'a> {
    let cursor = if focused { "_" } else { "" };
    Paragraph::new(Line::from(vec![Span::raw(text), Span::raw(cursor)]))
        .block(pane(app, title, focused))
}

fn render_filter_pane(frame: &mut Frame, app: &App, monitor: &Monitor, area: Rect) {
    let [field, list, hint] = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(3),
        Constraint::Length(1),
    ])
    .areas(area);

    frame.render_widget(
        input(app, " Filter ID ", &app.filter_input, app.focus == Focus::FilterInput),
        field,
    );

    let items: Vec<ListItem> = monitor
        .filter()
        .entries()
        .into_iter()
        .map(|entry| {
            let mark = if entry.enabled { "[x]" } else { "[ ]" };
            ListItem::new(format!("{} {}", mark, entry.label))
        })
        .collect();

    let focused = app.focus == Focus::FilterList;
    let list_widget = List::new(items)
        .block(pane(app, " Filters ", focused))
        .highlight_style(app.theme.selected());
    let mut state = ListState::default();
    if focused {
        state.select(Some(app.selected_filter));
    }
    frame.render_stateful_widget(list_widget, list, &mut state);

    frame.render_widget(
        Paragraph::new(" Space:toggle  c:Clear All").style(app.theme.dim()),
        hint,
    );
}

fn render_screen_pane(frame: &mut Frame, app: &App, monitor: &Monitor, area: Rect) {
    let mut header_cells = vec![
        Cell::from("Timestamp"),
        Cell::from("ID"),
        Cell::from("Len"),
    ];
    header_cells.extend(DATA_HEADERS.iter().map(|h| Cell::from(*h)));
    let header = Row::new(header_cells).style(app.theme.header()).height(1);

    // Borders and header take three lines
    let capacity = area.height.saturating_sub(3) as usize;
    let rows: Vec<Row> = monitor
        .log()
        .tail_visible(capacity)
        .iter()
        .map(screen_line)
        .collect();

    let mut widths = vec![
        Constraint::Length(10),
        Constraint::Length(12),
        Constraint::Length(4),
    ];
    widths.extend([Constraint::Length(4); 8]);

    let table = Table::new(rows, widths)
        .header(header)
        .block(pane(app, " Screen ", app.focus == Focus::Screen));
    frame.render_widget(table, area);
}

fn screen_line(row: &DisplayRow) -> Row<'static> {
    let rendered = &row.rendered;
    let mut cells = vec![
        Cell::from(rendered.timestamp.clone()),
        Cell::from(rendered.identifier.clone()),
        Cell::from(rendered.length.clone()),
    ];
    cells.extend(rendered.data.iter().map(|d| Cell::from(d.clone())));
    Row::new(cells)
}

fn render_transmit_pane(frame: &mut Frame, app: &App, area: Rect) {
    let [id, data] =
        Layout::horizontal([Constraint::Length(16), Constraint::Min(20)]).areas(area);
    frame.render_widget(
        input(app, " ID ", &app.tx_id, app.focus == Focus::TransmitId),
        id,
    );
    frame.render_widget(
        input(app, " Data (Enter to send) ", &app.tx_data, app.focus == Focus::TransmitData),
        data,
    );
}

fn render_status_bar(frame: &mut Frame, app: &App, monitor: &Monitor, area: Rect) {
    let log = monitor.log();
    let summary = format!(
        " {} | {:?} / {:?} | {} rows ({} shown) ",
        monitor.device(),
        monitor.run_state(),
        monitor.worker_state(),
        log.len(),
        log.visible_count()
    );

    let mut spans = vec![Span::styled(summary, app.theme.dim())];
    let dropped = monitor.dropped_frames();
    if dropped > 0 {
        spans.push(Span::styled(
            format!("| {} dropped ", dropped),
            app.theme.error(),
        ));
    }
    if let Some(ref message) = app.status {
        let style = if app.status_is_error {
            app.theme.error()
        } else {
            Style::default()
        };
        spans.push(Span::styled(format!("| {} ", message), style));
    }
    spans.push(Span::styled(
        "| p:pause r:resume c:clear d:theme Tab:focus q:quit",
        app.theme.dim(),
    ));

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
