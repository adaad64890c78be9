use crate::app::{App, Tab};
use crate::config::PORTFOLIO_SERIES;
use crate::profiles::{fmt_date, fmt_num, fmt_pct};
use crate::regression::summary_text;
use crate::table::DatedTable;
use crate::view::{AnalysisView, window_label};
use chrono::{Datelike, NaiveDate};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, Block, Borders, Cell, Chart, Dataset, GraphType, List, ListItem, ListState, Paragraph,
        Row, Table, Tabs, Wrap,
    },
};

const PALETTE: [Color; 8] = [
    Color::Yellow,
    Color::Green,
    Color::Magenta,
    Color::Blue,
    Color::Red,
    Color::LightCyan,
    Color::LightGreen,
    Color::LightMagenta,
];

pub fn render(f: &mut Frame, app: &App) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.area());

    render_header(f, app, layout[0]);

    match app.tab {
        Tab::Analysis => render_analysis(f, app, layout[1]),
        Tab::Profiles => render_profiles(f, app, layout[1]),
    }

    render_footer(f, app, layout[2]);
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(36), Constraint::Min(0)])
        .split(area);

    let title = Paragraph::new(Line::from(vec![Span::styled(
        " Equity Risk & Factor Explorer ",
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )]))
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, chunks[0]);

    let tabs = Tabs::new(Tab::TITLES.to_vec())
        .select(app.tab.index())
        .style(Style::default().fg(Color::Gray))
        .highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(tabs, chunks[1]);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let hint = match app.tab {
        Tab::Analysis => {
            "Tab: profiles | t: range | w: window | +/-: score | m: mode | ↑↓ space: series | PgUp/PgDn: regression | q: quit"
        }
        Tab::Profiles => "Tab: analysis | t: stats range | q: quit",
    };

    let footer = Paragraph::new(Line::from(vec![
        Span::styled(" Controls: ", Style::default().fg(Color::Gray)),
        Span::styled(hint, Style::default().fg(Color::White)),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(footer, area);
}

// ──────────────────────────────────────────────────────────────────────────────
// Analysis Tab
// ──────────────────────────────────────────────────────────────────────────────

fn render_analysis(f: &mut Frame, app: &App, area: Rect) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(34), Constraint::Min(0)])
        .split(area);

    render_sidebar(f, app, columns[0]);

    match &app.analysis {
        Ok(view) => render_view(f, app, view, columns[1]),
        Err(msg) => {
            let warning = Paragraph::new(msg.as_str())
                .style(Style::default().fg(Color::Red))
                .wrap(Wrap { trim: true })
                .block(Block::default().borders(Borders::ALL).title(" Warning "));
            f.render_widget(warning, columns[1]);
        }
    }
}

fn render_sidebar(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(10), Constraint::Min(0)])
        .split(area);

    let label = Style::default().fg(Color::Gray);
    let value = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
    let controls = vec![
        Line::from(vec![Span::styled("Time range:  ", label), Span::styled(app.params.range.label(), value)]),
        Line::from(Span::styled("Rolling volatility window:", label)),
        Line::from(Span::styled(format!("  {}", window_label(app.params.window)), value)),
        Line::from(vec![
            Span::styled("Risk score:  ", label),
            Span::styled(format!("{} / 10", app.params.score), value),
        ]),
        Line::from(Span::styled("Portfolio mode:", label)),
        Line::from(Span::styled(format!("  {}", app.params.mode.label()), value)),
        Line::from(""),
        Line::from(Span::styled("1 = lowest risk, 10 = highest", Style::default().fg(Color::DarkGray))),
    ];
    let controls = Paragraph::new(controls)
        .block(Block::default().borders(Borders::ALL).title(" Time horizon & risk "));
    f.render_widget(controls, chunks[0]);

    let items: Vec<ListItem> = app
        .selectable_series()
        .into_iter()
        .map(|name| {
            let mark = if app.is_selected(&name) { "[x] " } else { "[ ] " };
            let style = if name == PORTFOLIO_SERIES {
                Style::default().fg(Color::Cyan)
            } else {
                Style::default().fg(Color::White)
            };
            ListItem::new(Line::from(vec![Span::raw(mark), Span::styled(name, style)]))
        })
        .collect();
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(" Display series "))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");
    let mut state = ListState::default().with_selected(Some(app.series_cursor));
    f.render_stateful_widget(list, chunks[1], &mut state);
}

fn render_view(f: &mut Frame, app: &App, view: &AnalysisView, area: Rect) {
    let mut messages: Vec<Line> = app
        .notices
        .iter()
        .map(|n| Line::from(Span::styled(n.as_str(), Style::default().fg(Color::Blue))))
        .collect();
    messages.extend(
        view.warnings
            .iter()
            .map(|w| Line::from(Span::styled(w.as_str(), Style::default().fg(Color::Yellow)))),
    );

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(messages.len() as u16 + 3),
            Constraint::Min(12),
            Constraint::Length(14),
        ])
        .split(area);

    let mut heading = vec![Line::from(Span::styled(
        view.title(),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    ))];
    heading.extend(messages);
    let heading = Paragraph::new(heading)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title(" Portfolio "));
    f.render_widget(heading, chunks[0]);

    let series = view.plotted_series();
    if series.is_empty() {
        let empty = Paragraph::new("No portfolios selected to plot.")
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Yellow))
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(empty, chunks[1]);
    } else {
        let charts = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Ratio(1, 3),
                Constraint::Ratio(1, 3),
                Constraint::Ratio(1, 3),
            ])
            .split(chunks[1]);
        let range = view.params.range.label();

        let cumulative = chart_lines(&view.cumulative, &series, Some);
        render_line_chart(f, charts[0], &format!("Cumulative Return ({})", range), "Growth", &cumulative);

        let volatility = chart_lines(&view.volatility, &series, |v| v);
        render_line_chart(
            f,
            charts[1],
            &format!("Rolling Volatility ({})", window_label(view.params.window)),
            "Std. Dev.",
            &volatility,
        );

        let returns = chart_lines(&view.returns, &series, Some);
        render_line_chart(f, charts[2], &format!("Daily Returns ({})", range), "Return", &returns);
    }

    render_regression(f, app, view, chunks[2]);
}

fn render_regression(f: &mut Frame, app: &App, view: &AnalysisView, area: Rect) {
    let title = format!(" Fama-French 3-Factor Regression ({}) ", view.params.range.label());
    let block = Block::default().borders(Borders::ALL).title(title);
    let widget = match &view.regression {
        Ok(result) => Paragraph::new(summary_text(result))
            .style(Style::default().fg(Color::White))
            .scroll((app.regression_scroll, 0)),
        Err(msg) => Paragraph::new(msg.as_str()).style(Style::default().fg(Color::Yellow)),
    };
    f.render_widget(widget.block(block), area);
}

// ──────────────────────────────────────────────────────────────────────────────
// Charts
// ──────────────────────────────────────────────────────────────────────────────

struct ChartLine {
    name: String,
    points: Vec<(f64, f64)>,
}

fn day_number(date: NaiveDate) -> f64 {
    date.num_days_from_ce() as f64
}

/// One line per requested series; undefined values are skipped.
fn chart_lines<T: Copy>(
    table: &DatedTable<T>,
    series: &[String],
    value: impl Fn(T) -> Option<f64>,
) -> Vec<ChartLine> {
    series
        .iter()
        .filter_map(|name| {
            let column = table.column(name)?;
            let points = table
                .dates
                .iter()
                .zip(column)
                .filter_map(|(d, v)| value(*v).filter(|v| v.is_finite()).map(|v| (day_number(*d), v)))
                .collect();
            Some(ChartLine {
                name: name.clone(),
                points,
            })
        })
        .collect()
}

fn render_line_chart(f: &mut Frame, area: Rect, title: &str, y_title: &str, lines: &[ChartLine]) {
    let block = Block::default()
        .title(Span::styled(
            format!(" {} ", title),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL);

    let all = lines.iter().flat_map(|l| l.points.iter());
    let (mut x_min, mut x_max, mut y_min, mut y_max) =
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
    for (x, y) in all {
        x_min = x_min.min(*x);
        x_max = x_max.max(*x);
        y_min = y_min.min(*y);
        y_max = y_max.max(*y);
    }
    if !x_min.is_finite() || !y_min.is_finite() {
        let empty = Paragraph::new("No data in range.")
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(empty, area);
        return;
    }
    if y_max - y_min < 1e-12 {
        let pad = (y_max.abs() * 0.05).max(1e-6);
        y_min -= pad;
        y_max += pad;
    }
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }

    let datasets: Vec<Dataset> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let color = if line.name == PORTFOLIO_SERIES {
                Color::Cyan
            } else {
                PALETTE[i % PALETTE.len()]
            };
            Dataset::default()
                .name(line.name.as_str())
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(color))
                .data(&line.points)
        })
        .collect();

    let date_label = |x: f64| {
        NaiveDate::from_num_days_from_ce_opt(x as i32)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    };
    let gray = Style::default().fg(Color::Gray);

    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(
            Axis::default()
                .style(gray)
                .bounds([x_min, x_max])
                .labels(vec![
                    Span::styled(date_label(x_min), gray),
                    Span::styled(date_label((x_min + x_max) / 2.0), gray),
                    Span::styled(date_label(x_max), gray),
                ]),
        )
        .y_axis(
            Axis::default()
                .title(y_title)
                .style(gray)
                .bounds([y_min, y_max])
                .labels(vec![
                    Span::styled(format!("{:.3}", y_min), gray),
                    Span::styled(format!("{:.3}", y_max), gray),
                ]),
        );

    f.render_widget(chart, area);
}

// ──────────────────────────────────────────────────────────────────────────────
// Profiles Tab
// ──────────────────────────────────────────────────────────────────────────────

fn render_profiles(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let range = app.profile_range.label();
    let caption = Paragraph::new(Line::from(vec![
        Span::styled("Stats time range: ", Style::default().fg(Color::Gray)),
        Span::styled(range, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Span::styled(
            "  (Return, Annualized Volatility and Max Drawdown use this range)",
            Style::default().fg(Color::DarkGray),
        ),
    ]))
    .block(Block::default().borders(Borders::ALL).title(" Stock Profiles & Key Stats "));
    f.render_widget(caption, chunks[0]);

    let header = Row::new(vec![
        Cell::from("Ticker"),
        Cell::from("Last Price"),
        Cell::from("As of"),
        Cell::from(format!("Return ({})", range)),
        Cell::from("Annualized Vol"),
        Cell::from("Max Drawdown"),
    ])
    .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = app
        .profiles
        .iter()
        .map(|row| {
            let ret_color = match row.horizon_return {
                Some(r) if r < 0.0 => Color::Red,
                Some(_) => Color::Green,
                None => Color::Gray,
            };
            Row::new(vec![
                Cell::from(row.ticker.clone()),
                Cell::from(fmt_num(row.last_price)),
                Cell::from(fmt_date(row.as_of)),
                Cell::from(fmt_pct(row.horizon_return)).style(Style::default().fg(ret_color)),
                Cell::from(fmt_pct(row.annualized_vol)),
                Cell::from(fmt_pct(row.max_drawdown)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(8),
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Length(14),
            Constraint::Length(16),
            Constraint::Length(14),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(table, chunks[1]);
}
