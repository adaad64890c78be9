use crate::config::PORTFOLIO_SERIES;
use crate::horizon::TimeRange;
use crate::profiles::{SummaryRow, fmt_date, fmt_num, fmt_pct};
use crate::regression::summary_text;
use crate::view::{AnalysisView, window_label};
use std::fmt::Write;

const RULE_TOP: &str = "╔════════════════════════════════════════════════════════════════════╗";
const RULE_MID: &str = "╠════════════════════════════════════════════════════════════════════╣";
const RULE_BOTTOM: &str = "╚════════════════════════════════════════════════════════════════════╝";
const INNER_WIDTH: usize = 68;

fn boxed(out: &mut String, text: &str) {
    let clipped: String = text.chars().take(INNER_WIDTH - 2).collect();
    let _ = writeln!(out, "║ {:<width$} ║", clipped, width = INNER_WIDTH - 2);
}

fn last_value(values: Option<&[f64]>) -> Option<f64> {
    values.and_then(|v| v.last().copied())
}

/// Text block for `--report`: selection, latest portfolio values and the
/// factor regression.
pub fn format_analysis(view: &AnalysisView) -> String {
    let mut out = String::new();
    let p = &view.params;
    let _ = writeln!(out, "{}", RULE_TOP);
    boxed(&mut out, "Equity Risk & Factor Explorer");
    let _ = writeln!(out, "{}", RULE_MID);
    boxed(&mut out, &format!("Time range      : {}", p.range.label()));
    boxed(&mut out, &format!("Rolling window  : {}", window_label(p.window)));
    boxed(&mut out, &format!("Risk score      : {} / 10", p.score));
    boxed(&mut out, &format!("Portfolio mode  : {}", p.mode.label()));
    if let (Some(first), Some(last)) = (view.returns.first_date(), view.returns.last_date()) {
        boxed(
            &mut out,
            &format!("Return dates    : {} .. {} ({} rows)", first, last, view.returns.len()),
        );
    }
    let _ = writeln!(out, "{}", RULE_MID);
    boxed(&mut out, &view.title());
    for warning in &view.warnings {
        boxed(&mut out, &format!("! {}", warning));
    }
    let _ = writeln!(out, "{}", RULE_MID);
    boxed(&mut out, "Series      Cum. Return   Last Vol     Last Return");
    let _ = writeln!(out, "{}", RULE_MID);
    for name in view.plotted_series() {
        let cumulative = last_value(view.cumulative.column(&name)).map(|c| c - 1.0);
        let vol = view
            .volatility
            .column(&name)
            .and_then(|v| v.last().copied().flatten());
        let ret = last_value(view.returns.column(&name));
        let marker = if name == PORTFOLIO_SERIES { "*" } else { " " };
        boxed(
            &mut out,
            &format!(
                "{}{:<13} {:>10}   {:>10}   {:>10}",
                marker,
                name,
                fmt_pct(cumulative),
                fmt_pct(vol),
                fmt_pct(ret)
            ),
        );
    }
    let _ = writeln!(out, "{}", RULE_BOTTOM);
    let _ = writeln!(out);

    let _ = writeln!(out, "Fama-French 3-Factor Regression ({})", p.range.label());
    match &view.regression {
        Ok(result) => out.push_str(&summary_text(result)),
        Err(msg) => {
            let _ = writeln!(out, "{}", msg);
        }
    }
    out
}

/// Text table of per-ticker statistics over `range`.
pub fn format_profiles(rows: &[SummaryRow], range: TimeRange) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Stock Profiles & Key Stats ({})", range.label());
    let _ = writeln!(
        out,
        "{:<8} {:>12} {:>12} {:>12} {:>14} {:>13}",
        "Ticker",
        "Last Price",
        "As of",
        format!("Return ({})", range.label()),
        "Annualized Vol",
        "Max Drawdown"
    );
    let _ = writeln!(out, "{}", "─".repeat(76));
    for row in rows {
        let _ = writeln!(
            out,
            "{:<8} {:>12} {:>12} {:>12} {:>14} {:>13}",
            row.ticker,
            fmt_num(row.last_price),
            fmt_date(row.as_of),
            fmt_pct(row.horizon_return),
            fmt_pct(row.annualized_vol),
            fmt_pct(row.max_drawdown)
        );
    }
    out
}

pub fn print_report(analysis: &Result<AnalysisView, String>, profiles: &[SummaryRow], range: TimeRange) {
    match analysis {
        Ok(view) => println!("{}", format_analysis(view)),
        Err(msg) => println!("⚠  {}", msg),
    }
    println!();
    println!("{}", format_profiles(profiles, range));
}

pub fn print_prefetch(total: usize, failed: &[String]) {
    let mut out = String::new();
    let _ = writeln!(out, "{}", RULE_TOP);
    boxed(&mut out, "Price Cache Prefetch");
    let _ = writeln!(out, "{}", RULE_MID);
    boxed(&mut out, &format!("Tickers requested : {}", total));
    boxed(&mut out, &format!("Available         : {}", total - failed.len().min(total)));
    boxed(&mut out, &format!("Failed            : {}", failed.len()));
    if !failed.is_empty() {
        boxed(&mut out, &format!("  {}", failed.join(", ")));
    }
    let _ = writeln!(out, "{}", RULE_BOTTOM);
    println!("\n{}", out);
}
