use crate::config::PORTFOLIO_SERIES;
use crate::factors::FactorTable;
use crate::horizon::TimeRange;
use crate::portfolio::{MAX_RISK_SCORE, MIN_RISK_SCORE};
use crate::profiles::SummaryRow;
use crate::table::PriceTable;
use crate::view::{AnalysisParams, AnalysisView, build_analysis, build_profiles, next_window, user_message};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use std::io;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tab {
    Analysis,
    Profiles,
}

impl Tab {
    pub const TITLES: [&'static str; 2] = ["Analysis", "Stock Profiles"];

    pub fn index(self) -> usize {
        match self {
            Tab::Analysis => 0,
            Tab::Profiles => 1,
        }
    }

    fn toggle(self) -> Self {
        match self {
            Tab::Analysis => Tab::Profiles,
            Tab::Profiles => Tab::Analysis,
        }
    }
}

pub struct App {
    pub should_quit: bool,
    pub tab: Tab,
    pub prices: PriceTable,
    pub factors: Option<FactorTable>,
    pub params: AnalysisParams,
    pub profile_range: TimeRange,
    /// Highlighted row of the series list.
    pub series_cursor: usize,
    pub regression_scroll: u16,
    /// Load-time messages, e.g. tickers that could not be loaded.
    pub notices: Vec<String>,
    pub analysis: Result<AnalysisView, String>,
    pub profiles: Vec<SummaryRow>,
}

impl App {
    pub fn new(
        prices: PriceTable,
        factors: Option<FactorTable>,
        params: AnalysisParams,
        profile_range: TimeRange,
        notices: Vec<String>,
    ) -> Self {
        let mut app = Self {
            should_quit: false,
            tab: Tab::Analysis,
            prices,
            factors,
            params,
            profile_range,
            series_cursor: 0,
            regression_scroll: 0,
            notices,
            analysis: Err(String::new()),
            profiles: Vec::new(),
        };
        app.refresh_analysis();
        app.refresh_profiles();
        app
    }

    /// Every loaded ticker plus the portfolio series.
    pub fn selectable_series(&self) -> Vec<String> {
        self.prices
            .names
            .iter()
            .cloned()
            .chain(std::iter::once(PORTFOLIO_SERIES.to_string()))
            .collect()
    }

    pub fn is_selected(&self, series: &str) -> bool {
        self.params.series.iter().any(|s| s == series)
    }

    pub fn refresh_analysis(&mut self) {
        self.regression_scroll = 0;
        self.analysis = build_analysis(&self.prices, self.factors.as_ref(), &self.params)
            .map_err(|e| user_message(&e));
    }

    pub fn refresh_profiles(&mut self) {
        self.profiles = build_profiles(&self.prices, self.profile_range);
    }

    fn toggle_series(&mut self) {
        let Some(name) = self.selectable_series().get(self.series_cursor).cloned() else {
            return;
        };
        if let Some(pos) = self.params.series.iter().position(|s| *s == name) {
            self.params.series.remove(pos);
        } else {
            self.params.series.push(name);
        }
    }

    /// Applies one key press; returns `true` when the analysis view changed.
    pub fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
                return false;
            }
            KeyCode::Tab | KeyCode::BackTab => {
                self.tab = self.tab.toggle();
                return false;
            }
            _ => {}
        }

        match self.tab {
            Tab::Profiles => {
                if matches!(code, KeyCode::Char('t') | KeyCode::Char('p')) {
                    self.profile_range = self.profile_range.next();
                    self.refresh_profiles();
                }
                false
            }
            Tab::Analysis => {
                match code {
                    KeyCode::Char('t') => self.params.range = self.params.range.next(),
                    KeyCode::Char('p') => {
                        self.profile_range = self.profile_range.next();
                        self.refresh_profiles();
                        return false;
                    }
                    KeyCode::Char('w') => self.params.window = next_window(self.params.window),
                    KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Right => {
                        if self.params.score >= MAX_RISK_SCORE {
                            return false;
                        }
                        self.params.score += 1;
                    }
                    KeyCode::Char('-') | KeyCode::Left => {
                        if self.params.score <= MIN_RISK_SCORE {
                            return false;
                        }
                        self.params.score -= 1;
                    }
                    KeyCode::Char('m') => self.params.mode = self.params.mode.toggle(),
                    KeyCode::Char(' ') | KeyCode::Enter => self.toggle_series(),
                    KeyCode::Up | KeyCode::Char('k') => {
                        self.series_cursor = self.series_cursor.saturating_sub(1);
                        return false;
                    }
                    KeyCode::Down | KeyCode::Char('j') => {
                        let last = self.selectable_series().len().saturating_sub(1);
                        self.series_cursor = (self.series_cursor + 1).min(last);
                        return false;
                    }
                    KeyCode::PageDown => {
                        self.regression_scroll = self.regression_scroll.saturating_add(5);
                        return false;
                    }
                    KeyCode::PageUp => {
                        self.regression_scroll = self.regression_scroll.saturating_sub(5);
                        return false;
                    }
                    _ => return false,
                }
                self.refresh_analysis();
                info!(
                    "Analysis: range={}, window={}, score={}, mode={}",
                    self.params.range,
                    self.params.window,
                    self.params.score,
                    self.params.mode.label()
                );
                true
            }
        }
    }

    pub fn run(&mut self, terminal: &mut crate::tui::Tui) -> io::Result<()> {
        while !self.should_quit {
            terminal.draw(|f| crate::ui::render(f, self))?;

            if event::poll(std::time::Duration::from_millis(16))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key.code);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::RiskMode;

    fn app() -> App {
        let prices = crate::data::new_mock(&["AAPL", "AMZN", "GOOG", "META", "MSFT", "SP500"], 90);
        App::new(prices, None, AnalysisParams::default(), TimeRange::SixMonths, Vec::new())
    }

    #[test]
    fn test_initial_state_has_portfolio_view() {
        let app = app();
        let view = app.analysis.as_ref().unwrap();
        assert_eq!(view.selection.tickers.len(), 5);
        assert_eq!(app.profiles.len(), 6);
        assert_eq!(app.selectable_series().last().map(String::as_str), Some(PORTFOLIO_SERIES));
    }

    #[test]
    fn test_score_is_clamped() {
        let mut app = app();
        app.params.score = MAX_RISK_SCORE;
        assert!(!app.handle_key(KeyCode::Char('+')));
        assert_eq!(app.params.score, MAX_RISK_SCORE);
        assert!(app.handle_key(KeyCode::Char('-')));
        assert_eq!(app.params.score, MAX_RISK_SCORE - 1);
    }

    #[test]
    fn test_static_basket_without_data_reports_error() {
        let mut app = app();
        // Basket 1 (JNJ, PG, KO, WMT, PEP) has no loaded tickers.
        app.params.score = 2;
        app.handle_key(KeyCode::Char('-'));
        assert_eq!(
            app.analysis.as_ref().unwrap_err(),
            "None of the tickers in this risk portfolio have data for the selected time range."
        );
    }

    #[test]
    fn test_mode_toggle_and_series_selection() {
        let mut app = app();
        app.handle_key(KeyCode::Char('m'));
        assert_eq!(app.params.mode, RiskMode::Volatility);

        // Five tickers ex-SP500 into ten buckets: score 5 is the last filled one.
        let view = app.analysis.as_ref().unwrap();
        assert_eq!(view.selection.tickers.len(), 1);

        app.series_cursor = 0;
        app.handle_key(KeyCode::Char(' '));
        assert!(app.is_selected("AAPL"));
        app.handle_key(KeyCode::Char(' '));
        assert!(!app.is_selected("AAPL"));
    }

    #[test]
    fn test_tabs_and_quit() {
        let mut app = app();
        app.handle_key(KeyCode::Tab);
        assert_eq!(app.tab, Tab::Profiles);
        app.handle_key(KeyCode::Char('t'));
        assert_eq!(app.profile_range, TimeRange::OneYear);
        app.handle_key(KeyCode::Char('q'));
        assert!(app.should_quit);
    }
}
