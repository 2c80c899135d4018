use crate::entry_check::{self, PositionStatus, ReadyEntryReport};
use crate::indicators::{IndicatorSnapshot, MacdTrend};
use crate::prediction_check::{self, PredictionOutcome, PredictionReport};
use crate::storage_utils::AsyncStorageManager;
use crate::trade_plans::{self, TradePlanReport};
use anyhow::Result;
use chrono::{DateTime, TimeDelta};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};
use tracing::warn;

const MAX_ROWS: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Plans,
    Entries,
    Predictions,
}

fn get_visibility_ratio(current_pct: f64, top_pct: f64) -> f64 {
    if top_pct <= 0.0 {
        1.0
    } else {
        (0.4 + 0.6 * (current_pct / top_pct)).max(0.4)
    }
}

pub fn format_timestamp(ts_ms: i64) -> String {
    if ts_ms == 0 {
        return "Never".to_string();
    }
    DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%d-%m-%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown Time".to_string())
}

/// `1 day, 2:05:00` style, as traders read a timedelta.
pub fn format_duration(secs: i64) -> String {
    let delta = TimeDelta::seconds(secs);
    let days = delta.num_days();
    let rest = delta - TimeDelta::days(days);
    let clock = format!(
        "{}:{:02}:{:02}",
        rest.num_hours(),
        rest.num_minutes() % 60,
        rest.num_seconds() % 60
    );
    match days {
        0 => clock,
        1 => format!("1 day, {}", clock),
        n => format!("{} days, {}", n, clock),
    }
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
    table
}

fn number(value: String) -> Cell {
    Cell::new(value).set_alignment(CellAlignment::Right)
}

fn indicator_cell(snapshot: &IndicatorSnapshot) -> Cell {
    let (label, color) = match snapshot.macd {
        MacdTrend::Bullish => ("bull", Color::Green),
        MacdTrend::Bearish => ("bear", Color::Red),
    };
    Cell::new(format!("{:.2} / {}", snapshot.rsi, label)).fg(color)
}

pub fn plans_table(report: &TradePlanReport) -> Table {
    let mut table = new_table(&[
        "Rank", "Market", "Entry", "Exit", "Volatility", "Quantity", "Profit Target", "Expected Time",
    ]);

    let top_pct = report.plans.first().map_or(1.0, |p| p.volatility_pct);

    for (i, plan) in report.plans.iter().take(MAX_ROWS).enumerate() {
        let ratio = get_visibility_ratio(plan.volatility_pct, top_pct);
        let cyan_val = (255.0 * ratio) as u8;
        let green_val = (255.0 * ratio) as u8;

        table.add_row(vec![
            Cell::new(i + 1).fg(Color::DarkGrey),
            Cell::new(&plan.market).fg(Color::Rgb {
                r: 0,
                g: cyan_val,
                b: cyan_val,
            }),
            number(format!("{}", plan.entry)),
            number(format!("{}", plan.exit)),
            number(format!("{:.2}%", plan.volatility_pct)).fg(Color::Rgb {
                r: 0,
                g: green_val,
                b: 0,
            }),
            number(format!("{}", plan.quantity)),
            number(format!("{:.2} EUR", plan.profit_target)),
            Cell::new(format_duration(plan.expected_duration_secs)),
        ]);
    }
    table
}

pub fn entries_table(report: &ReadyEntryReport) -> Table {
    let mut table = new_table(&[
        "Market", "Entry", "Current", "RSI/MACD fast", "RSI/MACD slow", "Unrealized PnL", "Result",
    ]);

    for entry in report.entries.iter().take(MAX_ROWS) {
        let status_color = match entry.status {
            PositionStatus::Profitable => Color::Green,
            PositionStatus::AtLoss => Color::Red,
            PositionStatus::BreakEven => Color::Grey,
        };
        table.add_row(vec![
            Cell::new(&entry.plan.market),
            number(format!("{}", entry.plan.entry)),
            number(format!("{}", entry.current_price)),
            indicator_cell(&entry.fast),
            indicator_cell(&entry.slow),
            number(format!("{:.2}", entry.unrealized_pnl)),
            Cell::new(entry.status).fg(status_color),
        ]);
    }
    table
}

pub fn predictions_table(report: &PredictionReport) -> Table {
    let mut table = new_table(&["Market", "Entry", "Exit", "Result", "Trade Time"]);

    for check in report.checks.iter().take(MAX_ROWS) {
        let trade_time = match check.outcome {
            PredictionOutcome::Executed { duration_secs } => format_duration(duration_secs),
            _ => String::new(),
        };
        table.add_row(vec![
            Cell::new(&check.market),
            number(format!("{}", check.entry)),
            number(format!("{}", check.exit)),
            Cell::new(check.outcome),
            Cell::new(trade_time),
        ]);
    }
    table
}

pub async fn run(storage: &AsyncStorageManager, view: View) -> Result<()> {
    let name = match view {
        View::Plans => trade_plans::REPORT_NAME,
        View::Entries => entry_check::REPORT_NAME,
        View::Predictions => prediction_check::REPORT_NAME,
    };
    if !storage.exists(name) {
        warn!("{}.json not found in {:?}", name, storage.base_dir);
        return Ok(());
    }

    let (updated, rows, table) = match view {
        View::Plans => {
            let report: TradePlanReport = storage.load(name).await?;
            (report.last_updated_timestamp, report.plans.len(), plans_table(&report))
        }
        View::Entries => {
            let report: ReadyEntryReport = storage.load(name).await?;
            (report.last_updated_timestamp, report.entries.len(), entries_table(&report))
        }
        View::Predictions => {
            let report: PredictionReport = storage.load(name).await?;
            (report.last_updated_timestamp, report.checks.len(), predictions_table(&report))
        }
    };

    if rows == 0 {
        println!("No data found.");
        return Ok(());
    }

    println!("\n(Data taken at {} UTC)\n{}", format_timestamp(updated), table);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_read_like_timedeltas() {
        assert_eq!(format_duration(45 * 60), "0:45:00");
        assert_eq!(format_duration(3 * 3600 + 5), "3:00:05");
        assert_eq!(format_duration(86_400 + 120), "1 day, 0:02:00");
        assert_eq!(format_duration(2 * 86_400), "2 days, 0:00:00");
    }

    #[test]
    fn timestamps_format_in_utc() {
        assert_eq!(format_timestamp(0), "Never");
        assert_eq!(format_timestamp(1_700_000_000_000), "14-11-2023 22:13:20");
    }

    #[test]
    fn visibility_fades_but_never_disappears() {
        assert_eq!(get_visibility_ratio(10.0, 10.0), 1.0);
        assert_eq!(get_visibility_ratio(-5.0, 10.0), 0.4);
        assert_eq!(get_visibility_ratio(3.0, 0.0), 1.0);
    }

    #[test]
    fn empty_reports_render_header_only() {
        let table = plans_table(&TradePlanReport::default());
        assert_eq!(table.row_iter().count(), 0);
        assert!(table.to_string().contains("Market"));
    }
}
