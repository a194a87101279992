//! Rendering for `tradeflow` command results: tables by default, JSON with --json.

use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Rows as a table or a JSON array
pub fn render_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<String> {
    Ok(match mode {
        OutputMode::Table if items.is_empty() => "(none)".to_string(),
        OutputMode::Table => Table::new(items).with(Style::rounded()).to_string(),
        OutputMode::Json => serde_json::to_string_pretty(items)?,
    })
}

pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    println!("{}", render_items(items, mode)?);
    Ok(())
}

/// Titled table; JSON callers print the whole document instead
pub fn print_section<T: Tabled + Serialize>(title: &str, items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    if mode == OutputMode::Json {
        return Ok(());
    }
    println!("\n{title}");
    print_items(items, mode)
}

pub fn print_item<T: Serialize>(item: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(item)?);
    Ok(())
}

pub fn print_kv(key: &str, value: &str) {
    println!("{key:>28}: {value}");
}

pub fn print_success(msg: &str) {
    println!("\x1b[32m{msg}\x1b[0m");
}

pub fn print_warn(msg: &str) {
    println!("\x1b[33m{msg}\x1b[0m");
}

pub fn print_error(msg: &str) {
    eprintln!("\x1b[31m{msg}\x1b[0m");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Tabled)]
    struct Row {
        symbol: String,
        qty: u32,
    }

    #[test]
    fn test_render_modes() {
        let rows = vec![Row {
            symbol: "EURUSD".into(),
            qty: 1000,
        }];
        let table = render_items(&rows, OutputMode::Table).unwrap();
        assert!(table.contains("EURUSD"));
        assert!(table.contains("qty"));

        let json = render_items(&rows, OutputMode::Json).unwrap();
        assert!(json.contains("\"qty\": 1000"));

        let empty: Vec<Row> = vec![];
        assert_eq!(render_items(&empty, OutputMode::Table).unwrap(), "(none)");
        assert_eq!(render_items(&empty, OutputMode::Json).unwrap(), "[]");
    }
}
