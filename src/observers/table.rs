//! Table observer for pretty-printing counters.
//!
//! This module provides [`TableObserver`], which renders accumulator snapshots
//! as a formatted ASCII table using the `tabled` crate.
//!
//! # Feature Flag
//!
//! This module requires the `table` feature:
//!
//! ```toml
//! [dependencies]
//! accumulatori = { version = "0.1", features = ["table"] }
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use accumulatori::observers::table::{TableObserver, TableStyle};
//!
//! let observer = TableObserver::new().with_style(TableStyle::Rounded);
//! println!("{}", observer.render(&counters.snapshot()));
//! // ╭───────┬───────┬───────────╮
//! // │ Name  │ Total │ Unflushed │
//! // ├───────┼───────┼───────────┤
//! // │ car-7 │ 12    │ 2         │
//! // │ car-8 │ 4     │ 0         │
//! // ╰───────┴───────┴───────────╯
//! ```

use tabled::{settings::Style, Table, Tabled};

use crate::accumulator::CounterSnapshot;

/// Available table styles for rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TableStyle {
    /// ASCII table with simple characters: +, -, |
    Ascii,
    /// Modern rounded corners (default)
    #[default]
    Rounded,
    /// Sharp corners with box-drawing characters
    Sharp,
    /// Modern style with clean lines
    Modern,
    /// GitHub-flavored Markdown table
    Markdown,
    /// Dots for borders
    Dots,
    /// No borders, just spacing
    Blank,
}

/// Configuration for the table observer.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// The style to use for rendering.
    pub style: TableStyle,
    /// Whether to show the header row.
    pub show_header: bool,
    /// Custom title for the table (optional).
    pub title: Option<String>,
    /// Whether to hide counters with nothing left to flush.
    pub only_unflushed: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            style: TableStyle::default(),
            show_header: true,
            title: None,
            only_unflushed: false,
        }
    }
}

#[derive(Tabled)]
struct CounterRow<'a> {
    #[tabled(rename = "Name")]
    name: &'a str,
    #[tabled(rename = "Total")]
    total: i64,
    #[tabled(rename = "Unflushed")]
    unflushed: i64,
}

#[derive(Tabled)]
struct RemoteRow<'a> {
    #[tabled(rename = "Name")]
    name: &'a str,
    #[tabled(rename = "Remote")]
    value: i64,
}

/// An observer that renders counters as a formatted ASCII table.
#[derive(Debug, Clone, Default)]
pub struct TableObserver {
    config: TableConfig,
}

impl TableObserver {
    /// Creates a new table observer with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new table observer with the specified configuration.
    pub fn with_config(config: TableConfig) -> Self {
        Self { config }
    }

    /// Sets the table style.
    pub fn with_style(mut self, style: TableStyle) -> Self {
        self.config.style = style;
        self
    }

    /// Sets whether to show the header row.
    pub fn with_header(mut self, show: bool) -> Self {
        self.config.show_header = show;
        self
    }

    /// Sets an optional title for the table.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.config.title = Some(title.into());
        self
    }

    /// Hides counters whose delta has been fully flushed.
    pub fn only_unflushed(mut self, enabled: bool) -> Self {
        self.config.only_unflushed = enabled;
        self
    }

    fn apply_style(&self, table: &mut Table) {
        match self.config.style {
            TableStyle::Ascii => {
                table.with(Style::ascii());
            }
            TableStyle::Rounded => {
                table.with(Style::rounded());
            }
            TableStyle::Sharp => {
                table.with(Style::sharp());
            }
            TableStyle::Modern => {
                table.with(Style::modern());
            }
            TableStyle::Markdown => {
                table.with(Style::markdown());
            }
            TableStyle::Dots => {
                table.with(Style::dots());
            }
            TableStyle::Blank => {
                table.with(Style::blank());
            }
        }
    }

    fn finish(&self, mut table: Table) -> String {
        self.apply_style(&mut table);

        if !self.config.show_header {
            table.with(tabled::settings::Remove::row(
                tabled::settings::object::Rows::first(),
            ));
        }

        if let Some(ref title) = self.config.title {
            format!("{}\n{}", title, table)
        } else {
            table.to_string()
        }
    }

    /// Renders in-memory counters as a three-column table.
    pub fn render(&self, counters: &[CounterSnapshot]) -> String {
        let rows: Vec<CounterRow<'_>> = counters
            .iter()
            .filter(|c| !self.config.only_unflushed || c.unflushed != 0)
            .map(|c| CounterRow {
                name: &c.name,
                total: c.total,
                unflushed: c.unflushed,
            })
            .collect();
        self.finish(Table::new(rows))
    }

    /// Renders the remote table listing as a two-column table.
    pub fn render_global(&self, counters: &[(String, i64)]) -> String {
        let rows: Vec<RemoteRow<'_>> = counters
            .iter()
            .map(|(name, value)| RemoteRow {
                name,
                value: *value,
            })
            .collect();
        self.finish(Table::new(rows))
    }
}
