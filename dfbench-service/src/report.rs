//! Latency summaries and their terminal rendering.

use std::fmt;
use std::time::Duration;

use dfbench_types::{Downloader, SizeTier};
use yansi::Paint;

/// Running min/max/total of a group of latencies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    count: u64,
    total: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl Summary {
    /// Adds one observed latency.
    pub fn add(&mut self, cost: Duration) {
        self.count += 1;
        self.total += cost;
        self.min = Some(self.min.map_or(cost, |min| min.min(cost)));
        self.max = Some(self.max.map_or(cost, |max| max.max(cost)));
    }

    /// Returns the number of observations.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns the smallest observation, if any.
    pub fn min(&self) -> Option<Duration> {
        self.min
    }

    /// Returns the largest observation, if any.
    pub fn max(&self) -> Option<Duration> {
        self.max
    }

    /// Returns the mean of all observations, or `None` if there are none.
    pub fn avg(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        let nanos = self.total.as_nanos() / u128::from(self.count);
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }
}

/// Aggregated latency of one size tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Row {
    /// The tier the row describes.
    pub tier: SizeTier,
    /// Number of samples.
    pub times: u64,
    /// Fastest download.
    pub min: Duration,
    /// Slowest download.
    pub max: Duration,
    /// Mean download time.
    pub avg: Duration,
}

/// Latency per downloader and tier, derived from the recorded downloads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    sections: Vec<(Downloader, Vec<Row>)>,
}

impl Report {
    /// Adds the rows of a downloader, ordered by tier. Downloaders without rows are skipped.
    pub(crate) fn push(&mut self, downloader: Downloader, mut rows: Vec<Row>) {
        if rows.is_empty() {
            return;
        }
        rows.sort_by_key(|row| row.tier);
        self.sections.push((downloader, rows));
    }

    /// Returns the rows of `downloader`, in canonical tier order.
    pub fn rows(&self, downloader: Downloader) -> Option<&[Row]> {
        self.sections
            .iter()
            .find(|(d, _)| *d == downloader)
            .map(|(_, rows)| rows.as_slice())
    }

    /// Returns `true` if no downloader has any rows.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Renders one table per downloader.
    pub fn tables(&self) -> impl Iterator<Item = (Downloader, Table)> + '_ {
        self.sections.iter().map(|(downloader, rows)| {
            let mut table = Table::new([
                "File Size Level",
                "Times",
                "Min Cost",
                "Max Cost",
                "Avg Cost",
            ]);
            for row in rows {
                table.push_row([
                    row.tier.label().to_owned(),
                    row.times.to_string(),
                    format_duration(row.min),
                    format_duration(row.max),
                    format_duration(row.avg),
                ]);
            }
            (*downloader, table)
        })
    }

    /// Prints all tables to stdout.
    pub fn print(&self) {
        for (downloader, table) in self.tables() {
            println!();
            println!(
                "{} {}",
                "## Downloader".bold(),
                downloader.as_str().to_uppercase().bold().blue()
            );
            print!("{table}");
        }
    }
}

/// Formats a duration as fractional milliseconds.
pub fn format_duration(duration: Duration) -> String {
    format!("{:.2}ms", duration.as_secs_f64() * 1000.0)
}

/// A plain text table with a border around every row.
///
/// ```text
/// +------+-------+
/// | NAME | TIMES |
/// +------+-------+
/// | nano | 3     |
/// +------+-------+
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Creates a table with the given column headers.
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a row. Missing cells render empty, extra cells are dropped.
    pub fn push_row<I, S>(&mut self, row: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut row: Vec<String> = row.into_iter().map(Into::into).collect();
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    /// Returns the rows in insertion order.
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<_> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }
        widths
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths = self.widths();

        let separator = |f: &mut fmt::Formatter<'_>| -> fmt::Result {
            for width in &widths {
                write!(f, "+{}", "-".repeat(width + 2))?;
            }
            writeln!(f, "+")
        };
        let line = |f: &mut fmt::Formatter<'_>, cells: &mut dyn Iterator<Item = String>| {
            for (&width, cell) in widths.iter().zip(cells) {
                write!(f, "| {cell:<width$} ")?;
            }
            writeln!(f, "|")
        };

        separator(f)?;
        line(f, &mut self.headers.iter().map(|h| h.to_uppercase()))?;
        separator(f)?;
        for row in &self.rows {
            line(f, &mut row.iter().cloned())?;
            separator(f)?;
        }
        Ok(())
    }
}
