//! Text rendering helpers shared by the node variants and the aggregator

use crate::nodes::BaseNode;
use comfy_table::{presets::NOTHING, CellAlignment, ContentArrangement, Table};

/// Borderless, column-aligned table in the style of `kubectl get`
pub fn plain_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Disabled)
        .set_header(headers.iter().map(|h| h.to_string()).collect::<Vec<_>>());

    for row in rows {
        table.add_row(row.clone());
    }
    for column in table.column_iter_mut() {
        column.set_cell_alignment(CellAlignment::Left);
    }

    table
        .to_string()
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Indent every non-empty line
pub fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", prefix, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Share of `part` in `total` as a percentage in [0, 100]; 0 when `total` is 0
pub fn percent(part: f64, total: f64) -> f64 {
    if total <= 0.0 || !part.is_finite() {
        return 0.0;
    }
    (part / total * 100.0).clamp(0.0, 100.0)
}

/// Shortest decimal form of a count: `3`, `1.5`
pub fn number(value: f64) -> String {
    format!("{}", value)
}

/// `allocated/total (p%)`
pub fn ratio(allocated: f64, total: f64) -> String {
    format!(
        "{}/{} ({:.1}%)",
        number(allocated),
        number(total),
        percent(allocated, total)
    )
}

/// Builder for the per-node multi-section description
pub struct DetailBuilder {
    lines: Vec<String>,
}

impl DetailBuilder {
    pub fn new(base: &BaseNode) -> Self {
        let mut lines = vec![
            format!("Name:    {}", base.name),
            format!("Status:  {}", base.status),
            format!("Role:    {}", base.role()),
            format!("Type:    {}", base.variant),
            format!("Address: {}", base.ip),
        ];
        if !base.description.is_empty() {
            lines.push("Description:".to_string());
            for (i, item) in base.description.lines().enumerate() {
                lines.push(format!("  {}.{}", i + 1, item));
            }
        }
        Self { lines }
    }

    /// Titled table section; skipped when there are no rows
    pub fn table(mut self, title: &str, headers: &[&str], rows: &[Vec<String>]) -> Self {
        if rows.is_empty() {
            return self;
        }
        self.lines.push(format!("{}:", title));
        self.lines.push(indent(&plain_table(headers, rows), "  "));
        self
    }

    /// Titled list of `key: value` lines
    pub fn summary(mut self, title: &str, items: &[(&str, String)]) -> Self {
        self.lines.push(format!("{}:", title));
        let width = items.iter().map(|(k, _)| k.len()).max().unwrap_or(0) + 1;
        for (key, value) in items {
            self.lines
                .push(format!("  {:<width$} {}", format!("{}:", key), value, width = width));
        }
        self
    }

    pub fn build(self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}
