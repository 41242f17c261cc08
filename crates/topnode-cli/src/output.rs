//! Output formatting for the topnode CLI

use anyhow::Result;
use clap::ValueEnum;
use colored::*;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain column-aligned text
    Text,
}

impl OutputFormat {
    pub fn is_structured(&self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Yaml)
    }
}

/// Output formatter
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Serialize a value as JSON or YAML; table and text fall back to YAML
    pub fn print_structured<T>(&self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(value)?;
                println!("{}", json);
            }
            OutputFormat::Yaml | OutputFormat::Table | OutputFormat::Text => {
                let yaml = serde_yaml::to_string(value)?;
                print!("{}", yaml);
            }
        }
        Ok(())
    }

    /// Print a table whose columns are only known at runtime
    pub fn print_table(&self, headers: &[String], rows: &[Vec<String>]) {
        if rows.is_empty() {
            println!("{}", "No nodes found".dimmed());
            return;
        }

        if self.format == OutputFormat::Text {
            println!("{}", headers.join("\t"));
            for row in rows {
                println!("{}", row.join("\t"));
            }
            return;
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        let header_cells: Vec<Cell> = headers
            .iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(Color::Cyan))
            .collect();
        table.set_header(header_cells);

        let status_column = headers.iter().position(|h| h == "STATUS");
        for row in rows {
            let cells: Vec<Cell> = row
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    if Some(i) == status_column {
                        Cell::new(value).fg(status_color(value))
                    } else {
                        Cell::new(value)
                    }
                })
                .collect();
            table.add_row(cells);
        }

        println!("{}", table);
    }

    /// Print pre-rendered text, highlighting section titles in table mode
    pub fn print_text(&self, text: &str) {
        for line in text.lines() {
            if self.format == OutputFormat::Table && is_section_title(line) {
                println!("{}", line.bold());
            } else {
                println!("{}", line);
            }
        }
    }

    /// Print an informational note to stderr
    pub fn print_note(&self, message: &str) {
        if !self.format.is_structured() {
            eprintln!("{} {}", "ℹ".blue().bold(), message.blue());
        }
    }
}

fn is_section_title(line: &str) -> bool {
    !line.starts_with(' ') && line.ends_with(':') && !line.contains("In Cluster")
}

/// Table color for a node status
pub fn status_color(status: &str) -> Color {
    let primary = status.split(',').next().unwrap_or_default();
    match primary.to_lowercase().as_str() {
        "ready" => {
            if status.contains("SchedulingDisabled") {
                Color::Yellow
            } else {
                Color::Green
            }
        }
        "notready" => Color::Red,
        _ => Color::DarkGrey,
    }
}
