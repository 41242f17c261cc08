//! Node listing and description commands

use crate::output::{OutputFormat, OutputFormatter};
use anyhow::{Context, Result};
use colored::*;
use topnode_core::ClusterStateProvider;
use topnode_engine::render::ratio;
use topnode_engine::{Engine, NodeQuery, NodeReport, NodeVariant};
use tracing::debug;

/// How a listing is laid out in the non-structured formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListView {
    #[default]
    Summary,
    Details,
    ByType,
}

/// List nodes with their GPU accounting
pub async fn list_nodes<P>(
    engine: &Engine,
    provider: &P,
    names: Vec<String>,
    variant: Option<NodeVariant>,
    view: ListView,
    output_format: OutputFormat,
) -> Result<()>
where
    P: ClusterStateProvider + ?Sized,
{
    let mut query = NodeQuery::all().with_names(names);
    if let Some(variant) = variant {
        query = query.with_variant(variant);
    }
    debug!("Listing nodes with {:?}", query);

    let report = engine
        .list_nodes(provider, &query)
        .await
        .context("Failed to list nodes")?;

    print_report(&report, view, &OutputFormatter::new(output_format))
}

fn print_report(report: &NodeReport, view: ListView, formatter: &OutputFormatter) -> Result<()> {
    if formatter.format().is_structured() {
        return formatter.print_structured(report);
    }

    match view {
        ListView::Details => formatter.print_text(&report.render_details()),
        ListView::ByType => formatter.print_text(&report.render_custom_summaries()),
        ListView::Summary if formatter.format() == OutputFormat::Table => {
            let table = report.summary_table();
            formatter.print_table(&table.headers, &table.rows);
            print_totals(report);
        }
        ListView::Summary => print!("{}", report.render_summary()),
    }
    Ok(())
}

fn print_totals(report: &NodeReport) {
    for line in totals_lines(report) {
        println!("{}", line);
    }
}

/// Cluster totals below the table; nothing for an empty listing
fn totals_lines(report: &NodeReport) -> Vec<String> {
    if report.is_empty() {
        return Vec::new();
    }
    let totals = report.totals();
    let mut lines = vec![format!(
        "{} {}",
        "Allocated/Total GPUs In Cluster:".bold(),
        ratio(totals.allocated_gpus, totals.total_gpus)
    )];
    if totals.unhealthy_gpus > 0.0 {
        lines.push(format!(
            "{} {}",
            "Unhealthy/Total GPUs In Cluster:".bold().red(),
            ratio(totals.unhealthy_gpus, totals.total_gpus)
        ));
    }
    lines
}

/// Show one node's detail block
pub async fn describe_node<P>(
    engine: &Engine,
    provider: &P,
    name: String,
    output_format: OutputFormat,
) -> Result<()>
where
    P: ClusterStateProvider + ?Sized,
{
    let node = engine
        .describe_node(provider, &name)
        .await
        .with_context(|| format!("Failed to describe node {}", name))?;

    let formatter = OutputFormatter::new(output_format);
    if output_format.is_structured() {
        formatter.print_structured(&node)?;
    } else {
        formatter.print_text(&node.accounting().render_details());
    }
    Ok(())
}
