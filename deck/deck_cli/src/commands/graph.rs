//! `deckctl graph`: print the login workflow's step graph.

use crate::config::CliConfig;
use crate::flow;
use anyhow::Context;
use clap::{Args, ValueEnum};
use deck_workflow::DefinitionSummary;

/// Output format of the graph command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Json,
}

/// Arguments for the graph command
#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Output format
    #[clap(long, value_enum, default_value_t = GraphFormat::Text)]
    pub format: GraphFormat,
}

/// Implementation of the graph command
pub fn execute_graph(args: &GraphArgs, config: &CliConfig) -> anyhow::Result<()> {
    let summaries = vec![
        flow::login_definition(&config.engine)?.summary(),
        flow::second_factor_definition(&config.engine)?.summary(),
    ];

    match args.format {
        GraphFormat::Json => {
            let json = serde_json::to_string_pretty(&summaries)
                .context("failed to serialize the workflow graph")?;
            println!("{}", json);
        }
        GraphFormat::Text => {
            for summary in &summaries {
                print!("{}", render_text(summary));
            }
        }
    }
    Ok(())
}

fn render_text(summary: &DefinitionSummary) -> String {
    let mut text = format!("workflow {} (start: {})\n", summary.name, summary.start);
    if !summary.outcomes.is_empty() {
        text.push_str(&format!("  outcomes: {}\n", summary.outcomes.join(", ")));
    }
    for step in &summary.steps {
        text.push_str(&format!("  {} [{}]\n", step.name, step.mode));
        for edge in &step.edges {
            text.push_str(&format!("    {} -> {}\n", edge.key, edge.target));
        }
    }
    text
}
