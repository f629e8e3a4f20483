//! attrgraph CLI - plan and run registry documents

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use attrgraph::ast::Document;
use attrgraph::error::{FixSuggestion, GraphError};
use attrgraph::{plan_with, Outcome, Runner, Settings, Shape};

#[derive(Parser)]
#[command(name = "attrgraph")]
#[command(about = "attrgraph - attribute resolution engine")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to ~/.config/attrgraph/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the execution graph for a document's request
    Plan {
        /// Path to registry YAML file
        file: PathBuf,
    },

    /// Run a document's request and print the result
    Run {
        /// Path to registry YAML file
        file: PathBuf,

        /// Also print run stats as JSON
        #[arg(short, long)]
        stats: bool,

        /// Disable batch coordination
        #[arg(long)]
        no_batching: bool,
    },

    /// Validate a document (parse, index, plan invariants)
    Check {
        /// Path to registry YAML file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("ATTRGRAPH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Plan { file } => plan_document(&file, cli.config.as_deref()),
        Commands::Run {
            file,
            stats,
            no_batching,
        } => run_document(&file, cli.config.as_deref(), stats, no_batching).await,
        Commands::Check { file } => check_document(&file, cli.config.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, GraphError> {
    let settings = match path {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    Ok(settings.with_env())
}

fn plan_document(file: &Path, config: Option<&Path>) -> Result<(), GraphError> {
    let settings = load_settings(config)?;
    let doc = Document::load(file)?;
    let index = doc.index();
    let run_config = settings.to_run_config()?;

    let graph = plan_with(
        &index,
        &doc.request,
        &Shape::from_data(&doc.data),
        &run_config.plan_options(),
    );
    println!("{}", serde_json::to_string_pretty(&graph.to_json())?);
    print_unreachable(graph.unreachable_attrs().iter().map(|a| a.as_str()));
    Ok(())
}

async fn run_document(
    file: &Path,
    config: Option<&Path>,
    show_stats: bool,
    no_batching: bool,
) -> Result<(), GraphError> {
    let settings = load_settings(config)?;
    let doc = Document::load(file)?;
    let mut run_config = settings.to_run_config()?;
    if no_batching {
        run_config.batching = false;
    }

    let runner = Runner::with_config(doc.index(), run_config);
    let output = runner.run(&doc.request, doc.data.clone()).await;

    println!("{}", "Result:".cyan().bold());
    println!(
        "{}",
        serde_json::to_string_pretty(&Value::Object(output.result.clone()))?
    );

    for entry in doc.request.attrs() {
        let attr = entry.attr.as_str();
        match output.outcome(attr) {
            Outcome::Resolved => {}
            Outcome::Direct { node, error } => {
                println!("{} {} failed at node {}: {}", "✗".red(), attr, node, error);
            }
            Outcome::Ancestor { node, error } => {
                println!(
                    "{} {} unavailable: upstream node {} failed: {}",
                    "✗".yellow(),
                    attr,
                    node,
                    error
                );
            }
            Outcome::Unreachable => {
                println!("{} {} unreachable: no resolver path", "✗".yellow(), attr);
            }
            Outcome::Omitted { node } => {
                println!("{} {} omitted by node {}", "–".dimmed(), attr, node);
            }
        }
    }
    for warning in output.stats.warnings() {
        println!("{} {}", "⚠".yellow(), warning);
    }

    if show_stats {
        println!("{}", "Stats:".cyan().bold());
        println!("{}", serde_json::to_string_pretty(&output.stats.to_json())?);
    }
    Ok(())
}

fn check_document(file: &Path, config: Option<&Path>) -> Result<(), GraphError> {
    let settings = load_settings(config)?;
    let doc = Document::load(file)?;
    let index = doc.index();
    let run_config = settings.to_run_config()?;

    let graph = plan_with(
        &index,
        &doc.request,
        &Shape::from_data(&doc.data),
        &run_config.plan_options(),
    );
    graph.validate()?;

    for call in doc.request.mutations() {
        if index.mutation(call.mutation.as_str()).is_none() {
            return Err(GraphError::UnknownMutation {
                mutation: call.mutation.to_string(),
            });
        }
    }

    println!("{} Document '{}' is valid", "✓".green(), file.display());
    println!("  Resolvers: {}", index.resolver_count());
    println!("  Mutations: {}", doc.mutations.len());
    println!("  Requested: {}", doc.request.attrs().count());
    println!("  Graph nodes: {}", graph.node_count());
    print_unreachable(graph.unreachable_attrs().iter().map(|a| a.as_str()));
    Ok(())
}

fn print_unreachable<'a>(attrs: impl Iterator<Item = &'a str>) {
    let attrs: Vec<&str> = attrs.collect();
    if !attrs.is_empty() {
        println!("  {} {}", "Unreachable:".yellow(), attrs.join(", "));
    }
}
