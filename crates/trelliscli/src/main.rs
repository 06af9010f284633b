use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use trelliscore::{ExecutionStatus, LogLevel, NodeSpec, Workflow};
use trellisruntime::{Engine, EngineConfig, MemoryStateStore, NodeRegistry};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Trellis workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial context data as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Async worker pool size
        #[arg(long, default_value_t = trellisruntime::DEFAULT_MAX_WORKERS)]
        max_workers: usize,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            max_workers,
            verbose,
        } => {
            let level = if verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::INFO
            };
            tracing_subscriber::fmt().with_max_level(level).init();
            run_workflow(file, input, max_workers, verbose).await
        }

        Commands::Validate { file } => validate_workflow(file),

        Commands::Nodes => {
            list_nodes();
            Ok(ExitCode::SUCCESS)
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn builtin_registry() -> Arc<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    trellisnodes::register_builtins(&mut registry);
    Arc::new(registry)
}

fn load_workflow(file: &PathBuf) -> Result<Workflow> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let workflow: Workflow = serde_json::from_str(&json)
        .with_context(|| format!("parsing {}", file.display()))?;
    Ok(workflow)
}

async fn run_workflow(
    file: PathBuf,
    input: Option<String>,
    max_workers: usize,
    verbose: bool,
) -> Result<ExitCode> {
    let workflow = load_workflow(&file)?;
    println!("🚀 {} ({} nodes, {} connections)", workflow.name, workflow.nodes.len(), workflow.connections.len());

    let initial: Map<String, Value> = match input {
        Some(text) => match serde_json::from_str(&text)? {
            Value::Object(map) => map,
            _ => return Err(anyhow!("input must be a JSON object")),
        },
        None => Map::new(),
    };

    let config = EngineConfig {
        max_workers,
        log_level: if verbose { LogLevel::Debug } else { LogLevel::Info },
        ..EngineConfig::default()
    };
    let engine = Engine::with_registry(
        builtin_registry(),
        config,
        Some(Arc::new(MemoryStateStore::new())),
    );

    let execution = engine.execute(&workflow, initial).await;

    for (node_id, entries) in &execution.logs {
        for entry in entries {
            println!("  [{}] {}: {}", node_id, entry.level, entry.message);
        }
    }

    println!();
    println!("Execution {}", execution.id);
    println!("  status:   {}", execution.status.as_str());
    if let Some(duration) = execution.duration {
        println!("  duration: {:.6}s", duration);
    }
    if let Some(error) = execution.error() {
        println!("  error:    {}", error);
    }
    if verbose {
        println!("  context:  {}", serde_json::to_string_pretty(&execution.context)?);
    }

    if execution.status == ExecutionStatus::Completed {
        println!("✨ workflow completed");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("💥 workflow failed");
        Ok(ExitCode::FAILURE)
    }
}

fn validate_workflow(file: PathBuf) -> Result<ExitCode> {
    let workflow = load_workflow(&file)?;

    if let Err(e) = workflow.validate() {
        println!("❌ invalid workflow: {}", e);
        return Ok(ExitCode::FAILURE);
    }
    let graph = trellisruntime::DependencyGraph::new(&workflow);
    let errors = graph.validate();
    if !errors.is_empty() {
        for error in &errors {
            println!("❌ {}", error);
        }
        return Ok(ExitCode::FAILURE);
    }

    println!("✅ {} is valid", workflow.name);
    println!("   nodes:       {}", workflow.nodes.len());
    println!("   connections: {}", workflow.connections.len());
    println!("   levels:      {}", graph.parallel_groups().len());
    Ok(ExitCode::SUCCESS)
}

fn list_nodes() {
    let registry = builtin_registry();
    println!("📦 Available node types:");
    for node_type in registry.list() {
        match registry.describe(&node_type) {
            Some(descriptor) => {
                println!("  • {} ({})", node_type, descriptor.category);
                println!("    {}", descriptor.description);
            }
            None => println!("  • {}", node_type),
        }
    }
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let mut workflow = Workflow::new("example-fetch", "Example HTTP Workflow");
    workflow.description = Some("Fetch a URL and pick fields from the response".to_string());

    workflow
        .add_node(
            NodeSpec::new("fetch", "http")
                .with_name("Fetch Data")
                .with_config("url", "https://api.github.com/zen")
                .with_config("method", "GET"),
        )
        .add_node(
            NodeSpec::new("shape", "transform")
                .with_name("Shape Response")
                .with_config("operation", "pick")
                .with_config("fields", serde_json::json!(["status", "body"])),
        )
        .connect("fetch", "shape");

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(&output, json)?;

    println!("✨ created {}", output.display());
    println!("run it with: trellis run --file {}", output.display());
    Ok(())
}
