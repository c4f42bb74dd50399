mod cli;
mod config;
mod context;
mod graph;
mod invoker;
mod logging;
mod store;
mod template;
mod workflow;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stepflow")]
#[command(about = "Run declarative workflow graphs - tasks, choices, parallel branches and catch rules")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Output mode: console, json or quiet
    #[arg(long, global = true, default_value = "console")]
    output: String,

    /// Also write JSON logs to a file (default location when no path is given)
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a graph
    Run {
        /// Graph name or path to a graph file
        graph: String,

        /// Run arguments as key=value (values parse as JSON when possible)
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,

        /// JSON file with the initial context
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Validate a graph without running
    Validate {
        /// Graph name or path to a graph file
        graph: String,
    },

    /// Resume a stored run from its checkpoint
    Resume {
        run_id: String,
    },

    /// Show recent runs
    History {
        /// Only runs of this graph
        #[arg(long)]
        graph: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show a stored run
    Show {
        run_id: String,
    },

    /// List available graphs
    Graphs,

    /// List configured invocables
    Invocables,
}

impl Commands {
    fn log_name(&self) -> &str {
        match self {
            Commands::Run { graph, .. } | Commands::Validate { graph } => graph_stem(graph),
            Commands::Resume { run_id } | Commands::Show { run_id } => run_id,
            _ => "stepflow",
        }
    }
}

fn graph_stem(graph: &str) -> &str {
    std::path::Path::new(graph)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(graph)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mode = cli::OutputMode::from_str(&cli.output);
    let quiet = cli.quiet || mode == cli::OutputMode::Quiet;

    let log_file = match &cli.log_file {
        Some(path) if path.as_os_str().is_empty() => {
            Some(logging::default_log_path(cli.command.log_name())?)
        }
        other => other.clone(),
    };
    let guard = logging::init_logging(cli.debug, quiet, log_file.as_deref())?;

    let handler = cli::create_handler(if cli.quiet { cli::OutputMode::Quiet } else { mode }, cli.debug);
    let project_dir = cli.dir.as_deref();
    let config = config::StepflowConfig::load(project_dir)?;

    let code = match cli.command {
        Commands::Run { graph, args, input } => {
            cli::run_graph(&graph, &args, input.as_deref(), project_dir, &config, &*handler).await?
        }
        Commands::Validate { graph } => {
            cli::validate_graph(&graph, project_dir, &config, &*handler)?
        }
        Commands::Resume { run_id } => {
            cli::resume_run(&run_id, project_dir, &config, &*handler).await?
        }
        Commands::History { graph, limit } => {
            cli::history(graph.as_deref(), limit, &config, &*handler)?
        }
        Commands::Show { run_id } => cli::show_run(&run_id, &config, &*handler)?,
        Commands::Graphs => cli::list_graphs(project_dir, &config, &*handler)?,
        Commands::Invocables => {
            cli::list_invocables(&config, &*handler);
            0
        }
    };

    if code != 0 {
        // exit() skips destructors; flush the log writer first
        drop(guard);
        std::process::exit(code);
    }
    Ok(())
}
