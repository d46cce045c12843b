mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "scrum",
    about = "Scrum project tracking service: epics, tasks, sprints and documents over HTTP and stdio RPC",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: nearest ancestor containing .scrum/)
    #[arg(long, global = true, env = "SCRUM_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .scrum/ with a default config and an empty store
    Init {
        /// Project name (default: the root directory's name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Serve the HTTP API
    Serve {
        /// Port to listen on (default: server.port from config)
        #[arg(long)]
        port: Option<u16>,

        /// Also answer line-delimited RPC on stdin/stdout, sharing one store
        #[arg(long)]
        stdio: bool,
    },

    /// Answer line-delimited RPC on stdin/stdout until stdin closes
    Rpc,

    /// Send one RPC request to a child `scrum rpc` process and print the reply
    Call {
        /// Method name, e.g. create_epic
        method: String,

        /// Parameters as a JSON object
        #[arg(default_value = "{}")]
        params: String,
    },

    /// Show project progress and config warnings
    Status,

    /// List every RPC method name
    Methods,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    // Logs always go to stderr; stdout may be an RPC channel.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { name } => cmd::init::run(&root, name.as_deref()),
        Commands::Serve { port, stdio } => cmd::serve::run(&root, port, stdio),
        Commands::Rpc => cmd::rpc::run(&root),
        Commands::Call { method, params } => cmd::call::run(&root, &method, &params, cli.json),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Methods => cmd::call::list_methods(cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
