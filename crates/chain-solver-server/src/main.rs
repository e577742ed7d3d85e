//! Chain solver server: entry point.

use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use chain_solver::{ChainController, OracleConfig, SolverConfig};
use chain_solver_server::{logging, resolve_secret, rest, AppState, SolverArgs};

#[derive(Parser)]
#[command(
    name = "chain-solver-server",
    about = "Solve chains of linked puzzle pages, on demand over HTTP or once from the shell",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatch endpoint.
    Serve {
        /// Listen address (host:port).
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,

        /// Shared secret callers must present.
        /// Also reads from CHAIN_SOLVER_SECRET env var.
        #[arg(long)]
        secret: Option<String>,

        #[command(flatten)]
        solver: SolverArgs,
    },

    /// Run one chain in the foreground and print its report as JSON.
    Solve {
        #[arg(long)]
        email: String,

        #[arg(long)]
        secret: String,

        /// Starting page.
        #[arg(long)]
        url: String,

        #[command(flatten)]
        solver: SolverArgs,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   chain-solver-server completions bash > ~/.local/share/bash-completion/completions/chain-solver-server
    ///   chain-solver-server completions zsh > ~/.zfunc/_chain-solver-server
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            addr,
            secret,
            solver,
        } => {
            logging::init(&cli.log_level, cli.log_json);
            let secret = resolve_secret(secret)?;
            let config = solver.apply(SolverConfig::from_env());
            tracing::info!(
                backend = %config.backend,
                deadline_secs = config.deadline.as_secs(),
                retry_slack_secs = config.retry_slack.as_secs(),
                "chain solver server"
            );

            let controller = Arc::new(ChainController::from_config(config, OracleConfig::from_env())?);
            let state = Arc::new(AppState {
                secret,
                controller: Arc::clone(&controller),
            });

            rest::serve(&addr, state, shutdown_signal()).await?;

            tracing::info!("shutting down");
            controller.shutdown().await?;
        }

        Commands::Solve {
            email,
            secret,
            url,
            solver,
        } => {
            logging::init(&cli.log_level, cli.log_json);
            let config = solver.apply(SolverConfig::from_env());
            let controller = ChainController::from_config(config, OracleConfig::from_env())?;

            let report = controller.run(controller.session(email, secret, url)).await;
            println!("{}", serde_json::to_string_pretty(&report)?);

            controller.shutdown().await?;
            if !report.outcome.is_completed() {
                std::process::exit(1);
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(
                shell,
                &mut cmd,
                "chain-solver-server",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
