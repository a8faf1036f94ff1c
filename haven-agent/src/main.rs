//! Process entry point: parses the CLI, resolves the layered configuration,
//! and hands off to [`supervisor::run`]. Exit codes follow spec §7's table
//! (0 normal, 1 configuration, 2 crypto, 3 store corruption, 10 one-shot
//! cycle completed with failures).

mod cli;
mod config;
mod supervisor;
mod transport;

use clap::Parser;
use haven_types::AgentError;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = cli::Cli::parse();
    let log_level = cli.log_level.unwrap_or(cli::LogLevelArg::Info);
    supervisor::init_tracing(log_level);

    let exit_code = match config::resolve(cli) {
        Ok(agent_config) => match supervisor::run(agent_config).await {
            Ok(outcome) => outcome.exit_code,
            Err(e) => {
                tracing::error!(error = %e, "agent exited with an error");
                exit_code_for(&e)
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "configuration resolution failed");
            exit_code_for(&e)
        }
    };

    std::process::exit(exit_code);
}

fn exit_code_for(error: &AgentError) -> i32 {
    error.exit_code().unwrap_or(1)
}
