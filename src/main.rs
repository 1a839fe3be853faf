use clap::Parser;
use std::process::ExitCode;
use vote_bot::bot::{self, StartupError};
use vote_bot::cli::{self, Cli, Command, ConfigCommand};
use vote_bot::config;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config(ConfigCommand::Show)) => {
            if let Err(e) = cli::handle_config_show(&cli.config) {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Some(Command::Config(ConfigCommand::Path)) => {
            cli::handle_config_path(&cli.config);
            ExitCode::SUCCESS
        }
        Some(Command::Run) | None => match run(&cli.config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(config_path: &std::path::Path) -> Result<(), StartupError> {
    let config = config::load_config(config_path)?;
    vote_bot::tracing::init_tracing(&config.logging)?;

    let bot = bot::connect(&config).await.inspect_err(|e| {
        tracing::error!(error = %e, "Startup failed");
    })?;
    bot.run_until_ctrl_c().await;
    Ok(())
}
