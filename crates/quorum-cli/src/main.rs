mod config;
mod run_cmd;
mod tools_cmd;

#[cfg(test)]
mod test_util;

use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quorum", about = "Send one prompt to a panel of LLM coding agents")]
struct Cli {
    /// Config file (overrides QUORUM_CONFIG env var)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch a prompt to every selected tool and collect the reports
    Run(run_cmd::RunArgs),
    /// List configured tools and their read-only guarantees
    Tools,
    /// Write a default config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Print shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

/// Execute the `quorum init` command: write config file.
fn cmd_init(cli_config: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let (path, _) = config::config_file(cli_config);

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    config::save_config(&path, config::DEFAULT_CONFIG_TEMPLATE)?;

    println!("Config written to {}", path.display());
    println!("  tools: claude, codex, gemini, amp");
    println!();
    println!("Next: run `quorum tools` to check the panel, then `quorum run \"<prompt>\"`.");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let code = run_cmd::run_run(args, cli.config.as_deref()).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Tools => {
            tools_cmd::run_tools(cli.config.as_deref())?;
        }
        Commands::Init { force } => {
            cmd_init(cli.config.as_deref(), force)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "quorum", &mut std::io::stdout());
        }
    }

    Ok(())
}
