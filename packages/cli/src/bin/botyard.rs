// ABOUTME: Command line entry point for the Botyard orchestrator
// ABOUTME: Serves the API, checks engine reachability and stops stray bot containers

use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use botyard_config::Config;
use botyard_sandbox::{ContainerRuntime, DockerRuntime};

#[derive(Parser)]
#[command(name = "botyard")]
#[command(about = "Botyard - build, run and supervise generated bots in containers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API (default)
    Serve {
        #[arg(long, help = "Bind address (overrides BOTYARD_API_HOST)")]
        host: Option<String>,
        #[arg(long, help = "API port (overrides BOTYARD_API_PORT)")]
        port: Option<u16>,
        #[arg(long, help = "Directory holding all projects (overrides BOTYARD_WORKSPACE_ROOT)")]
        workspace: Option<PathBuf>,
    },
    /// Check that the container engine is reachable
    Doctor,
    /// Stop and remove every container managed by Botyard
    StopAll,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
        workspace: None,
    });

    if let Err(e) = handle_command(command).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;

    match command {
        Commands::Serve {
            host,
            port,
            workspace,
        } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(workspace) = workspace {
                config.workspace_root = workspace;
            }

            println!("{}", "🚀 Starting Botyard server...".green().bold());
            println!("{} http://{}", "📡 Listening on".cyan(), config.bind_address());
            println!("{} {}", "📁 Workspace:".cyan(), config.workspace_root.display());
            botyard_cli::run_server(config).await
        }
        Commands::Doctor => doctor(&config).await,
        Commands::StopAll => stop_all(&config).await,
    }
}

async fn doctor(config: &Config) -> anyhow::Result<()> {
    let runtime = DockerRuntime::connect(botyard_cli::docker_options(config))?;
    match runtime.ping().await {
        Ok(()) => {
            println!("{} Container engine is reachable", "✅".green());
            let managed = runtime.list_managed().await?;
            let running = managed.iter().filter(|c| c.running).count();
            println!(
                "{} {} managed container(s), {} running",
                "📋".cyan(),
                managed.len(),
                running
            );
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "❌".red(), e);
            println!(
                "{} Start Docker (or check DOCKER_HOST) and run this again",
                "ℹ️".cyan()
            );
            Err(e.into())
        }
    }
}

async fn stop_all(config: &Config) -> anyhow::Result<()> {
    println!("{}", "🛑 Stopping all bot containers...".yellow().bold());

    let runtime = DockerRuntime::connect(botyard_cli::docker_options(config))?;
    let managed = runtime.list_managed().await?;
    if managed.is_empty() {
        println!("{}", "✅ No bot containers found".green());
        return Ok(());
    }

    let mut stopped = 0;
    let mut failed = 0;
    for container in &managed {
        print!("   Stopping {}... ", container.runtime_id);
        match runtime.stop(&container.runtime_id).await {
            Ok(()) => {
                println!("{}", "✅".green());
                stopped += 1;
            }
            Err(e) => {
                println!("{} {}", "❌".red(), e);
                failed += 1;
            }
        }
    }

    if failed == 0 {
        println!("{} Stopped all {} container(s)", "🎉".green(), stopped);
        Ok(())
    } else {
        anyhow::bail!("stopped {} container(s), {} failed", stopped, failed)
    }
}
