//! `k8s-sandbox-cli`: manual cleanup entry point for releases this crate
//! leaves behind (e.g. after an interrupted task run).

use clap::{Parser, Subcommand};
use k8s_sandbox::sandbox;

#[derive(Parser)]
#[command(name = "k8s-sandbox-cli")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean up Kubernetes sandbox releases.
    Cleanup {
        #[command(subcommand)]
        target: CleanupTarget,
    },
}

#[derive(Subcommand)]
enum CleanupTarget {
    /// Uninstall one release by id, or every tracked release when omitted.
    K8s {
        id: Option<String>,
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long)]
        context: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Cleanup {
            target: CleanupTarget::K8s { id, namespace, context },
        } => {
            let namespace = match namespace {
                Some(ns) => ns,
                None => k8s_sandbox::cluster::default_namespace(context.as_deref())?,
            };
            if id.is_none() {
                print!(
                    "This will uninstall every sandbox release in namespace '{namespace}'. Continue? [y/N] "
                );
                use std::io::Write;
                std::io::stdout().flush()?;
                let mut answer = String::new();
                std::io::stdin().read_line(&mut answer)?;
                if !answer.trim().eq_ignore_ascii_case("y") {
                    println!("Aborted.");
                    return Ok(());
                }
            }
            sandbox::cli_cleanup(id.as_deref(), &namespace, context.as_deref()).await?;
        }
    }
    Ok(())
}
