//! Luna chat server binary.

use anyhow::Context;
use clap::Parser;
use luna_chat::{Cli, UserDirectory, build_gateway};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    if let Err(e) = run(cli).await {
        error!("Chat server error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let directory = UserDirectory::new();
    for seed in &cli.seed_users {
        directory
            .create_user(&seed.name, &seed.email, &seed.password)
            .with_context(|| format!("failed to seed user {}", seed.email))?;
    }

    let config = cli.server_config();
    let gateway = build_gateway(config, &cli.key_param, cli.require_known_user, directory)
        .context("failed to build routes")?;

    info!(
        bind = %cli.bind,
        key_param = %cli.key_param,
        require_known_user = cli.require_known_user,
        seeded = cli.seed_users.len(),
        "Starting luna chat server"
    );
    info!("  Browser clients: ws://{}/ws/connect?{}=<email>", cli.bind, cli.key_param);
    info!("  Plain clients:   ws://{}/user/{{id}}?{}=<email>", cli.bind, cli.key_param);

    let shutdown = gateway.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                shutdown.shutdown();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    gateway.serve(cli.bind).await?;
    Ok(())
}
