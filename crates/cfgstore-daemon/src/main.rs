use anyhow::{bail, Result};
use cfgstore_daemon::{
    account_lookup, is_daemon_running_at, open_registry, remove_pid_file, write_pid_file, Cli,
    DaemonConfig, Server,
};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(cli.level().into()))
        .init();

    if let Err(e) = run(cli).await {
        error!("cfgstored failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    info!("Starting cfgstored v{}", env!("CARGO_PKG_VERSION"));

    if is_daemon_running_at(&config.pid_file) {
        bail!(
            "another daemon is running (pid file {})",
            config.pid_file.display()
        );
    }

    let registry = open_registry(&config).await?;
    let server = Server::bind(&config, registry, account_lookup(&config)).await?;
    write_pid_file(&config.pid_file)?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted");
                let _ = shutdown.send(());
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    let result = server.run().await;
    remove_pid_file(&config.pid_file);
    result
}
