//! lastseen: chat presence tracker runtime binary.
//! Single process: poll loop, probe registry and local API in one daemon.

use clap::Parser;

use lastseen_gateway::{Dispatcher, ProbeRegistry};
use lastseen_probe_whatsapp::WhatsAppProbe;

mod cli;
mod client;
mod config;
mod poll_loop;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    if args.command.logs() {
        init_tracing();
    }
    let mut config = config::Config::load(args.config.as_deref())?;
    let socket_path = config.socket_path(args.socket_path);

    match args.command {
        cli::Command::Daemon(opts) => {
            config.apply_overrides(opts.interval, opts.database)?;

            tracing::info!("lastseen daemon starting");
            let dispatcher = build_dispatcher(&config)?;
            poll_loop::run_daemon(config, dispatcher, &socket_path).await?;
        }
        cli::Command::Setup => {
            let dispatcher = build_dispatcher(&config)?;
            dispatcher.initialize_all().await?;
            println!("setup complete");
        }
        cli::Command::Watch(subject) => {
            client::cmd_watch(&socket_path, &subject.user, &subject.source).await?;
        }
        cli::Command::Unwatch(opts) => {
            client::cmd_unwatch(&socket_path, &opts.user, opts.source.as_deref()).await?;
        }
        cli::Command::Ls => client::cmd_ls(&socket_path).await?,
        cli::Command::Status(opts) => {
            client::cmd_status(&socket_path, &opts.user, opts.source.as_deref()).await?;
        }
        cli::Command::Archive(opts) => {
            client::cmd_archive(&socket_path, &opts.user, &opts.source).await?;
        }
        cli::Command::Record(opts) => {
            client::cmd_record(&socket_path, &opts.user, &opts.source, opts.at).await?;
        }
        cli::Command::Sources => client::cmd_sources(&socket_path).await?,
    }

    Ok(())
}

fn init_tracing() {
    let filter = std::env::var("LASTSEEN_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

/// Build the probe registry once at startup. Registration order is the
/// order `setup` and cross-source status queries visit probes in.
fn build_dispatcher(config: &config::Config) -> anyhow::Result<Dispatcher> {
    let mut registry = ProbeRegistry::new();
    registry.register(WhatsAppProbe::from_config(&config.whatsapp)?)?;
    tracing::debug!(sources = ?registry.names(), "probe registry built");
    Ok(Dispatcher::new(registry))
}
