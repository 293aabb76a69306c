use anyhow::Context;
use clap::Parser;
use helpers::{enable_logging, set_full_stacktrace_as_default, wait_on_ctrl_c};
use std::{path::PathBuf, process::ExitCode};

use crate::{
    app_context::{AppContext, CliOverrides},
    modifiers::{ModificationChain, ModifierRegistry},
    proxy::ProxyServer,
};

mod app_context;
mod config;
mod helpers;
mod modifiers;
mod proxy;
#[cfg(test)]
mod test_helpers;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "broken-dns-proxy - A DNS proxy that breaks upstream responses on purpose to test DNS clients."
)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "broken-dns-proxy.toml")]
    config: PathBuf,

    /// Show verbose output. [default: false]
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    /// Port to listen on for UDP and TCP. Overrides [Proxy] Port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to listen on. Overrides [Proxy] Address.
    #[arg(short, long)]
    address: Option<String>,

    /// Print the available modifiers and exit.
    #[arg(long)]
    list_modifiers: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    set_full_stacktrace_as_default();
    let cli = Cli::parse();
    let _log_guard = enable_logging(cli.verbose);

    // Exit the main thread if anything panics
    let orig_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        tracing::error!("Thread paniced. Stop main thread too.");
        orig_hook(panic_info);
        std::process::exit(1);
    }));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    let registry = ModifierRegistry::builtin().context("Failed to register modifiers")?;

    if cli.list_modifiers {
        println!("Available modifiers:");
        for name in registry.names() {
            println!("  {name}");
        }
        return Ok(());
    }

    tracing::info!("Starting broken-dns-proxy v{VERSION}");

    let overrides = CliOverrides {
        verbose: cli.verbose,
        config_path: cli.config,
        port: cli.port,
        address: cli.address,
    };
    let app_context = AppContext::load(&overrides, registry).context("Invalid configuration")?;
    tracing::debug!("Configuration:\n{:?}", app_context.configuration);

    let chain = ModificationChain::build(&app_context.configuration, &app_context.registry)
        .context("Failed to build the modification chain")?;
    if chain.is_empty() {
        tracing::info!("No modifiers configured. Responses are relayed unmodified.");
    } else {
        tracing::info!("{} modifier(s): {}", chain.len(), chain.names().join(" "));
    }

    let settings = &app_context.settings;
    let upstreams: Vec<String> = settings.upstream_servers.iter().map(|server| server.to_string()).collect();
    tracing::info!("Forward queries to {}", upstreams.join(", "));

    let server = ProxyServer::bind(settings, chain)?;
    let listening = server.local_addr().context("Failed to read the listening address")?;
    let handle = server.start_receive_loop();

    tracing::info!("Listening on {listening} (UDP and TCP). Waiting for Ctrl-C...");

    wait_on_ctrl_c().await;
    println!();
    tracing::info!("Got it! Exiting...");
    handle.stop().await;

    Ok(())
}
