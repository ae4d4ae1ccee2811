//! trackd entry point

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use trackd::protocol::{Message, RES};
use trackd::{build_tree, Cli, Config, Server, TrackdError};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<TrackdError>() {
                Some(e) => e.exit_code(),
                None => ExitCode::FAILURE,
            }
        }
    }
}

fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => "trackd=info",
        1 => "trackd=debug",
        _ => "trackd=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_cli(cli)?;
    let lookup = config
        .track_lookup()
        .with_context(|| format!("opening track database {}", config.database.display()))?;

    if let Some(track_id) = config.lookup {
        for resource in lookup.resources(track_id)? {
            let line = Message::new(RES)
                .arg(resource.path.to_string())
                .arg(resource.kind.as_str())
                .arg(resource.value);
            println!("{}", line);
        }
        return Ok(());
    }

    let server = Server::bind(config.hostport.as_str(), build_tree(Arc::new(lookup)))
        .await
        .with_context(|| format!("binding {}", config.hostport))?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
            shutdown.trigger();
        }
    });

    server.run().await?;
    Ok(())
}
