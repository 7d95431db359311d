use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use tether_bridge::{Bridge, DispatchMode};
use tether_protocol::BridgeConfig;

fn parse_args() -> (Option<PathBuf>, Option<u16>) {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut port_override = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--signalling-port" | "-p" => {
                if i + 1 < args.len() {
                    port_override = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "-V" | "--version" => {
                println!("tether-bridge {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-h" | "--help" => {
                println!("tether-bridge - application-to-renderer WebRTC bridge");
                println!();
                println!("USAGE:");
                println!("    tether-bridge [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -c, --config <PATH>           JSON configuration file");
                println!("    -p, --signalling-port <PORT>  Override the signalling port");
                println!("    -V, --version                 Print version and exit");
                println!("    -h, --help                    Print this help and exit");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    (config_path, port_override)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (config_path, port_override) = parse_args();

    let mut config = match config_path {
        Some(path) => BridgeConfig::load(&path)?,
        None => {
            tracing::info!("No --config given, using built-in defaults");
            BridgeConfig::default()
        }
    };
    if let Some(port) = port_override {
        config.signalling_port = port;
    }
    if let Err(issues) = config.validate() {
        let has_errors = issues.iter().any(|issue| issue.starts_with("ERROR:"));
        for issue in &issues {
            if issue.starts_with("ERROR:") {
                tracing::error!("{issue}");
            } else {
                tracing::warn!("{issue}");
            }
        }
        if has_errors {
            tracing::error!(
                "Configuration has {} issue(s). Fix the ERROR(s) above and restart.",
                issues.len()
            );
            std::process::exit(1);
        }
    }

    let bridge = Bridge::new(config);
    bridge.init_connection()?;
    if bridge.establish() {
        tracing::info!("Bridgehead answered the liveness ping");
    } else {
        tracing::warn!("Bridgehead did not answer the liveness ping; continuing anyway");
    }
    bridge.start_dispatcher(DispatchMode::Bridge)?;
    bridge.start_listener();

    // Keep signalling alive with backoff until told to quit.
    let signalling = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(2);
            let max_backoff = Duration::from_secs(60);
            loop {
                match bridge.start_signalling().await {
                    Ok(()) => {
                        tracing::info!("Signalling connection closed cleanly");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Signalling connection error: {e:#}");
                        tracing::info!("Reconnecting in {} seconds...", backoff.as_secs());
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(max_backoff);
                    }
                }
            }
        })
    };

    tokio::select! {
        _ = signalling => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
        }
    }
    bridge.stop();
    Ok(())
}
