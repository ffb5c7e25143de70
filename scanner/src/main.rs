use std::path::PathBuf;
use std::sync::Arc;

use qr_gate_common::config::Config;
use qr_gate_scanner::{LogFeedback, QrDecoder, ScanSession};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        camera = %config.camera.url,
        mode = %config.camera.mode,
        interval_ms = config.sampler.interval_ms,
        "starting qr-gate scanner"
    );

    let source = match qr_gate_producer::open_camera(&config.camera).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to acquire camera");
            std::process::exit(1);
        }
    };

    let mut session = match ScanSession::new(
        source,
        Arc::new(QrDecoder::new()),
        Arc::new(LogFeedback),
        config.sampler.interval(),
    ) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create scan session");
            std::process::exit(1);
        }
    };

    // Log status transitions, not every tick.
    let mut updates = session.subscribe();
    tokio::spawn(async move {
        let mut last = updates.borrow_and_update().status;
        while updates.changed().await.is_ok() {
            let update = updates.borrow_and_update().clone();
            if update.status != last {
                info!(
                    status = ?update.status,
                    decoded = update.decoded.as_deref().unwrap_or(""),
                    text = %update.text(),
                    "status changed"
                );
                last = update.status;
            }
        }
    });

    if let Err(e) = session.set_target(config.session.target.clone()) {
        error!(error = %e, "failed to apply initial target");
        std::process::exit(1);
    }
    if session.target().is_empty() {
        info!("no target selected; type a target value and press enter");
    }

    // Each stdin line selects a new target; an empty line clears it.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Err(e) = session.set_target(line) {
                        warn!(error = %e, "failed to apply target");
                    }
                }
                Ok(None) => {
                    // stdin closed; keep scanning until interrupted
                    if tokio::signal::ctrl_c().await.is_err() {
                        warn!("failed to listen for ctrl-c");
                    }
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read target from stdin");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown();
    info!("scanner stopped");
}
