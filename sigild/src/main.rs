// SPDX-License-Identifier: MIT OR Apache-2.0

//! The webhook server: loads validator configuration and image policy, wires
//! the admission pipeline, and serves `/mutate`, `/health` and `/ready`.

#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod alerts;
mod error;
mod server;

use crate::alerts::AlertRouter;
use crate::error::{Error, Result};
use clap::Parser;
use log::{error, info, LevelFilter};
use sigil::admission::Admitter;
use sigil::cluster::{ClusterApi, KubeCluster};
use sigil::config::Config;
use sigil::policy::ImagePolicy;
use sigil::util::install_cert;
use sigil::validators::Validators;
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};
use snafu::ResultExt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Mutating admission webhook that verifies container image signatures and
/// pins images to their signed digests.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Validator configuration file.
    #[arg(long, env = "SIGIL_CONFIG", default_value = "/etc/sigil/config.yaml")]
    config: PathBuf,

    /// Secrets file merged into the configuration by validator name.
    #[arg(long, env = "SIGIL_SECRETS")]
    secrets: Option<PathBuf>,

    /// Image policy file.
    #[arg(long, env = "SIGIL_POLICY", default_value = "/etc/sigil/policy.yaml")]
    policy: PathBuf,

    /// Alerting configuration file.
    #[arg(long, env = "SIGIL_ALERTS")]
    alerts: Option<PathBuf>,

    /// Directory for cached self-signed notary certificates.
    #[arg(long, env = "SIGIL_CERT_DIR", default_value = "/etc/sigil/certs")]
    cert_dir: PathBuf,

    /// Listen address.
    #[arg(long, env = "SIGIL_LISTEN", default_value = "0.0.0.0:5000")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = run(args).await {
        // The logger may not be up yet.
        error!("{err}");
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logger()?;

    let config = Config::load(&args.config, args.secrets.as_deref())?;
    for entry in config.validators() {
        if let Some(cert) = &entry.cert {
            let path = install_cert(&args.cert_dir, &entry.name, cert)?;
            info!("cached certificate for {} at {}", entry.name, path.display());
        }
    }
    let validators = Validators::from_config(&config)?;
    let policy = ImagePolicy::load(&args.policy)?;
    let alerts = match &args.alerts {
        Some(path) => AlertRouter::load(path)?,
        None => AlertRouter::disabled(),
    };

    let detection_mode = std::env::var("DETECTION_MODE").as_deref() == Ok("1");
    if detection_mode {
        info!("detection mode is on: failures will be warnings");
    }

    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new().await?);
    let state = Arc::new(server::AppState {
        admitter: Admitter::new(validators, policy, Arc::clone(&cluster), detection_mode),
        cluster,
        alerts,
        readiness: server::ReadinessTargets {
            namespace: std::env::var("SIGIL_NAMESPACE").ok(),
            sentinel: std::env::var("SIGIL_SENTINEL").ok(),
            webhook: std::env::var("SIGIL_WEBHOOK").ok(),
        },
    });

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .context(error::BindSnafu {
            addr: args.listen.to_string(),
        })?;
    info!("listening on {}", args.listen);
    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context(error::ServeSnafu)?;
    Ok(())
}

fn init_logger() -> Result<()> {
    let level = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| level.to_lowercase().parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    TermLogger::init(
        level,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .map_err(|source| Error::Logger { source })
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
