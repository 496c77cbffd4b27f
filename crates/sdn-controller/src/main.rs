//! SDN controller daemon entry point.
//!
//! Loads the configuration and the controller certificates, then runs until
//! SIGINT or SIGTERM. SIGHUP reloads the configuration and certificates.
//!
//! The daemon does not connect to any pool by itself. The infrastructure
//! client ([`InfraApi`](sdn_controller::InfraApi)) and the virtual-switch
//! protocol ([`SwitchProtocol`](sdn_controller::SwitchProtocol)) are
//! provided by the embedding layer, which hands connected pools to
//! [`OverlayController::on_pool_connected`] and builds the controller with
//! [`OverlayController::with_switch_protocol`]. Until then every switch
//! call fails with [`UnconfiguredSwitch`](sdn_controller::UnconfiguredSwitch).

use anyhow::Context;
use clap::Parser;
use sdn_controller::logging::init_logging;
use sdn_controller::{
    CertificateSource, CertificateStore, ControllerConfig, ControllerOptions, OverlayController,
    DEFAULT_CONFIG_PATH,
};
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

/// SDN overlay network controller
#[derive(Parser, Debug)]
#[command(name = "sdn-controllerd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Reinstall the CA certificate on every managed pool
    #[arg(long)]
    override_certs: bool,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<ControllerConfig> {
        let mut config = ControllerConfig::load_or_default(&self.config)?;
        if self.override_certs {
            config.certificates.override_certs = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, config.logging.format);

    info!(
        config = %args.config.display(),
        call_timeout_secs = config.controller.call_timeout_secs,
        switch_port = config.controller.switch_port,
        "Starting SDN controller"
    );

    let mut store = CertificateStore::new(CertificateSource::from_config(&config.certificates));
    let credentials = store
        .refresh()
        .await
        .context("failed to load controller certificates")?;
    info!(cert_dir = %store.source().dir().display(), "Controller certificates loaded");

    let controller = OverlayController::new(credentials, ControllerOptions::from_config(&config));
    info!("SDN controller ready, waiting for pool connections");

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT");
                break;
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM");
                break;
            }
            _ = hangup.recv() => {
                info!("Received SIGHUP, reloading configuration");
                if let Err(e) = reload(&args, &mut store, &controller).await {
                    error!(error = %e, "Reload failed, keeping current configuration");
                }
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}

async fn reload(
    args: &Args,
    store: &mut CertificateStore,
    controller: &OverlayController,
) -> anyhow::Result<()> {
    let config = args.load_config()?;

    let source = CertificateSource::from_config(&config.certificates);
    if &source != store.source() {
        *store = CertificateStore::new(source);
    }
    let credentials = store.refresh().await?;

    controller
        .reconfigure(credentials, config.certificates.override_certs)
        .await;
    Ok(())
}
