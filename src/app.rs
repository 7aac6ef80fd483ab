//! Process lifecycle: build, serve, boot, wait, drain

use std::fs;

use color_eyre::eyre::{eyre, Result, WrapErr};
use mediaboot_bmc::{BootTarget, Orchestrator, RedfishConfig, RedfishConnector};
use mediaboot_iso::{ImageSpec, ImageSummary, InputSet, IsoImage};
use mediaboot_server::{MediaServer, ShutdownOutcome};
use tracing::{error, info, warn};
use url::Url;

use crate::config::{BmcSettings, Config};

pub async fn run(config: Config) -> Result<()> {
    // Registered up front so a signal during the build or the boot is not lost
    let mut signals = Signals::install().wrap_err("failed to install signal handlers")?;

    if let Some(missing) = config.tls_missing {
        warn!(missing, "Only one of HTTPS_KEY_FILE and HTTPS_CERT_FILE is set, TLS disabled");
    }

    let image = build_image(&config).await?;

    let image_url = config
        .route
        .url_for(&config.base_url, &config.image_name)
        .wrap_err("failed to build image URL")?;

    let server = MediaServer::new(config.server_config())
        .start()
        .await
        .wrap_err("failed to start media server")?;
    info!(
        url = %image_url,
        local_addr = %server.local_addr(),
        bytes = image.size_bytes,
        "Serving image"
    );

    match &config.bmc {
        Some(bmc) => boot(bmc, &config, image_url).await,
        None => info!("No BMC address configured, skipping virtual media boot"),
    }

    let signal = signals.recv().await;
    info!(signal, "Shutting down");

    match server
        .shutdown(config.shutdown_grace)
        .await
        .wrap_err("media server did not shut down cleanly")?
    {
        ShutdownOutcome::Graceful => info!("Shutdown complete"),
        ShutdownOutcome::Forced { aborted } => {
            warn!(aborted, "Shutdown complete after aborting open connections")
        }
    }
    Ok(())
}

/// Stage inputs, build the image and read it back before anyone is told its URL
async fn build_image(config: &Config) -> Result<ImageSummary> {
    let image_dir = config.image_dir();
    fs::create_dir_all(&image_dir)
        .wrap_err_with(|| format!("failed to create image directory {}", image_dir.display()))?;

    let work_dir = tempfile::Builder::new()
        .prefix("test-config")
        .tempdir_in(&config.data_dir)
        .wrap_err_with(|| {
            format!(
                "failed to create work directory in {}",
                config.data_dir.display()
            )
        })?;

    let inputs = match &config.input_dir {
        Some(dir) => InputSet::new().with_tree(dir),
        None => InputSet::default_payload(),
    };
    let spec = ImageSpec::new(
        work_dir.path(),
        config.volume_label.clone(),
        config.image_path(),
    );

    let summary = tokio::task::spawn_blocking(move || {
        let staged = inputs.stage(&spec.work_dir)?;
        info!(files = staged, work_dir = %spec.work_dir.display(), "Staged image inputs");
        spec.build()
    })
    .await
    .wrap_err("image build task failed")?
    .wrap_err("failed to build image")?;

    let image = IsoImage::open(&summary.path)
        .wrap_err_with(|| format!("failed to read back {}", summary.path.display()))?;
    if image.volume_id() != summary.volume_label.as_str() {
        return Err(eyre!(
            "image {} has volume id {:?}, expected {:?}",
            summary.path.display(),
            image.volume_id(),
            summary.volume_label.as_str()
        ));
    }
    info!(
        path = %summary.path.display(),
        files = image.files().len(),
        "Verified image"
    );

    work_dir
        .close()
        .wrap_err("failed to remove work directory")?;
    Ok(summary)
}

/// Run the virtual media boot once; failures are logged, not returned
async fn boot(bmc: &BmcSettings, config: &Config, image_url: Url) {
    let target = match BootTarget::from_address(&bmc.address, bmc.credentials.clone(), image_url)
    {
        Ok(target) => target,
        Err(e) => {
            error!(error = %e, "Virtual media boot skipped");
            return;
        }
    };

    let connector = RedfishConnector::new(
        RedfishConfig::new()
            .with_insecure(bmc.insecure)
            .with_timeout(bmc.timeout),
    );
    let orchestrator = Orchestrator::new(connector, config.dwell);

    info!(
        endpoint = %target.endpoint,
        system = target.system_label(),
        image = %target.image_url,
        "Starting virtual media boot"
    );
    match orchestrator.orchestrate(&target).await {
        Ok(report) => info!(
            system = %report.system,
            media = %report.media,
            ejected_first = report.ejected_first,
            cleanup = ?report.cleanup,
            "Virtual media boot complete"
        ),
        Err(e) => error!(
            stage = %e.stage(),
            error = %e,
            "Virtual media boot failed, still serving the image"
        ),
    }
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        "Ctrl+C"
    }
}
