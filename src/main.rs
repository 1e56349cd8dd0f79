//! remote-mount daemon entry point

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use remote_mount::catalog::{provider_display_name, UNKNOWN_PROVIDER};
use remote_mount::config::Config;
use remote_mount::mount::MountManager;

/// Print usage information
fn print_usage() {
    eprintln!("Usage: remote-mount <config.yaml>");
    eprintln!();
    eprintln!("remote-mount - mount rclone remotes as local filesystems");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.yaml    Path to configuration file");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  remote-mount ~/.config/remote-mount/config.yaml");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        print_usage();
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);

    // Load configuration
    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("remote-mount starting");
    info!("Loaded configuration from {:?}", config_path);

    let manager = Arc::new(MountManager::new(config.manager.clone()));
    info!(
        "Mount base directory: {:?} ({:?})",
        manager.base_dir(),
        manager.platform()
    );

    if !manager.check_installed().await {
        error!("{} is not installed or not runnable", config.manager.binary);
        std::process::exit(1);
    }

    // Set up signal handling for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let remotes = manager.list_remotes().await?;
    if remotes.is_empty() {
        warn!("No rclone remotes configured (run `rclone config` to add one)");
    }
    for remote in &remotes {
        info!("Remote {}: {}", remote.name, remote.provider_name());
    }

    // Mount the configured remotes
    for name in &config.auto_mount {
        let provider_type = remotes
            .iter()
            .find(|r| &r.name == name)
            .map(|r| r.provider_type.as_str());

        let provider_type = match provider_type {
            Some(t) => t,
            None => {
                warn!("auto_mount remote {:?} is not configured in rclone", name);
                UNKNOWN_PROVIDER
            }
        };

        match manager.mount(name, provider_type).await {
            Ok(outcome) => info!(
                "{} ({}) mounted at {:?}",
                name,
                provider_display_name(provider_type),
                outcome.mount_path
            ),
            Err(e) => error!("Failed to mount {}: {}", name, e),
        }
    }

    if !config.auto_mount.is_empty() && manager.count() == 0 {
        error!("No remotes were mounted successfully");
        std::process::exit(1);
    }

    info!("{} remote(s) mounted", manager.count());
    info!("Press Ctrl+C to unmount and exit");

    // Wait for shutdown signal, reporting status periodically
    let mut last_report = tokio::time::Instant::now();
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;

        if last_report.elapsed() >= config.status_interval {
            last_report = tokio::time::Instant::now();
            for status in manager.get_mounted().await {
                match (status.used_bytes, status.total_bytes) {
                    (Some(used), Some(total)) => info!(
                        "{} at {:?}: {} of {} bytes used",
                        status.remote_name, status.mount_path, used, total
                    ),
                    _ => info!("{} at {:?}", status.remote_name, status.mount_path),
                }
            }
        }
    }

    info!("Shutting down");
    let reports = manager.unmount_all().await;
    for report in reports.iter().filter(|r| !r.is_clean()) {
        for failure in &report.failures {
            warn!("{}: {} failed: {}", report.remote_name, failure.step, failure.reason);
        }
    }
    info!("All remotes unmounted, exiting");

    Ok(())
}
