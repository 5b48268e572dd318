//! Watch daemon commands: run, status, stop

use anyhow::Result;
use std::path::Path;

use crate::adapter::AdapterRegistry;
use crate::config::Config;
use crate::store::Store;
use crate::watch::{
    is_pid_running, pid_file_path, read_pid, remove_pid_file, write_pid_file, Coordinator,
};

/// Run the coordinator in the foreground until SIGINT/SIGTERM.
pub async fn run(
    store: Store,
    registry: AdapterRegistry,
    config: Config,
    device_id: String,
    data_dir: &Path,
) -> Result<()> {
    let pid_path = pid_file_path(data_dir);
    if let Some(pid) = read_pid(&pid_path) {
        if is_pid_running(pid) {
            println!("Watcher already running (pid {}).", pid);
            return Ok(());
        }
        // Stale file from an unclean exit.
        remove_pid_file(&pid_path);
    }
    write_pid_file(&pid_path)?;

    let mut coordinator = Coordinator::new(store, registry, config, device_id);
    coordinator.start();
    println!("Watching. Ctrl-C to stop.");

    wait_for_shutdown_signal().await;

    coordinator.stop().await;
    remove_pid_file(&pid_path);
    println!("Stopped.");
    Ok(())
}

pub fn status(data_dir: &Path) -> Result<()> {
    let pid_path = pid_file_path(data_dir);
    match read_pid(&pid_path) {
        Some(pid) if is_pid_running(pid) => println!("Running (pid {}).", pid),
        Some(_) => println!("Not running (stale pid file)."),
        None => println!("Not running."),
    }
    Ok(())
}

pub fn stop(data_dir: &Path) -> Result<()> {
    let pid_path = pid_file_path(data_dir);
    match read_pid(&pid_path) {
        Some(pid) if is_pid_running(pid) => {
            #[cfg(unix)]
            {
                let ok = std::process::Command::new("kill")
                    .arg(pid.to_string())
                    .status()
                    .map(|s| s.success())
                    .unwrap_or(false);
                if ok {
                    println!("Sent stop signal to pid {}.", pid);
                } else {
                    println!("Could not signal pid {}.", pid);
                }
            }
            #[cfg(not(unix))]
            println!("Stop is not supported on this platform; kill pid {} manually.", pid);
        }
        _ => println!("Not running."),
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
