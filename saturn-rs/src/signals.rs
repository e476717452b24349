//! Installs a signal handler which terminates the platform on CTRL+C, SIGHUP or SIGTERM.
//!
//! Forks an async task which waits for one of these signals and then invokes
//! [Platform::terminate](crate::platform::Platform::terminate) on the given platform. The
//! [HttpServer](crate::http::HttpServer) picks this up and gracefully closes its socket.
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};

use crate::platform::Platform;

/// Installs a signal handler for the given platform.
///
/// Note that this is automatically called by the [Builder](crate::builder::Builder) unless it is
/// disabled.
pub fn install(platform: Arc<Platform>) {
    let _ = tokio::spawn(async move {
        let (mut sig_hup, mut sig_term) = match (
            signal(SignalKind::hangup()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(sig_hup), Ok(sig_term)) => (sig_hup, sig_term),
            (Err(error), _) | (_, Err(error)) => {
                log::error!("Failed to install signal handlers: {}", error);
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received CTRL-C. Shutting down...");
            },
            _ = sig_hup.recv() => {
                log::info!("Received SIGHUP. Shutting down...");
            },
            _ = sig_term.recv() => {
                log::info!("Received SIGTERM. Shutting down...");
            }
        }

        platform.terminate();
    });
}
