use crate::config::{StudioConfig, command};
use crate::studio::Studio;
use crate::utils::helpers::open_link;
use crate::utils::net::signaling::SignalingServer;
use anyhow::Context;
use log::{error, info};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::{panic, process};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub mod api;
pub mod assets;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod studio;
pub mod utils;
pub mod workers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = command().get_matches();
    let config = StudioConfig::from_matches(&matches)?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_target(false)
        .init();

    // kill the process as soon as a task panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);
        process::exit(105);
    }));

    let http_listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.http_port))
        .await
        .with_context(|| format!("cannot bind HTTP port {}", config.http_port))?;
    let signaling_listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.signaling_port))
        .await
        .with_context(|| format!("cannot bind signaling port {}", config.signaling_port))?;

    let studio_url = config.studio_url();
    let open_browser = config.open_browser;
    let studio = Arc::new(Studio::new(config).context("cannot initialise the WebRTC engine")?);

    let cancel = CancellationToken::new();

    let signaling = tokio::spawn(
        SignalingServer::new(studio.signaling()).serve(signaling_listener, cancel.clone()),
    );
    let http = tokio::spawn(api::serve(Arc::clone(&studio), http_listener, cancel.clone()));

    println!("{}", assets::BANNER);
    println!(" Studio ready: {}", studio_url);
    println!(" Press Ctrl+C to shut the studio down.\n");

    if open_browser {
        tokio::spawn(async move {
            tokio::time::sleep(assets::BROWSER_LAUNCH_DELAY).await;
            open_link(&studio_url);
        });
    }

    shutdown_signal().await;
    cancel.cancel();

    studio.shutdown().await;

    match http.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("HTTP server error: {:#}", e),
        Err(e) => error!("HTTP server task failed: {}", e),
    }
    let _ = signaling.await;

    info!("Bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
