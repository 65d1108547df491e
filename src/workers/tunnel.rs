//! Reverse SSH tunnel exposing the HTTP port through localhost.run

use log::{debug, info, warn};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};

use crate::assets::{TUNNEL_DOMAIN_SUFFIXES, TUNNEL_URL_WAIT};
use crate::error::TunnelError;

/// Returned instead of a URL when none showed up in time.
pub const TUNNEL_TIMEOUT: &str = "timeout";

#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub url_wait: Duration,
}

impl TunnelSettings {
    pub fn localhost_run(port: u16) -> TunnelSettings {
        TunnelSettings {
            program: PathBuf::from("ssh"),
            args: vec![
                "-T".to_string(),
                "-o".to_string(),
                "StrictHostKeyChecking=no".to_string(),
                "-o".to_string(),
                "UserKnownHostsFile=/dev/null".to_string(),
                "-R".to_string(),
                format!("80:localhost:{}", port),
                "nokey@localhost.run".to_string(),
            ],
            url_wait: TUNNEL_URL_WAIT,
        }
    }
}

/// Find the public URL in one line of tunnel output.
pub fn extract_tunnel_url(line: &str) -> Option<String> {
    let candidates = line.split_whitespace().map(|token| {
        token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '.' && c != ':' && c != '/' && c != '-')
    });

    let mut bare = None;
    for token in candidates {
        let host = token
            .strip_prefix("https://")
            .or_else(|| token.strip_prefix("http://"))
            .unwrap_or(token);
        if !TUNNEL_DOMAIN_SUFFIXES.iter().any(|suffix| host.ends_with(suffix)) {
            continue;
        }
        if token.starts_with("https://") {
            return Some(token.to_string());
        }
        if bare.is_none() {
            bare = Some(format!("https://{}", host));
        }
    }
    bare
}

enum TunnelProcess {
    Closed,
    /// Spawned, waiting for the URL; the child is owned by the pending toggle
    Opening,
    Open(Child),
}

pub struct TunnelManager {
    settings: TunnelSettings,
    /// Serializes toggles
    toggling: Mutex<()>,
    /// Locked only for state changes, never across the URL wait
    process: Mutex<TunnelProcess>,
}

impl TunnelManager {
    pub fn new(settings: TunnelSettings) -> TunnelManager {
        TunnelManager {
            settings,
            toggling: Mutex::new(()),
            process: Mutex::new(TunnelProcess::Closed),
        }
    }

    pub async fn is_open(&self) -> bool {
        matches!(*self.process.lock().await, TunnelProcess::Open(_))
    }

    pub async fn is_opening(&self) -> bool {
        matches!(*self.process.lock().await, TunnelProcess::Opening)
    }

    /// Open the tunnel and return its URL, or close it and return `""`.
    ///
    /// When no URL is seen within the wait budget the tunnel is left open
    /// and [`TUNNEL_TIMEOUT`] is returned.
    pub async fn toggle(&self) -> Result<String, TunnelError> {
        let _toggling = self.toggling.lock().await;

        {
            let mut process = self.process.lock().await;
            let previous = std::mem::replace(&mut *process, TunnelProcess::Closed);
            if let TunnelProcess::Open(mut child) = previous {
                drop(process);
                info!("Closing tunnel");
                if let Err(e) = child.kill().await {
                    warn!("Tunnel kill failed: {}", e);
                }
                return Ok(String::new());
            }
            *process = TunnelProcess::Opening;
        }

        let result = self.open().await;

        let mut process = self.process.lock().await;
        let still_opening = matches!(*process, TunnelProcess::Opening);
        match result {
            Ok((mut child, url)) => {
                if !still_opening {
                    drop(process);
                    info!("Tunnel closed while opening");
                    let _ = child.kill().await;
                    return Ok(String::new());
                }
                *process = TunnelProcess::Open(child);
                Ok(url)
            }
            Err(e) => {
                *process = TunnelProcess::Closed;
                Err(e)
            }
        }
    }

    /// Spawn the tunnel and wait for its URL.
    async fn open(&self) -> Result<(Child, String), TunnelError> {
        info!("Opening tunnel: {} {}", self.settings.program.display(), self.settings.args.join(" "));
        let mut child = Command::new(&self.settings.program)
            .args(&self.settings.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(TunnelError::Launch)?;

        let stdout = child.stdout.take().ok_or(TunnelError::NoOutput)?;
        let (url_tx, url_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut url_tx = Some(url_tx);
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("tunnel: {}", line);
                if let Some(url) = extract_tunnel_url(&line) {
                    if let Some(tx) = url_tx.take() {
                        let _ = tx.send(url);
                    }
                }
            }
            debug!("Tunnel output closed");
        });

        match tokio::time::timeout(self.settings.url_wait, url_rx).await {
            Ok(Ok(url)) => {
                info!("Tunnel open at {}", url);
                Ok((child, url))
            }
            Ok(Err(_)) => {
                let _ = child.kill().await;
                Err(TunnelError::Exited)
            }
            Err(_) => {
                warn!("No tunnel URL within {:?}", self.settings.url_wait);
                Ok((child, TUNNEL_TIMEOUT.to_string()))
            }
        }
    }

    /// Kill the tunnel. A toggle still waiting for the URL kills its process
    /// once the wait ends.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.process.lock().await, TunnelProcess::Closed);
        if let TunnelProcess::Open(mut child) = previous {
            let _ = child.kill().await;
            info!("Tunnel closed");
        }
    }
}
