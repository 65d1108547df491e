//! Stop path for encoder jobs
//!
//! A recording is asked to quit through ffmpeg's interactive `q` command,
//! which makes it write the trailing container metadata. Only if it ignores
//! the request for the whole grace period is it killed.

use log::{info, warn};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::encoder::{EncoderJob, JobOutput};
use crate::error::FinalizeTimeout;
use crate::pipeline::EncoderRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopOutcome {
    /// Exited on its own after the quit request
    Graceful,
    /// Killed
    Forced,
}

/// Advisory check of the produced file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutputCheck {
    Verified { size: u64 },
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub role: EncoderRole,
    pub outcome: StopOutcome,
    /// Only for jobs that write a file
    pub output: Option<OutputCheck>,
    pub exit_code: Option<i32>,
}

pub struct RecordingFinalizer {
    grace: Duration,
}

impl RecordingFinalizer {
    pub fn new(grace: Duration) -> RecordingFinalizer {
        RecordingFinalizer { grace }
    }

    pub async fn finalize(&self, mut job: EncoderJob) -> StopReport {
        if let Some(mut stdin) = job.stdin.take() {
            let request = async {
                stdin.write_all(b"q\n").await?;
                stdin.flush().await
            };
            if let Err(e) = request.await {
                warn!("{} encoder: quit request not delivered: {}", job.role, e);
            }
            // stdin stays open until the process is gone
            job.stdin = Some(stdin);
        }

        let (outcome, exit_code) = match tokio::time::timeout(self.grace, &mut job.exited).await {
            Ok(exit) => (StopOutcome::Graceful, exit.ok().flatten()),
            Err(_) => {
                warn!(
                    "{}",
                    FinalizeTimeout {
                        output: job.output.display_path(),
                        grace: self.grace,
                    }
                );
                (StopOutcome::Forced, kill(&mut job).await)
            }
        };

        job.stdin = None;
        job.log_cancel.cancel();

        let output = match &job.output {
            JobOutput::File(path) => Some(check_output(path).await),
            JobOutput::Url(_) => None,
        };

        info!(
            "{} encoder stopped ({:?}, exit code {:?}) after {}s",
            job.role,
            outcome,
            exit_code,
            job.elapsed().as_secs()
        );

        StopReport {
            role: job.role,
            outcome,
            output,
            exit_code,
        }
    }
}

/// Kill the job right away. Used for live jobs, which have nothing to finalize.
pub async fn terminate(mut job: EncoderJob) -> StopReport {
    let exit_code = kill(&mut job).await;
    job.log_cancel.cancel();
    info!("{} encoder killed after {}s", job.role, job.elapsed().as_secs());

    StopReport {
        role: job.role,
        outcome: StopOutcome::Forced,
        output: None,
        exit_code,
    }
}

async fn kill(job: &mut EncoderJob) -> Option<i32> {
    job.kill.cancel();
    (&mut job.exited).await.ok().flatten()
}

async fn check_output(path: &Path) -> OutputCheck {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {
            info!("Recording saved: {} ({} bytes)", path.display(), meta.len());
            OutputCheck::Verified { size: meta.len() }
        }
        _ => {
            warn!("Recording missing after stop: {}", path.display());
            OutputCheck::Missing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_output_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("show.mp4");
        assert_eq!(check_output(&path).await, OutputCheck::Missing);

        std::fs::write(&path, b"ftyp").unwrap();
        assert_eq!(check_output(&path).await, OutputCheck::Verified { size: 4 });
    }

    #[test]
    fn test_report_serializes_outcome() {
        let report = StopReport {
            role: EncoderRole::Record,
            outcome: StopOutcome::Graceful,
            output: Some(OutputCheck::Verified { size: 10 }),
            exit_code: Some(0),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["role"], "record");
        assert_eq!(json["outcome"], "graceful");
        assert_eq!(json["output"]["status"], "verified");
        assert_eq!(json["output"]["size"], 10);
    }
}
