//! ffmpeg invocation details: argument templates, sink descriptors and
//! stderr capture.

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assets::{DEFAULT_RECORDING_NAME, RECORDING_EXTENSION, RECORDING_TIMESTAMP_FORMAT};
use crate::pipeline::{EncoderRole, SinkCodec};

/// Session description telling the encoder where the relayed RTP arrives.
pub fn sdp_descriptor(name: &str, port: u16, payload_type: u8, codec: &SinkCodec) -> String {
    format!(
        "v=0\n\
         o=- 0 0 IN IP4 127.0.0.1\n\
         s={name}\n\
         c=IN IP4 127.0.0.1\n\
         t=0 0\n\
         m=video {port} RTP/AVP {payload_type}\n\
         a=rtpmap:{payload_type} {codec}\n"
    )
}

pub fn record_args(sdp: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-protocol_whitelist", "file,udp,rtp", "-f", "sdp", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(sdp.display().to_string());
    args.extend(
        [
            "-c:v", "libx264", "-preset", "ultrafast", "-crf", "22", "-pix_fmt", "yuv420p",
            "-movflags", "+faststart",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(output.display().to_string());
    args
}

pub fn live_args(sdp: &Path, url: &str) -> Vec<String> {
    let mut args: Vec<String> = ["-protocol_whitelist", "file,rtp,udp", "-f", "sdp", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(sdp.display().to_string());
    args.extend(
        [
            "-c:v", "libx264", "-preset", "ultrafast", "-tune", "zerolatency", "-maxrate",
            "3000k", "-bufsize", "6000k", "-pix_fmt", "yuv420p", "-g", "60", "-threads", "0",
            "-f", "flv",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(url.to_string());
    args
}

/// `<stem>_<timestamp>.mp4`, where the stem is the file stem of `base`.
///
/// Directory components and extensions in `base` are discarded so the
/// recording always lands in the recordings directory.
pub fn recording_file_name(base: &str, now: DateTime<Local>) -> String {
    format!("{}.{}", recording_stem(base, now), RECORDING_EXTENSION)
}

/// First recording path in `dir` that does not exist yet.
///
/// Recordings started within the same second get `_1`, `_2`, ... after the
/// timestamp. The record template passes `-y`.
pub async fn unique_recording_path(dir: &Path, base: &str, now: DateTime<Local>) -> PathBuf {
    let mut path = dir.join(recording_file_name(base, now));
    let stem = recording_stem(base, now);
    let mut index = 1u32;
    while tokio::fs::try_exists(&path).await.unwrap_or(false) {
        path = dir.join(format!("{}_{}.{}", stem, index, RECORDING_EXTENSION));
        index += 1;
    }
    path
}

fn recording_stem(base: &str, now: DateTime<Local>) -> String {
    let stem = Path::new(base.trim())
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(DEFAULT_RECORDING_NAME);

    format!("{}_{}", stem, now.format(RECORDING_TIMESTAMP_FORMAT))
}

pub fn log_file_name(role: EncoderRole) -> &'static str {
    match role {
        EncoderRole::Live => "ffmpeg_stream.log",
        EncoderRole::Record => "ffmpeg_record.log",
    }
}

pub fn sdp_file_name(role: EncoderRole) -> &'static str {
    match role {
        EncoderRole::Live => "stream.sdp",
        EncoderRole::Record => "record.sdp",
    }
}

/// Whether `binary` runs and answers `-version`.
pub async fn probe_available(binary: &Path) -> bool {
    let status = Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await;

    match status {
        Ok(status) => status.success(),
        Err(e) => {
            debug!("{} is not runnable: {}", binary.display(), e);
            false
        }
    }
}

fn is_error_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("error") || lower.contains("invalid") || lower.contains("failed")
}

/// Copy the encoder's stderr, line by line, into `log_path`.
///
/// The log is truncated on every launch. Ends on EOF (the process exited)
/// or when `cancel` fires.
pub fn spawn_log_drain(
    role: EncoderRole,
    stderr: ChildStderr,
    log_path: PathBuf,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut file = match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_path)
            .await
        {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("{} encoder: cannot open {}: {}", role, log_path.display(), e);
                None
            }
        };

        if let Some(file) = file.as_mut() {
            let header = format!(
                "=== {} encoder started {} ===\n",
                role,
                Local::now().format("%Y-%m-%d %H:%M:%S")
            );
            let _ = file.write_all(header.as_bytes()).await;
        }

        let mut lines = BufReader::new(stderr).lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        debug!("{} encoder: stderr read failed: {}", role, e);
                        break;
                    }
                }
            };

            if is_error_line(&line) {
                warn!("{} encoder: {}", role, line);
            }

            let failed = match file.as_mut() {
                Some(file) => file.write_all(format!("{}\n", line).as_bytes()).await.err(),
                None => None,
            };
            if let Some(e) = failed {
                // keep draining so the encoder never blocks on a full pipe
                warn!("{} encoder: log write failed, capture disabled: {}", role, e);
                file = None;
            }
        }

        if let Some(mut file) = file {
            let _ = file.flush().await;
        }
        info!("{} encoder: log capture finished", role);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sdp_descriptor() {
        let sdp = sdp_descriptor("castdeck-record", 5005, 96, &SinkCodec::default());
        assert_eq!(
            sdp,
            "v=0\no=- 0 0 IN IP4 127.0.0.1\ns=castdeck-record\nc=IN IP4 127.0.0.1\nt=0 0\n\
             m=video 5005 RTP/AVP 96\na=rtpmap:96 H264/90000\n"
        );
    }

    #[test]
    fn test_record_args_template() {
        let args = record_args(Path::new("record.sdp"), Path::new("recordings/show.mp4"));
        assert_eq!(
            args.join(" "),
            "-y -protocol_whitelist file,udp,rtp -f sdp -i record.sdp -c:v libx264 \
             -preset ultrafast -crf 22 -pix_fmt yuv420p -movflags +faststart recordings/show.mp4"
        );
    }

    #[test]
    fn test_live_args_template() {
        let args = live_args(Path::new("stream.sdp"), "rtmp://live.example/app/key");
        assert_eq!(
            args.join(" "),
            "-protocol_whitelist file,rtp,udp -f sdp -i stream.sdp -c:v libx264 \
             -preset ultrafast -tune zerolatency -maxrate 3000k -bufsize 6000k \
             -pix_fmt yuv420p -g 60 -threads 0 -f flv rtmp://live.example/app/key"
        );
    }

    #[test]
    fn test_recording_file_name() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        assert_eq!(recording_file_name("show", now), "show_2024-03-09_14-05-07.mp4");
        assert_eq!(recording_file_name("  ", now), "recording_2024-03-09_14-05-07.mp4");
        assert_eq!(recording_file_name("", now), "recording_2024-03-09_14-05-07.mp4");
        assert_eq!(
            recording_file_name("../../etc/show.mkv", now),
            "show_2024-03-09_14-05-07.mp4"
        );
    }

    #[tokio::test]
    async fn test_unique_recording_path_skips_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        let first = unique_recording_path(dir.path(), "show", now).await;
        assert_eq!(first, dir.path().join("show_2024-03-09_14-05-07.mp4"));
        std::fs::write(&first, b"moov").unwrap();

        let second = unique_recording_path(dir.path(), "show", now).await;
        assert_eq!(second, dir.path().join("show_2024-03-09_14-05-07_1.mp4"));
        std::fs::write(&second, b"moov").unwrap();

        let third = unique_recording_path(dir.path(), "show.mkv", now).await;
        assert_eq!(third, dir.path().join("show_2024-03-09_14-05-07_2.mp4"));

        // a missing directory has no clashes
        let fresh = unique_recording_path(&dir.path().join("nope"), "", now).await;
        assert_eq!(fresh, dir.path().join("nope").join("recording_2024-03-09_14-05-07.mp4"));
    }

    #[test]
    fn test_error_lines() {
        assert!(is_error_line("Error opening output file"));
        assert!(is_error_line("rtmp://x: Invalid argument"));
        assert!(!is_error_line("frame=  120 fps= 30 q=28.0 size=  512kB"));
    }

    #[tokio::test]
    async fn test_probe_missing_binary() {
        assert!(!probe_available(Path::new("/definitely/not/ffmpeg")).await);
    }
}
