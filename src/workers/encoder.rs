//! Encoder subprocess lifecycle
//!
//! Two independent ffmpeg jobs, `live` and `record`, each fed by its own
//! relay sink. A job moves through [`JobState`]:
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Stopped -> Starting ...
//!            |           |
//!            v           v
//!          Idle       Stopped   (aborted start / exited on its own)
//! ```
//!
//! The slot table is only locked for state changes, never across a
//! readiness wait or a graceful stop.

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;

use super::ffmpeg;
use super::finalizer::{RecordingFinalizer, StopReport, terminate};
use crate::assets::{
    FINALIZE_GRACE, LIVE_SINK_PORT, LOGS_DIR, READINESS_WAIT, RECORD_SINK_PORT, RECORDINGS_DIR,
    SINK_PAYLOAD_TYPE,
};
use crate::error::EncoderError;
use crate::pipeline::{EncoderRole, JobState, RelayFanout, UdpSink, UnitSink};
use crate::utils::net::webrtc::KeyframeRequester;

#[derive(Debug, Clone)]
pub struct EncoderSettings {
    /// ffmpeg binary, looked up in `PATH` when not absolute
    pub ffmpeg: PathBuf,
    /// Root for `logs/`, `recordings/` and the sink descriptors
    pub data_dir: PathBuf,
    pub live_port: u16,
    pub record_port: u16,
    pub payload_type: u8,
    /// How long a recording start waits for the first relayed packet
    pub readiness_wait: Duration,
    /// How long a recording gets to finalize before it is killed
    pub finalize_grace: Duration,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        EncoderSettings {
            ffmpeg: PathBuf::from("ffmpeg"),
            data_dir: PathBuf::from("."),
            live_port: LIVE_SINK_PORT,
            record_port: RECORD_SINK_PORT,
            payload_type: SINK_PAYLOAD_TYPE,
            readiness_wait: READINESS_WAIT,
            finalize_grace: FINALIZE_GRACE,
        }
    }
}

impl EncoderSettings {
    fn sink_port(&self, role: EncoderRole) -> u16 {
        match role {
            EncoderRole::Live => self.live_port,
            EncoderRole::Record => self.record_port,
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join(LOGS_DIR)
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.data_dir.join(RECORDINGS_DIR)
    }
}

#[derive(Debug, Clone)]
pub enum JobOutput {
    Url(String),
    File(PathBuf),
}

impl JobOutput {
    pub fn display_path(&self) -> PathBuf {
        match self {
            JobOutput::Url(url) => PathBuf::from(url),
            JobOutput::File(path) => path.clone(),
        }
    }
}

impl std::fmt::Display for JobOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutput::Url(url) => f.write_str(url),
            JobOutput::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// One running ffmpeg subprocess.
///
/// The `Child` itself is owned by the waiter task; the job keeps the
/// handles needed to ask it to quit, kill it and learn that it exited.
pub struct EncoderJob {
    pub(crate) role: EncoderRole,
    pub(crate) output: JobOutput,
    pub(crate) log_path: PathBuf,
    pub(crate) started_at: DateTime<Local>,
    pub(crate) started: Instant,
    pub(crate) stdin: Option<ChildStdin>,
    /// Cancelling it makes the waiter kill the process, exactly once
    pub(crate) kill: CancellationToken,
    /// Exit code, `None` when killed
    pub(crate) exited: oneshot::Receiver<Option<i32>>,
    pub(crate) log_cancel: CancellationToken,
}

impl EncoderJob {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingStarted {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub role: EncoderRole,
    pub state: &'static str,
    pub output: Option<String>,
    pub started_at: Option<String>,
    pub running_secs: Option<u64>,
    pub log: Option<PathBuf>,
}

struct RoleSlot {
    state: JobState,
    generation: u64,
    abort: CancellationToken,
    job: Option<EncoderJob>,
}

impl RoleSlot {
    fn new() -> RoleSlot {
        RoleSlot {
            state: JobState::Idle,
            generation: 0,
            abort: CancellationToken::new(),
            job: None,
        }
    }

    fn transition(&mut self, role: EncoderRole, next: JobState) {
        if !self.state.can_transition_to(&next) {
            warn!("{} encoder: unexpected transition {} -> {}", role, self.state, next);
        }
        debug!("{} encoder: {} -> {}", role, self.state, next);
        self.state = next;
    }
}

type Slots = Arc<Mutex<[RoleSlot; 2]>>;

pub struct EncoderProcessManager {
    settings: EncoderSettings,
    relay: Arc<RelayFanout>,
    keyframes: Arc<dyn KeyframeRequester>,
    finalizer: RecordingFinalizer,
    slots: Slots,
}

impl EncoderProcessManager {
    pub fn new(
        settings: EncoderSettings,
        relay: Arc<RelayFanout>,
        keyframes: Arc<dyn KeyframeRequester>,
    ) -> EncoderProcessManager {
        EncoderProcessManager {
            finalizer: RecordingFinalizer::new(settings.finalize_grace),
            settings,
            relay,
            keyframes,
            slots: Arc::new(Mutex::new([RoleSlot::new(), RoleSlot::new()])),
        }
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Start recording to `recordings/<stem>_<timestamp>.mp4`, suffixed with
    /// `_<n>` when that file already exists.
    ///
    /// Waits for the first relayed packet, at most `readiness_wait`, so the
    /// encoder does not open an empty input.
    pub async fn start_recording(&self, base_name: &str) -> Result<RecordingStarted, EncoderError> {
        let role = EncoderRole::Record;
        let (generation, abort) = self.begin(role).await?;

        let output =
            ffmpeg::unique_recording_path(&self.settings.recordings_dir(), base_name, Local::now())
                .await;

        self.launch(role, generation, &abort, JobOutput::File(output.clone()), true)
            .await?;
        Ok(RecordingStarted { path: output })
    }

    /// Start broadcasting to `url`. Does not wait for readiness.
    pub async fn start_stream(&self, url: &str) -> Result<(), EncoderError> {
        let role = EncoderRole::Live;
        let url = url.trim();
        if url.is_empty() {
            return Err(EncoderError::InvalidDestination {
                role,
                reason: "empty url".to_string(),
            });
        }

        let (generation, abort) = self.begin(role).await?;
        self.launch(role, generation, &abort, JobOutput::Url(url.to_string()), false)
            .await
    }

    async fn begin(&self, role: EncoderRole) -> Result<(u64, CancellationToken), EncoderError> {
        let mut slots = self.slots.lock().await;
        let slot = &mut slots[role.index()];
        if slot.state.is_active() {
            return Err(EncoderError::AlreadyRunning(role));
        }
        slot.transition(role, JobState::Starting);
        slot.generation += 1;
        slot.abort = CancellationToken::new();
        Ok((slot.generation, slot.abort.clone()))
    }

    async fn launch(
        &self,
        role: EncoderRole,
        generation: u64,
        abort: &CancellationToken,
        output: JobOutput,
        await_readiness: bool,
    ) -> Result<(), EncoderError> {
        match self
            .try_launch(role, generation, abort, output, await_readiness)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.relay.detach(role).await;
                let mut slots = self.slots.lock().await;
                let slot = &mut slots[role.index()];
                if slot.generation == generation && slot.state == JobState::Starting {
                    slot.transition(role, JobState::Idle);
                }
                error!("{} encoder start failed: {}", role, e);
                Err(e)
            }
        }
    }

    async fn try_launch(
        &self,
        role: EncoderRole,
        generation: u64,
        abort: &CancellationToken,
        output: JobOutput,
        await_readiness: bool,
    ) -> Result<(), EncoderError> {
        self.keyframes.request_active_keyframe().await;

        let port = self.settings.sink_port(role);
        let sink = UdpSink::loopback(port)
            .await
            .map_err(|e| EncoderError::io(format!("{} sink on port {}", role, port), e))?;
        info!("{} encoder: relaying to {}", role, sink.describe());
        let mut ready = self.relay.attach(role, Arc::new(sink)).await;

        if await_readiness {
            tokio::select! {
                _ = abort.cancelled() => return Err(EncoderError::StartAborted(role)),
                signal = tokio::time::timeout(self.settings.readiness_wait, ready.recv()) => {
                    match signal {
                        Ok(Some(())) => info!("{} encoder: media is flowing", role),
                        _ => warn!(
                            "{} encoder: no media within {:?}, starting anyway",
                            role, self.settings.readiness_wait
                        ),
                    }
                }
            }
        }

        if abort.is_cancelled() {
            return Err(EncoderError::StartAborted(role));
        }

        let logs_dir = self.settings.logs_dir();
        create_dir(&logs_dir).await?;
        if let JobOutput::File(path) = &output {
            if let Some(parent) = path.parent() {
                create_dir(parent).await?;
            }
        }

        let codec = self.keyframes.active_codec().await.unwrap_or_default();
        let sdp_path = self.settings.data_dir.join(ffmpeg::sdp_file_name(role));
        let sdp = ffmpeg::sdp_descriptor(
            &format!("castdeck-{}", role),
            port,
            self.settings.payload_type,
            &codec,
        );
        tokio::fs::write(&sdp_path, sdp)
            .await
            .map_err(|e| EncoderError::io(format!("writing {}", sdp_path.display()), e))?;

        let args = match &output {
            JobOutput::File(path) => ffmpeg::record_args(&sdp_path, path),
            JobOutput::Url(url) => ffmpeg::live_args(&sdp_path, url),
        };

        debug!("{} encoder: {} {}", role, self.settings.ffmpeg.display(), args.join(" "));
        let mut child = Command::new(&self.settings.ffmpeg)
            .args(&args)
            .current_dir(&self.settings.data_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EncoderError::Launch { role, source })?;

        let log_path = logs_dir.join(ffmpeg::log_file_name(role));
        let log_cancel = CancellationToken::new();
        if let Some(stderr) = child.stderr.take() {
            ffmpeg::spawn_log_drain(role, stderr, log_path.clone(), log_cancel.clone());
        }
        let stdin = child.stdin.take();

        let mut slots = self.slots.lock().await;
        let slot = &mut slots[role.index()];
        if abort.is_cancelled() || slot.generation != generation {
            drop(slots);
            log_cancel.cancel();
            let _ = child.kill().await;
            return Err(EncoderError::StartAborted(role));
        }

        let kill = CancellationToken::new();
        let exited = spawn_waiter(
            role,
            generation,
            child,
            kill.clone(),
            Arc::clone(&self.slots),
            Arc::clone(&self.relay),
        );

        info!("{} encoder started: {}", role, output);
        slot.job = Some(EncoderJob {
            role,
            output,
            log_path,
            started_at: Local::now(),
            started: Instant::now(),
            stdin,
            kill,
            exited,
            log_cancel,
        });
        slot.transition(
            role,
            JobState::Running {
                started_at: Instant::now(),
            },
        );

        Ok(())
    }

    /// Stop the job for `role`.
    ///
    /// Returns `Ok(None)` when nothing was running. A start still waiting
    /// for readiness is aborted. The sink is detached before the process is
    /// asked to quit.
    pub async fn stop(&self, role: EncoderRole) -> Result<Option<StopReport>, EncoderError> {
        let job = {
            let mut slots = self.slots.lock().await;
            let slot = &mut slots[role.index()];
            match slot.state {
                JobState::Starting => {
                    info!("{} encoder: aborting pending start", role);
                    slot.abort.cancel();
                    return Ok(None);
                }
                JobState::Running { .. } => {}
                JobState::Idle | JobState::Stopping | JobState::Stopped => {
                    debug!("{} encoder: stop requested while {}", role, slot.state);
                    return Ok(None);
                }
            }
            slot.transition(role, JobState::Stopping);
            slot.job.take()
        };

        self.relay.detach(role).await;

        let report = match job {
            Some(job) => match role {
                EncoderRole::Record => Some(self.finalizer.finalize(job).await),
                EncoderRole::Live => Some(terminate(job).await),
            },
            None => None,
        };

        let mut slots = self.slots.lock().await;
        let slot = &mut slots[role.index()];
        if slot.state == JobState::Stopping {
            slot.transition(role, JobState::Stopped);
        }

        Ok(report)
    }

    pub async fn state(&self, role: EncoderRole) -> JobState {
        self.slots.lock().await[role.index()].state
    }

    pub async fn status(&self) -> Vec<JobStatus> {
        let slots = self.slots.lock().await;
        EncoderRole::ALL
            .iter()
            .zip(slots.iter())
            .map(|(role, slot)| JobStatus {
                role: *role,
                state: slot.state.description(),
                output: slot.job.as_ref().map(|job| job.output.to_string()),
                started_at: slot
                    .job
                    .as_ref()
                    .map(|job| job.started_at.format("%Y-%m-%d %H:%M:%S").to_string()),
                running_secs: slot.state.running_duration().map(|d| d.as_secs()),
                log: slot.job.as_ref().map(|job| job.log_path.clone()),
            })
            .collect()
    }

    /// Stop both jobs; the recording is finalized.
    pub async fn shutdown(&self) {
        for role in EncoderRole::ALL {
            match self.stop(role).await {
                Ok(Some(report)) => info!("{} encoder stopped on shutdown: {:?}", role, report.outcome),
                Ok(None) => {}
                Err(e) => warn!("{} encoder: stop on shutdown failed: {}", role, e),
            }
        }
    }
}

async fn create_dir(dir: &Path) -> Result<(), EncoderError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| EncoderError::io(format!("creating {}", dir.display()), e))
}

/// Own the child until it exits or the kill token fires.
///
/// A process that exits on its own is reaped here: its sink is detached and
/// its slot marked `Stopped`, unless a newer job or a stop request already
/// owns the slot.
fn spawn_waiter(
    role: EncoderRole,
    generation: u64,
    mut child: Child,
    kill: CancellationToken,
    slots: Slots,
    relay: Arc<RelayFanout>,
) -> oneshot::Receiver<Option<i32>> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let exit_code = tokio::select! {
            _ = kill.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("{} encoder: kill failed: {}", role, e);
                }
                None
            }
            status = child.wait() => {
                let code = match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        error!("{} encoder: waiting for exit failed: {}", role, e);
                        Some(-1)
                    }
                };

                let mut slots = slots.lock().await;
                let slot = &mut slots[role.index()];
                if slot.generation == generation && slot.state.is_running() {
                    match code {
                        Some(0) => info!("{} encoder exited", role),
                        _ => warn!("{} encoder exited unexpectedly (code {:?})", role, code),
                    }
                    if let Some(job) = slot.job.take() {
                        job.log_cancel.cancel();
                    }
                    relay.detach(role).await;
                    slot.transition(role, JobState::Stopped);
                }
                code
            }
        };

        let _ = tx.send(exit_code);
    });

    rx
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::pipeline::RelayHealth;
    use crate::pipeline::relay::tests::ChannelSource;
    use crate::workers::finalizer::{OutputCheck, StopOutcome};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingKeyframes {
        requests: AtomicUsize,
    }

    #[async_trait]
    impl KeyframeRequester for CountingKeyframes {
        async fn request_active_keyframe(&self) {
            self.requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Creates the output file, then exits once `q` arrives on stdin.
    const GRACEFUL_ENCODER: &str = r#"#!/bin/sh
for arg in "$@"; do out="$arg"; done
echo "fake encoder writing $out" >&2
touch "$out" 2>/dev/null
read _line
echo "finalized" >> "$out" 2>/dev/null
exit 0
"#;

    /// Ignores the quit request.
    const STUBBORN_ENCODER: &str = r#"#!/bin/sh
for arg in "$@"; do out="$arg"; done
touch "$out" 2>/dev/null
exec sleep 30
"#;

    const CRASHING_ENCODER: &str = r#"#!/bin/sh
echo "Error: nothing to encode" >&2
exit 1
"#;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn free_udp_port() -> u16 {
        std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    struct Harness {
        _dir: tempfile::TempDir,
        data_dir: PathBuf,
        relay: Arc<RelayFanout>,
        keyframes: Arc<CountingKeyframes>,
        manager: EncoderProcessManager,
    }

    fn harness(script: &str, readiness_wait: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_path_buf();
        let ffmpeg = write_script(dir.path(), "fake-ffmpeg", script);

        let settings = EncoderSettings {
            ffmpeg,
            data_dir: data_dir.clone(),
            live_port: free_udp_port(),
            record_port: free_udp_port(),
            payload_type: SINK_PAYLOAD_TYPE,
            readiness_wait,
            finalize_grace: Duration::from_millis(500),
        };

        let relay = Arc::new(RelayFanout::new(Arc::new(RelayHealth::new())));
        let keyframes = Arc::new(CountingKeyframes::default());
        let manager = EncoderProcessManager::new(settings, Arc::clone(&relay), keyframes.clone());

        Harness {
            _dir: dir,
            data_dir,
            relay,
            keyframes,
            manager,
        }
    }

    /// Runs a relay session fed with a packet every 10ms until the sender is dropped.
    fn feed_packets(relay: &Arc<RelayFanout>) -> tokio::task::JoinHandle<()> {
        let (tx, source) = ChannelSource::new();
        let generation = relay.begin_session();
        let relay_task = {
            let relay = Arc::clone(relay);
            tokio::spawn(async move {
                relay.run(generation, source, CancellationToken::new()).await;
            })
        };
        tokio::spawn(async move {
            for i in 0..300u32 {
                if tx.send(Bytes::from(i.to_be_bytes().to_vec())).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            drop(tx);
            let _ = relay_task.await;
        })
    }

    #[tokio::test]
    async fn test_record_show_end_to_end() {
        let h = harness(GRACEFUL_ENCODER, Duration::from_secs(5));
        let feeder = feed_packets(&h.relay);

        let started_at = Instant::now();
        let started = h.manager.start_recording("show").await.unwrap();
        assert!(started_at.elapsed() < Duration::from_secs(3), "readiness should end the wait early");
        assert_eq!(h.keyframes.requests.load(Ordering::Relaxed), 1);
        assert!(h.manager.state(EncoderRole::Record).await.is_running());
        assert!(h.relay.is_attached(EncoderRole::Record).await);

        let name = started.path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("show_"), "{}", name);
        assert!(name.ends_with(".mp4"), "{}", name);
        assert_eq!(started.path.parent().unwrap(), h.data_dir.join(RECORDINGS_DIR));

        let sdp = std::fs::read_to_string(h.data_dir.join("record.sdp")).unwrap();
        assert!(sdp.contains("a=rtpmap:96 H264/90000"));

        // give the script time to create the file
        tokio::time::sleep(Duration::from_millis(200)).await;

        let report = h.manager.stop(EncoderRole::Record).await.unwrap().unwrap();
        assert_eq!(report.outcome, StopOutcome::Graceful);
        assert!(matches!(report.output, Some(OutputCheck::Verified { .. })));
        assert!(started.path.exists());
        assert!(!h.relay.is_attached(EncoderRole::Record).await);
        assert_eq!(h.manager.state(EncoderRole::Record).await, JobState::Stopped);

        let log_path = h.data_dir.join(LOGS_DIR).join("ffmpeg_record.log");
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("fake encoder writing"));

        // a second take rewrites the log instead of growing it
        let again = h.manager.start_recording("show").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.manager.stop(EncoderRole::Record).await.unwrap().unwrap();

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(log.matches("=== record encoder started").count(), 1, "{}", log);
        assert!(log.contains(&again.path.display().to_string()), "{}", log);
        assert!(!log.contains(&started.path.display().to_string()), "{}", log);

        feeder.abort();
    }

    #[tokio::test]
    async fn test_back_to_back_recordings_keep_both_files() {
        let h = harness(GRACEFUL_ENCODER, Duration::from_millis(10));

        let first = h.manager.start_recording("show").await.unwrap();
        let report = h.manager.stop(EncoderRole::Record).await.unwrap().unwrap();
        assert_eq!(report.outcome, StopOutcome::Graceful);

        let second = h.manager.start_recording("show").await.unwrap();
        h.manager.stop(EncoderRole::Record).await.unwrap().unwrap();

        assert_ne!(first.path, second.path);
        assert!(first.path.exists());
        assert!(second.path.exists());
        assert_eq!(std::fs::read_to_string(&first.path).unwrap(), "finalized\n");
    }

    #[tokio::test]
    async fn test_record_starts_anyway_without_media() {
        let h = harness(GRACEFUL_ENCODER, Duration::from_millis(300));

        let started_at = Instant::now();
        h.manager.start_recording("quiet").await.unwrap();
        assert!(started_at.elapsed() >= Duration::from_millis(300));
        assert!(h.manager.state(EncoderRole::Record).await.is_running());

        h.manager.stop(EncoderRole::Record).await.unwrap();
    }

    #[tokio::test]
    async fn test_stubborn_recording_is_killed_once() {
        let h = harness(STUBBORN_ENCODER, Duration::from_millis(50));
        let started = h.manager.start_recording("stubborn").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let begin = Instant::now();
        let report = h.manager.stop(EncoderRole::Record).await.unwrap().unwrap();
        assert!(begin.elapsed() >= Duration::from_millis(500));
        assert_eq!(report.outcome, StopOutcome::Forced);
        assert_eq!(report.exit_code, None);
        assert!(started.path.exists());
        assert_eq!(h.manager.state(EncoderRole::Record).await, JobState::Stopped);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let h = harness(STUBBORN_ENCODER, Duration::from_millis(50));
        h.manager.start_stream("rtmp://127.0.0.1/live/key").await.unwrap();

        let err = h.manager.start_stream("rtmp://127.0.0.1/live/other").await.unwrap_err();
        assert!(matches!(err, EncoderError::AlreadyRunning(EncoderRole::Live)));

        // the other role is independent
        h.manager.start_recording("parallel").await.unwrap();

        let live = h.manager.stop(EncoderRole::Live).await.unwrap().unwrap();
        assert_eq!(live.outcome, StopOutcome::Forced);
        assert!(live.output.is_none());
        assert!(h.manager.state(EncoderRole::Record).await.is_running());

        h.manager.shutdown().await;
        assert_eq!(h.manager.state(EncoderRole::Record).await, JobState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_a_no_op() {
        let h = harness(GRACEFUL_ENCODER, Duration::from_millis(50));
        assert!(h.manager.stop(EncoderRole::Record).await.unwrap().is_none());
        assert!(h.manager.stop(EncoderRole::Live).await.unwrap().is_none());
        assert_eq!(h.manager.state(EncoderRole::Live).await, JobState::Idle);
    }

    #[tokio::test]
    async fn test_empty_url_is_invalid() {
        let h = harness(GRACEFUL_ENCODER, Duration::from_millis(50));
        let err = h.manager.start_stream("   ").await.unwrap_err();
        assert!(matches!(err, EncoderError::InvalidDestination { .. }));
        assert_eq!(h.manager.state(EncoderRole::Live).await, JobState::Idle);
    }

    #[tokio::test]
    async fn test_launch_failure_restores_idle() {
        let mut h = harness(GRACEFUL_ENCODER, Duration::from_millis(50));
        h.manager.settings.ffmpeg = h.data_dir.join("missing-ffmpeg");

        let err = h.manager.start_stream("rtmp://127.0.0.1/live/key").await.unwrap_err();
        assert!(matches!(err, EncoderError::Launch { role: EncoderRole::Live, .. }));
        assert_eq!(h.manager.state(EncoderRole::Live).await, JobState::Idle);
        assert!(!h.relay.is_attached(EncoderRole::Live).await);
    }

    #[tokio::test]
    async fn test_stop_aborts_pending_start() {
        let h = Arc::new(harness(GRACEFUL_ENCODER, Duration::from_secs(10)));

        let start = {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.manager.start_recording("pending").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.manager.state(EncoderRole::Record).await, JobState::Starting);

        assert!(h.manager.stop(EncoderRole::Record).await.unwrap().is_none());
        let err = start.await.unwrap().unwrap_err();
        assert!(matches!(err, EncoderError::StartAborted(EncoderRole::Record)));
        assert_eq!(h.manager.state(EncoderRole::Record).await, JobState::Idle);
        assert!(!h.relay.is_attached(EncoderRole::Record).await);
    }

    #[tokio::test]
    async fn test_exited_encoder_is_reaped() {
        let h = harness(CRASHING_ENCODER, Duration::from_millis(50));
        h.manager.start_stream("rtmp://127.0.0.1/live/key").await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.manager.state(EncoderRole::Live).await != JobState::Stopped {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("crashed encoder was never reaped");

        assert!(!h.relay.is_attached(EncoderRole::Live).await);
        assert!(h.manager.stop(EncoderRole::Live).await.unwrap().is_none());

        // a new job can be started afterwards
        h.manager.start_stream("rtmp://127.0.0.1/live/key").await.unwrap();
    }
}
