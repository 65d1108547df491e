use std::time::Duration;

// http / signaling
pub const HTTP_SERVICE_PORT: u16 = 8080;
pub const SIGNALING_SERVICE_PORT: u16 = 8081;

// local rtp sinks consumed by the encoders
pub const LIVE_SINK_PORT: u16 = 5004;
pub const RECORD_SINK_PORT: u16 = 5005;
pub const SINK_PAYLOAD_TYPE: u8 = 96;

// fixed budgets
pub const READINESS_WAIT: Duration = Duration::from_millis(1500);
pub const FINALIZE_GRACE: Duration = Duration::from_secs(2);
pub const TUNNEL_URL_WAIT: Duration = Duration::from_secs(8);
pub const ICE_GATHERING_WAIT: Duration = Duration::from_secs(5);
pub const BROWSER_LAUNCH_DELAY: Duration = Duration::from_millis(800);

pub const STUN_SERVER: &str = "stun:stun.l.google.com:19302";

pub const LOGS_DIR: &str = "logs";
pub const RECORDINGS_DIR: &str = "recordings";
pub const DEFAULT_RECORDING_NAME: &str = "recording";
pub const RECORDING_EXTENSION: &str = "mp4";
pub const RECORDING_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

pub const TUNNEL_DOMAIN_SUFFIXES: &[&str] = &[".lhr.life", ".lhr.pro"];

pub const BANNER: &str = r#"
                    _      _           _
   ___  __ _  ___  | |_ __| | ___  ___| | __
  / __|/ _` |/ __| | __/ _` |/ _ \/ __| |/ /
 | (__| (_| |\__ \ | || (_| |  __/ (__|   <
  \___|\__,_||___/  \__\__,_|\___|\___|_|\_\
"#;
