use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::filter::LevelFilter;

use crate::assets::{HTTP_SERVICE_PORT, SIGNALING_SERVICE_PORT};
use crate::utils::net::webrtc::NegotiatorSettings;
use crate::workers::EncoderSettings;

#[derive(Debug, Clone)]
pub struct StudioConfig {
    pub http_port: u16,
    pub signaling_port: u16,
    /// Built frontend served for every path the API does not claim
    pub static_dir: PathBuf,
    /// Page served at `/guest`
    pub guest_page: PathBuf,
    pub open_browser: bool,
    pub log_level: LevelFilter,
    pub encoder: EncoderSettings,
    pub negotiator: NegotiatorSettings,
}

impl Default for StudioConfig {
    fn default() -> Self {
        StudioConfig {
            http_port: HTTP_SERVICE_PORT,
            signaling_port: SIGNALING_SERVICE_PORT,
            static_dir: PathBuf::from("frontend/dist"),
            guest_page: PathBuf::from("guest/index.html"),
            open_browser: true,
            log_level: LevelFilter::INFO,
            encoder: EncoderSettings::default(),
            negotiator: NegotiatorSettings::default(),
        }
    }
}

impl StudioConfig {
    pub fn from_matches(matches: &ArgMatches) -> anyhow::Result<StudioConfig> {
        let mut config = StudioConfig::default();

        if let Some(port) = matches.get_one::<u16>("port") {
            config.http_port = *port;
        }
        if let Some(port) = matches.get_one::<u16>("signaling-port") {
            config.signaling_port = *port;
        }
        if let Some(ffmpeg) = matches.get_one::<PathBuf>("ffmpeg") {
            config.encoder.ffmpeg = ffmpeg.clone();
        }
        if let Some(dir) = matches.get_one::<PathBuf>("data-dir") {
            config.encoder.data_dir = dir.clone();
        }
        if let Some(dir) = matches.get_one::<PathBuf>("static-dir") {
            config.static_dir = dir.clone();
        }
        config.open_browser = !matches.get_flag("no-browser");

        if let Some(level) = matches.get_one::<String>("log-level") {
            config.log_level = LevelFilter::from_str(level)
                .map_err(|e| anyhow::anyhow!("invalid log level '{}': {}", level, e))?;
        }

        Ok(config)
    }

    pub fn studio_url(&self) -> String {
        format!("http://localhost:{}", self.http_port)
    }
}

pub fn command() -> Command {
    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("HTTP port for the studio UI and API.")
                .value_parser(value_parser!(u16))
                .default_value("8080"),
        )
        .arg(
            Arg::new("signaling-port")
                .long("signaling-port")
                .value_name("PORT")
                .help("Port of the WebSocket signaling hub.")
                .value_parser(value_parser!(u16))
                .default_value("8081"),
        )
        .arg(
            Arg::new("ffmpeg")
                .long("ffmpeg")
                .value_name("PATH")
                .help("ffmpeg binary used by the encoders.")
                .value_parser(value_parser!(PathBuf))
                .default_value("ffmpeg"),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Directory holding logs/ and recordings/.")
                .value_parser(value_parser!(PathBuf))
                .default_value("."),
        )
        .arg(
            Arg::new("static-dir")
                .long("static-dir")
                .value_name("DIR")
                .help("Built frontend to serve.")
                .value_parser(value_parser!(PathBuf))
                .default_value("frontend/dist"),
        )
        .arg(
            Arg::new("no-browser")
                .long("no-browser")
                .help("Do not open the studio in the default browser.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("error, warn, info, debug or trace.")
                .ignore_case(true)
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info"),
        )
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let matches = command().try_get_matches_from(["castdeck"]).unwrap();
        let config = StudioConfig::from_matches(&matches).unwrap();

        assert_eq!(config.http_port, 8080);
        assert_eq!(config.signaling_port, 8081);
        assert_eq!(config.encoder.ffmpeg, PathBuf::from("ffmpeg"));
        assert_eq!(config.encoder.live_port, 5004);
        assert_eq!(config.encoder.record_port, 5005);
        assert_eq!(config.static_dir, PathBuf::from("frontend/dist"));
        assert!(config.open_browser);
        assert_eq!(config.log_level, LevelFilter::INFO);
    }

    #[test]
    fn test_flags() {
        let matches = command()
            .try_get_matches_from([
                "castdeck",
                "--port",
                "9000",
                "--ffmpeg",
                "/opt/ffmpeg/bin/ffmpeg",
                "--data-dir",
                "/var/lib/castdeck",
                "--no-browser",
                "--log-level",
                "DEBUG",
            ])
            .unwrap();
        let config = StudioConfig::from_matches(&matches).unwrap();

        assert_eq!(config.http_port, 9000);
        assert_eq!(config.studio_url(), "http://localhost:9000");
        assert_eq!(config.encoder.ffmpeg, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.encoder.recordings_dir(), PathBuf::from("/var/lib/castdeck/recordings"));
        assert!(!config.open_browser);
        assert_eq!(config.log_level, LevelFilter::DEBUG);
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(command()
            .try_get_matches_from(["castdeck", "--port", "http"])
            .is_err());
    }
}
