//! Daemon configuration: built-in defaults, an optional TOML file,
//! command-line overrides on top.

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::Deserialize;

/// Which consumer the acquisition thread feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Resample onto the sound card clock and play.
    Audio,
    /// Tab-separated rows to stdout or a file.
    Text,
    /// Newline-delimited JSON over TCP.
    Stream,
}

impl FromStr for SinkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "audio" => Ok(SinkKind::Audio),
            "text" => Ok(SinkKind::Text),
            "stream" => Ok(SinkKind::Stream),
            other => bail!("unknown sink '{}' (expected audio, text or stream)", other),
        }
    }
}

/// Settings for the audio sink.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Output channel count; capped at the 8 EEG channels and, on the
    /// default device, at what the hardware reports
    pub channels: usize,
    /// Output device name; the host default when unset
    pub device: Option<String>,
    /// Elastic buffering window in seconds
    pub buffer_secs: f64,
    /// Audio block length in seconds
    pub block_secs: f64,
    /// Seconds of frames discarded after start while the electrodes settle
    pub warmup_secs: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            device: None,
            buffer_secs: 2.0,
            block_secs: 0.01,
            warmup_secs: 5.0,
        }
    }
}

/// Configuration for the daemon
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Serial port path; autodetected when unset
    pub port: Option<String>,
    /// Use the synthetic device instead of hardware
    pub mock: bool,
    /// Scan for the next frame header after a malformed frame instead
    /// of aborting
    pub resync: bool,
    /// Which sink consumes the sample stream
    pub sink: SinkKind,
    /// Output file for the text sink; stdout when unset
    pub out: Option<PathBuf>,
    /// Listen address for the stream sink
    pub listen: String,
    /// Settings for the audio sink
    pub audio: AudioConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: None,
            mock: false,
            resync: false,
            sink: SinkKind::Audio,
            out: None,
            listen: "127.0.0.1:9350".to_string(),
            audio: AudioConfig::default(),
        }
    }
}

/// Command-line surface. Flags override the file; the file overrides
/// the built-in defaults.
pub fn cli() -> Command {
    Command::new("unicorn_daemon")
        .about("Unicorn EEG acquisition bridge")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PATH")
                .help("Serial port of the headset (autodetected when omitted)"),
        )
        .arg(
            Arg::new("mock")
                .long("mock")
                .action(ArgAction::SetTrue)
                .help("Use synthetic EEG data instead of real hardware"),
        )
        .arg(
            Arg::new("resync")
                .long("resync")
                .action(ArgAction::SetTrue)
                .help("Recover from malformed frames by scanning for the next header"),
        )
        .arg(
            Arg::new("sink")
                .long("sink")
                .value_name("KIND")
                .help("Where the sample stream goes: audio, text or stream"),
        )
        .arg(
            Arg::new("out")
                .long("out")
                .value_name("FILE")
                .help("Output file for the text sink (stdout when omitted)"),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDR")
                .help("Listen address for the stream sink"),
        )
        .arg(
            Arg::new("audio-device")
                .long("audio-device")
                .value_name("NAME")
                .help("Audio output device name (host default when omitted)"),
        )
        .arg(
            Arg::new("rate")
                .long("rate")
                .value_name("HZ")
                .value_parser(clap::value_parser!(u32))
                .help("Audio output sample rate"),
        )
}

impl DaemonConfig {
    /// Resolve the effective configuration from the parsed command line.
    pub fn load(matches: &ArgMatches) -> Result<Self> {
        let mut config = match matches.get_one::<String>("config") {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("could not read configuration file '{}'", path))?;
                let config: Self = toml::from_str(&contents)
                    .with_context(|| format!("could not parse configuration file '{}'", path))?;
                tracing::info!("Loaded configuration from {}", path);
                config
            }
            None => Self::default(),
        };

        if let Some(port) = matches.get_one::<String>("port") {
            config.port = Some(port.clone());
        }
        if matches.get_flag("mock") {
            config.mock = true;
        }
        if matches.get_flag("resync") {
            config.resync = true;
        }
        if let Some(sink) = matches.get_one::<String>("sink") {
            config.sink = sink.parse()?;
        }
        if let Some(out) = matches.get_one::<String>("out") {
            config.out = Some(PathBuf::from(out));
        }
        if let Some(listen) = matches.get_one::<String>("listen") {
            config.listen = listen.clone();
        }
        if let Some(device) = matches.get_one::<String>("audio-device") {
            config.audio.device = Some(device.clone());
        }
        if let Some(rate) = matches.get_one::<u32>("rate") {
            config.audio.sample_rate = *rate;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn matches_for(argv: &[&str]) -> ArgMatches {
        cli().try_get_matches_from(argv).unwrap()
    }

    #[test]
    fn defaults_apply_without_file_or_flags() {
        let config = DaemonConfig::load(&matches_for(&["unicorn_daemon"])).unwrap();
        assert_eq!(config.sink, SinkKind::Audio);
        assert!(!config.mock);
        assert!(config.port.is_none());
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.audio.channels, 2);
    }

    #[test]
    fn file_settings_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "sink = \"text\"\nport = \"/dev/ttyUSB3\"\n\n[audio]\nsample_rate = 48000"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let config =
            DaemonConfig::load(&matches_for(&["unicorn_daemon", "--config", &path])).unwrap();
        assert_eq!(config.sink, SinkKind::Text);
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(config.audio.sample_rate, 48_000);
        // Fields the file does not mention keep their defaults.
        assert_eq!(config.audio.buffer_secs, 2.0);
        assert_eq!(config.audio.warmup_secs, 5.0);
    }

    #[test]
    fn flags_override_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sink = \"text\"\nmock = false").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let config = DaemonConfig::load(&matches_for(&[
            "unicorn_daemon",
            "--config",
            &path,
            "--sink",
            "stream",
            "--mock",
            "--rate",
            "22050",
        ]))
        .unwrap();
        assert_eq!(config.sink, SinkKind::Stream);
        assert!(config.mock);
        assert_eq!(config.audio.sample_rate, 22_050);
    }

    #[test]
    fn a_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sink = ").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        assert!(DaemonConfig::load(&matches_for(&["unicorn_daemon", "--config", &path])).is_err());
    }

    #[test]
    fn sink_names_parse() {
        assert_eq!("audio".parse::<SinkKind>().unwrap(), SinkKind::Audio);
        assert_eq!("stream".parse::<SinkKind>().unwrap(), SinkKind::Stream);
        assert!("midi".parse::<SinkKind>().is_err());
    }
}
