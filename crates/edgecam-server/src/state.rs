use crate::rtc;
use crate::session::SessionManager;
use anyhow::bail;
use clap::{Parser, ValueEnum};
use edgecam_media::capture::{CameraSource, FrameSource, TestPatternSource};
use edgecam_protocol::{FilterMode, FilterSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[cfg(target_os = "linux")]
const DEFAULT_DEVICE: &str = "/dev/video0";
#[cfg(not(target_os = "linux"))]
const DEFAULT_DEVICE: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Local webcam
    Camera,
    /// Synthetic moving pattern, no hardware needed
    TestPattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// WebRTC webcam demo with a live Canny edge filter
#[derive(Parser, Debug, Clone)]
#[command(name = "edgecam-server", author, version, about, long_about = None)]
pub struct Config {
    /// SSL certificate file (for HTTPS)
    #[arg(long, env = "EDGECAM_CERT_FILE")]
    pub cert_file: Option<PathBuf>,

    /// SSL key file (for HTTPS)
    #[arg(long, env = "EDGECAM_KEY_FILE")]
    pub key_file: Option<PathBuf>,

    /// Host for HTTP server
    #[arg(long, default_value = "0.0.0.0", env = "EDGECAM_HOST")]
    pub host: String,

    /// Port for HTTP server
    #[arg(long, default_value_t = 8080, env = "EDGECAM_PORT")]
    pub port: u16,

    /// Where frames come from
    #[arg(long, value_enum, default_value_t = SourceKind::Camera, env = "EDGECAM_SOURCE")]
    pub source: SourceKind,

    /// Camera index or device path
    #[arg(long, default_value = DEFAULT_DEVICE, env = "EDGECAM_DEVICE")]
    pub device: String,

    #[arg(long, default_value_t = 640, env = "EDGECAM_WIDTH")]
    pub width: u32,

    #[arg(long, default_value_t = 480, env = "EDGECAM_HEIGHT")]
    pub height: u32,

    #[arg(long, default_value_t = 30, env = "EDGECAM_FPS")]
    pub fps: u32,

    /// Mode for sessions whose offer does not pick one (passthrough, edges, canny)
    #[arg(long, default_value_t = FilterMode::Edges, env = "EDGECAM_FILTER")]
    pub filter: FilterMode,

    /// Lower Canny threshold at startup
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u16).range(0..=500), env = "EDGECAM_THRESHOLD1")]
    pub threshold1: u16,

    /// Upper Canny threshold at startup
    #[arg(long, default_value_t = 200, value_parser = clap::value_parser!(u16).range(0..=500), env = "EDGECAM_THRESHOLD2")]
    pub threshold2: u16,

    /// STUN servers (comma-separated or repeated)
    #[arg(
        long = "stun-server",
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "EDGECAM_STUN_SERVERS"
    )]
    pub stun_servers: Vec<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "EDGECAM_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Print the available cameras and exit
    #[arg(long)]
    pub list_devices: bool,
}

impl Config {
    /// Parse the command line, with `.env` and `EDGECAM_*` variables as fallbacks
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Config::parse()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.tls_paths()?;
        if self.fps == 0 {
            bail!("--fps must be at least 1");
        }
        if self.width == 0 || self.height == 0 {
            bail!("--width and --height must be non-zero");
        }
        Ok(())
    }

    /// Certificate and key, when HTTPS is enabled
    pub fn tls_paths(&self) -> anyhow::Result<Option<(PathBuf, PathBuf)>> {
        match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => Ok(Some((cert.clone(), key.clone()))),
            (None, None) => Ok(None),
            (Some(_), None) => bail!("--cert-file requires --key-file"),
            (None, Some(_)) => bail!("--key-file requires --cert-file"),
        }
    }

    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn initial_settings(&self) -> FilterSettings {
        FilterSettings {
            threshold1: self.threshold1,
            threshold2: self.threshold2,
        }
    }

    pub fn frame_source(&self) -> Arc<dyn FrameSource> {
        match self.source {
            SourceKind::Camera => Arc::new(CameraSource::new(
                self.device.clone(),
                self.width,
                self.height,
                self.fps,
            )),
            SourceKind::TestPattern => {
                Arc::new(TestPatternSource::new(self.width, self.height, self.fps))
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionManager>,
    /// Live thresholds; every session reads the latest value per frame
    pub settings: Arc<watch::Sender<FilterSettings>>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let (settings, settings_rx) = watch::channel(config.initial_settings());
        let api = rtc::build_api()?;

        let sessions = Arc::new(SessionManager::new(
            api,
            rtc::ice_servers(&config.stun_servers),
            config.frame_source(),
            settings_rx,
            config.fps,
        ));

        Ok(Self {
            config,
            sessions,
            settings: Arc::new(settings),
        })
    }
}
