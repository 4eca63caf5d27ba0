//! Configuration from CLI flags, environment and an optional TOML file
//!
//! Precedence, highest first: CLI flag, environment variable (including
//! `.env`), TOML file, built-in default. Users and their folder rules only
//! come from the TOML file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use fileserver::{ServerConfig, UserAccount, DEFAULT_REALM};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "mediashelf.toml";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_HTTP_PORT: u16 = 3001;
pub const DEFAULT_HTTPS_PORT: u16 = 3444;

/// Configuration errors reported before the server starts
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("No media root configured (use --media-root or MEDIA_ROOT)")]
    MissingMediaRoot,

    #[error("Media root {0} does not exist or is not a directory")]
    InvalidMediaRoot(PathBuf),

    #[error("No users configured; add a [users.<name>] table to the config file")]
    NoUsers,
}

/// Personal media server
#[derive(Debug, Default, Parser)]
#[command(name = "mediashelf", version, about)]
pub struct Cli {
    /// TOML config file
    #[arg(long, env = "MEDIASHELF_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the media library
    #[arg(long, env = "MEDIA_ROOT")]
    pub media_root: Option<PathBuf>,

    /// Address to bind both listeners to
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    #[arg(long, env = "HTTPS_PORT")]
    pub https_port: Option<u16>,

    /// PEM certificate for the HTTPS listener
    #[arg(long, env = "TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for the HTTPS listener
    #[arg(long, env = "TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// JSON file holding per-file tags
    #[arg(long, env = "TAGS_FILE")]
    pub tags_file: Option<PathBuf>,

    /// Directory for extracted WebVTT subtitles
    #[arg(long = "subtitle-cache", env = "SUBTITLE_CACHE_DIR")]
    pub subtitle_cache: Option<PathBuf>,

    #[arg(long, env = "FFMPEG_PATH")]
    pub ffmpeg: Option<PathBuf>,

    #[arg(long, env = "FFPROBE_PATH")]
    pub ffprobe: Option<PathBuf>,

    /// Re-encode mkv/avi/wmv for mobile clients
    #[arg(long, env = "TRANSCODE", num_args = 0..=1, default_missing_value = "true")]
    pub transcode: Option<bool>,

    /// Built web UI to serve for non-API paths
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

/// Contents of the TOML config file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub media_root: Option<PathBuf>,
    pub host: Option<String>,
    pub http_port: Option<u16>,
    pub https_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub tags_file: Option<PathBuf>,
    pub subtitle_cache: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub transcode: Option<bool>,
    pub static_dir: Option<PathBuf>,
    pub realm: Option<String>,
    pub users: HashMap<String, UserAccount>,
}

impl FileConfig {
    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read `path`; a missing file is only an error when `required`
    pub fn read(path: &Path, required: bool) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(path, &contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::debug!("No config file at {}", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Fully resolved settings for one server run
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub host: String,
    pub http_port: u16,
    pub https_port: u16,
    pub tls_cert: PathBuf,
    pub tls_key: PathBuf,
    pub tags_file: PathBuf,
    pub log_json: bool,
}

impl Settings {
    /// Read the config file named by the CLI (or the default one) and merge
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::read(path, true)?,
            None => FileConfig::read(Path::new(DEFAULT_CONFIG_FILE), false)?,
        };
        Self::merge(cli, file)
    }

    /// Merge CLI/env values over file values over defaults, then validate
    pub fn merge(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let media_root = cli
            .media_root
            .or(file.media_root)
            .ok_or(ConfigError::MissingMediaRoot)?;
        if !media_root.is_dir() {
            return Err(ConfigError::InvalidMediaRoot(media_root));
        }
        if file.users.is_empty() {
            return Err(ConfigError::NoUsers);
        }

        let mut server = ServerConfig::new(media_root);
        server.users = file.users;
        server.realm = file.realm.unwrap_or_else(|| DEFAULT_REALM.to_string());
        if let Some(cache) = cli.subtitle_cache.or(file.subtitle_cache) {
            server.subtitle_cache = cache;
        }
        if let Some(ffmpeg) = cli.ffmpeg.or(file.ffmpeg) {
            server.ffmpeg = ffmpeg;
        }
        if let Some(ffprobe) = cli.ffprobe.or(file.ffprobe) {
            server.ffprobe = ffprobe;
        }
        server.transcode = cli.transcode.or(file.transcode).unwrap_or(false);
        server.static_dir = cli.static_dir.or(file.static_dir);

        Ok(Self {
            server,
            host: cli
                .host
                .or(file.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            http_port: cli.http_port.or(file.http_port).unwrap_or(DEFAULT_HTTP_PORT),
            https_port: cli.https_port.or(file.https_port).unwrap_or(DEFAULT_HTTPS_PORT),
            tls_cert: cli
                .tls_cert
                .or(file.tls_cert)
                .unwrap_or_else(|| PathBuf::from("certs/server.crt")),
            tls_key: cli
                .tls_key
                .or(file.tls_key)
                .unwrap_or_else(|| PathBuf::from("certs/server.key")),
            tags_file: cli
                .tags_file
                .or(file.tags_file)
                .unwrap_or_else(|| PathBuf::from("tags.json")),
            log_json: cli.log_json,
        })
    }

    /// Whether both TLS files exist
    pub fn tls_available(&self) -> bool {
        self.tls_cert.is_file() && self.tls_key.is_file()
    }
}
