//! Shared server state handed to every request handler

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tagstore::TagStore;

use crate::access::{AccessPolicy, FolderRules};
use crate::auth::Credentials;
use crate::listing::DirectoryLister;
use crate::paths::MediaRoot;
use crate::subtitles::{FfmpegTool, SubtitleBridge, SubtitleTool};
use crate::transcode::Transcoder;

/// Default Basic auth realm
pub const DEFAULT_REALM: &str = "Media Server";

/// One configured login with its folder rules
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct UserAccount {
    pub password: String,
    #[serde(flatten)]
    pub rules: FolderRules,
}

/// Everything needed to build a [`ServerState`]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory every media path is resolved against
    pub media_root: PathBuf,
    /// Login name → account
    pub users: HashMap<String, UserAccount>,
    pub realm: String,
    /// Where extracted WebVTT files are cached
    pub subtitle_cache: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    /// Re-encode incompatible containers for mobile clients
    pub transcode: bool,
    /// Optional web UI bundle served for non-API paths
    pub static_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            users: HashMap::new(),
            realm: DEFAULT_REALM.to_string(),
            subtitle_cache: std::env::temp_dir().join("mediashelf").join("subtitles"),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            transcode: false,
            static_dir: None,
        }
    }
}

/// Server state shared by all handlers
#[derive(Clone, Debug)]
pub struct ServerState {
    root: Arc<MediaRoot>,
    policy: Arc<AccessPolicy>,
    credentials: Arc<Credentials>,
    tags: Arc<TagStore>,
    subtitles: SubtitleBridge,
    transcoder: Option<Transcoder>,
    static_dir: Option<PathBuf>,
    realm: Arc<str>,
}

impl ServerState {
    /// Create server state from configuration
    ///
    /// # Arguments
    /// * `config` - Media root, users and tool settings
    /// * `tags` - Tag store loaded by the caller
    ///
    /// # Errors
    /// Fails if the media root cannot be canonicalized or is not a directory.
    pub fn new(config: ServerConfig, tags: Arc<TagStore>) -> std::io::Result<Self> {
        let root = MediaRoot::new(&config.media_root)?;

        let mut secrets = HashMap::new();
        let mut rules = HashMap::new();
        for (name, account) in config.users {
            secrets.insert(name.clone(), account.password);
            rules.insert(name, account.rules);
        }

        let tool = FfmpegTool::new(&config.ffmpeg, &config.ffprobe);
        let transcoder = config.transcode.then(|| Transcoder::new(&config.ffmpeg));

        Ok(Self {
            root: Arc::new(root),
            policy: Arc::new(AccessPolicy::new(rules)),
            credentials: Arc::new(Credentials::new(secrets)),
            tags,
            subtitles: SubtitleBridge::new(Arc::new(tool), config.subtitle_cache),
            transcoder,
            static_dir: config.static_dir,
            realm: Arc::from(config.realm),
        })
    }

    /// Replace the subtitle tool, keeping the cache directory
    pub fn with_subtitle_tool(mut self, tool: Arc<dyn SubtitleTool>) -> Self {
        let cache_dir = self.subtitles.cache_dir().to_path_buf();
        self.subtitles = SubtitleBridge::new(tool, cache_dir);
        self
    }

    pub fn root(&self) -> &MediaRoot {
        &self.root
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn tags(&self) -> &Arc<TagStore> {
        &self.tags
    }

    pub fn subtitles(&self) -> &SubtitleBridge {
        &self.subtitles
    }

    /// Present only when transcoding is enabled
    pub fn transcoder(&self) -> Option<&Transcoder> {
        self.transcoder.as_ref()
    }

    pub fn static_dir(&self) -> Option<&PathBuf> {
        self.static_dir.as_ref()
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Directory lister sharing this state's root, policy and tags
    pub fn lister(&self) -> DirectoryLister {
        DirectoryLister::new(self.root.clone(), self.policy.clone(), self.tags.clone())
    }
}
