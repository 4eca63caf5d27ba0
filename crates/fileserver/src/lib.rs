//! HTTP media server for a directory tree of video files
//!
//! This crate serves files below a fixed media root behind Basic
//! authentication, with byte-range streaming, per-user folder rules,
//! subtitle extraction, tags and an optional transcoding path.

pub mod access;
pub mod auth;
pub mod encoding;
pub mod error;
pub mod listing;
pub mod media;
pub mod paths;
mod server;
mod state;
pub mod stream;
pub mod subtitles;
pub mod transcode;
pub mod utils;

pub use access::{AccessPolicy, FolderRules, GatedFolder, Identity};
pub use auth::Credentials;
pub use error::{AppError, MediaError};
pub use listing::{DirectoryEntry, DirectoryLister, Listing};
pub use paths::MediaRoot;
pub use server::{FileServerApi, FOLDER_SECRET_HEADER};
pub use state::{ServerConfig, ServerState, UserAccount, DEFAULT_REALM};
pub use stream::{parse_range, ByteRange, RangeOutcome};
pub use subtitles::{FfmpegTool, SubtitleBridge, SubtitleError, SubtitleTool, SubtitleTrack};
pub use transcode::{DeviceProfile, TranscodeInfo, Transcoder};
