//! Subtitle discovery and WebVTT extraction through ffprobe/ffmpeg

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::encoding::encode_path;

/// Failures of the external subtitle tools or the subtitle cache
#[derive(Debug, thiserror::Error)]
pub enum SubtitleError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("Invalid probe output: {0}")]
    ProbeOutput(#[from] serde_json::Error),

    #[error("Subtitle cache error: {0}")]
    Cache(#[source] std::io::Error),
}

/// Subtitle stream as reported by the probe
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProbedStream {
    pub index: u32,
    #[serde(default)]
    pub codec_name: Option<String>,
    #[serde(default)]
    pub tags: ProbedTags,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProbedTags {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbedStream>,
}

/// Parse `ffprobe -print_format json -show_streams` output
pub fn parse_probe_output(stdout: &[u8]) -> Result<Vec<ProbedStream>, SubtitleError> {
    let output: ProbeOutput = serde_json::from_slice(stdout)?;
    Ok(output.streams)
}

/// Subtitle track descriptor returned to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleTrack {
    /// Stream index inside the container
    pub index: u32,
    /// Position among the subtitle streams, used for extraction
    pub track_index: usize,
    pub language: String,
    pub title: String,
    pub codec: String,
    pub url: String,
}

/// External tool able to probe and extract subtitle streams
#[async_trait]
pub trait SubtitleTool: Send + Sync {
    /// List the subtitle streams of `video`
    async fn probe(&self, video: &Path) -> Result<Vec<ProbedStream>, SubtitleError>;

    /// Write subtitle stream `track` of `video` to `output` as WebVTT
    async fn extract(&self, video: &Path, track: usize, output: &Path) -> Result<(), SubtitleError>;
}

/// [`SubtitleTool`] backed by the ffprobe and ffmpeg binaries
///
/// Children are spawned with kill-on-drop, so abandoning the future (for
/// example when the client goes away) kills the process.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegTool {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    async fn run(program: &Path, command: &mut Command) -> Result<Vec<u8>, SubtitleError> {
        let program_name = program.display().to_string();
        let output = command
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SubtitleError::Spawn {
                program: program_name.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SubtitleError::ToolFailed {
                program: program_name,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl SubtitleTool for FfmpegTool {
    async fn probe(&self, video: &Path) -> Result<Vec<ProbedStream>, SubtitleError> {
        let stdout = Self::run(
            &self.ffprobe,
            Command::new(&self.ffprobe)
                .args(["-v", "error", "-print_format", "json", "-show_streams"])
                .args(["-select_streams", "s"])
                .arg(video),
        )
        .await?;
        parse_probe_output(&stdout)
    }

    async fn extract(&self, video: &Path, track: usize, output: &Path) -> Result<(), SubtitleError> {
        Self::run(
            &self.ffmpeg,
            Command::new(&self.ffmpeg)
                .args(["-y", "-v", "error", "-i"])
                .arg(video)
                .arg("-map")
                .arg(format!("0:s:{}", track))
                .args(["-c:s", "webvtt", "-f", "webvtt"])
                .arg(output),
        )
        .await
        .map(|_| ())
    }
}

/// Remove `{...}` styling annotations left over from ASS/SSA sources
pub fn clean_subtitle(content: &str) -> String {
    static ANNOTATION: OnceLock<Regex> = OnceLock::new();
    let annotation = ANNOTATION.get_or_init(|| Regex::new(r"\{[^}]*\}").expect("valid regex"));
    annotation.replace_all(content, "").into_owned()
}

static PART_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Track listing and cached WebVTT extraction
#[derive(Clone)]
pub struct SubtitleBridge {
    tool: Arc<dyn SubtitleTool>,
    cache_dir: PathBuf,
}

impl SubtitleBridge {
    pub fn new(tool: Arc<dyn SubtitleTool>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Subtitle tracks of `video`; an empty list when probing fails
    ///
    /// `relative` is the client-facing path used to build each track URL.
    pub async fn list_tracks(&self, video: &Path, relative: &str) -> Vec<SubtitleTrack> {
        let streams = match self.tool.probe(video).await {
            Ok(streams) => streams,
            Err(e) => {
                tracing::warn!("Probing subtitles of {} failed: {}", video.display(), e);
                return Vec::new();
            }
        };

        let encoded = encode_path(relative);
        streams
            .into_iter()
            .enumerate()
            .map(|(track_index, stream)| SubtitleTrack {
                index: stream.index,
                track_index,
                language: stream.tags.language.unwrap_or_else(|| "unknown".to_string()),
                title: stream
                    .tags
                    .title
                    .unwrap_or_else(|| format!("Subtitle {}", track_index + 1)),
                codec: stream.codec_name.unwrap_or_else(|| "unknown".to_string()),
                url: format!("/api/subtitle/{}/{}", encoded, track_index),
            })
            .collect()
    }

    /// Cache file for a track, keyed by the video's base name
    pub fn cache_path(&self, video: &Path, track: usize) -> PathBuf {
        let basename = video
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.cache_dir.join(format!("{}_{}.vtt", basename, track))
    }

    /// WebVTT text of one track, extracted on the first request
    pub async fn get_track(&self, video: &Path, track: usize) -> Result<String, SubtitleError> {
        let cached = self.cache_path(video, track);

        match tokio::fs::read_to_string(&cached).await {
            Ok(content) => {
                tracing::debug!("Serving cached subtitle {}", cached.display());
                return Ok(clean_subtitle(&content));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!("Ignoring unreadable subtitle cache {}: {}", cached.display(), e);
            }
        }

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(SubtitleError::Cache)?;

        let part = cached.with_extension(format!(
            "{}.{}.part",
            std::process::id(),
            PART_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        tracing::info!("Extracting subtitle track {} from {}", track, video.display());
        if let Err(e) = self.tool.extract(video, track, &part).await {
            let _ = tokio::fs::remove_file(&part).await;
            tracing::error!("Subtitle extraction failed for {}: {}", video.display(), e);
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&part, &cached).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(SubtitleError::Cache(e));
        }

        let content = tokio::fs::read_to_string(&cached)
            .await
            .map_err(SubtitleError::Cache)?;
        Ok(clean_subtitle(&content))
    }
}

impl std::fmt::Debug for SubtitleBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubtitleBridge")
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}
