//! Optional on-the-fly re-encoding for clients that cannot play a container
//!
//! The transcoded stream always starts at byte 0 and cannot be seeked.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use axum::{
    body::{Body, Bytes},
    http::{header, StatusCode},
    response::Response,
};
use futures::{Stream, StreamExt};
use regex::Regex;
use serde::Serialize;
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::io::ReaderStream;

use crate::error::MediaError;
use crate::media;
use crate::subtitles::SubtitleError;

/// Containers mobile browsers commonly fail to play
const MOBILE_INCOMPATIBLE: [&str; 3] = ["mkv", "avi", "wmv"];

/// Client capabilities sniffed from the `User-Agent` header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceProfile {
    pub is_mobile: bool,
    pub is_ios: bool,
    pub is_android: bool,
    pub is_safari: bool,
}

impl DeviceProfile {
    pub fn from_user_agent(user_agent: &str) -> Self {
        static MOBILE: OnceLock<Regex> = OnceLock::new();
        static IOS: OnceLock<Regex> = OnceLock::new();
        static ANDROID: OnceLock<Regex> = OnceLock::new();
        static SAFARI: OnceLock<Regex> = OnceLock::new();
        static CHROME: OnceLock<Regex> = OnceLock::new();

        let mobile = MOBILE.get_or_init(|| {
            Regex::new(r"(?i)Mobile|Android|iPhone|iPad|iPod|BlackBerry|IEMobile|Opera Mini|Windows Phone")
                .expect("valid regex")
        });
        let ios = IOS.get_or_init(|| Regex::new(r"(?i)iPhone|iPad|iPod").expect("valid regex"));
        let android = ANDROID.get_or_init(|| Regex::new(r"(?i)Android").expect("valid regex"));
        let safari = SAFARI.get_or_init(|| Regex::new(r"(?i)Safari").expect("valid regex"));
        let chrome = CHROME.get_or_init(|| Regex::new(r"(?i)Chrome").expect("valid regex"));

        Self {
            is_mobile: mobile.is_match(user_agent),
            is_ios: ios.is_match(user_agent),
            is_android: android.is_match(user_agent),
            is_safari: safari.is_match(user_agent) && !chrome.is_match(user_agent),
        }
    }
}

/// Whether `path` should be re-encoded for this client
pub fn needs_transcoding(profile: &DeviceProfile, path: impl AsRef<Path>) -> bool {
    profile.is_mobile
        && media::extension_of(path).is_some_and(|ext| MOBILE_INCOMPATIBLE.contains(&ext.as_str()))
}

/// Body of `GET /api/transcode-info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeInfo {
    pub needs_transcoding: bool,
    pub is_mobile: bool,
    pub original_format: String,
    pub reason: String,
}

impl TranscodeInfo {
    pub fn evaluate(profile: &DeviceProfile, path: &str) -> Self {
        let needs = needs_transcoding(profile, path);
        Self {
            needs_transcoding: needs,
            is_mobile: profile.is_mobile,
            original_format: media::extension_of(path)
                .map(|ext| format!(".{}", ext))
                .unwrap_or_default(),
            reason: if needs {
                "Mobile device detected with incompatible format".to_string()
            } else {
                "Format compatible".to_string()
            },
        }
    }
}

/// Pipes ffmpeg's fragmented MP4 output into a response body
#[derive(Debug, Clone)]
pub struct Transcoder {
    ffmpeg: PathBuf,
}

impl Transcoder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// ffmpeg invocation re-encoding `input` to 720p H.264/AAC on stdout
    pub fn command(&self, input: &Path) -> Command {
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-v", "error", "-fflags", "+genpts", "-i"])
            .arg(input)
            .args(["-c:v", "libx264", "-preset", "veryfast", "-crf", "28"])
            .args(["-profile:v", "main", "-level", "4.0", "-pix_fmt", "yuv420p"])
            .args(["-s", "1280x720", "-b:v", "1000k"])
            .args(["-c:a", "aac", "-b:a", "128k"])
            .args(["-movflags", "+frag_keyframe+empty_moov"])
            .args(["-max_muxing_queue_size", "1024", "-avoid_negative_ts", "make_zero"])
            .args(["-threads", "0", "-f", "mp4", "pipe:1"]);
        command
    }

    /// Start transcoding `input` and return a streaming 200 response
    ///
    /// The response has no `Content-Length` and does not accept ranges.
    pub fn stream(&self, input: &Path) -> Result<Response, MediaError> {
        tracing::info!("Transcoding {}", input.display());
        let body = spawn_body(self.command(input), input.display().to_string())?;

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "video/mp4")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(body)
            .map_err(|e| MediaError::io("Building response", io::Error::new(ErrorKind::Other, e)))
    }
}

/// Spawn `command` and stream its stdout
///
/// The child is killed when the body is dropped before the encoder exits.
fn spawn_body(mut command: Command, label: String) -> Result<Body, MediaError> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| MediaError::UpstreamTool {
            context: "Starting transcoder",
            source: SubtitleError::Spawn { program, source },
        })?;

    let stdout = child.stdout.take().ok_or_else(|| {
        MediaError::io(
            "Starting transcoder",
            io::Error::new(ErrorKind::BrokenPipe, "encoder stdout unavailable"),
        )
    })?;

    Ok(Body::from_stream(encoder_stream(child, stdout, label)))
}

fn encoder_stream(
    mut child: Child,
    stdout: ChildStdout,
    label: String,
) -> impl Stream<Item = io::Result<Bytes>> {
    async_stream::try_stream! {
        let mut guard = EncoderGuard { label, finished: false };
        let mut chunks = ReaderStream::new(stdout);

        while let Some(chunk) = chunks.next().await {
            yield chunk?;
        }

        let status = child.wait().await?;
        if !status.success() {
            Err::<(), io::Error>(io::Error::new(
                ErrorKind::Other,
                format!("encoder exited with {}", status),
            ))?;
        }
        guard.finished = true;
    }
}

struct EncoderGuard {
    label: String,
    finished: bool,
}

impl Drop for EncoderGuard {
    fn drop(&mut self) {
        if self.finished {
            tracing::info!("Transcoding of {} completed", self.label);
        } else {
            tracing::warn!("Transcoding of {} stopped, killing encoder", self.label);
        }
    }
}
