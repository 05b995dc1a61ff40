use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, info, warn};
use regex::Regex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::{AbortSignal, EncoderSupport, Engine, EngineInfo, EngineLoader, Invocation, ProgressSink};
use crate::asset::MediaInfo;
use crate::config::EngineConfig;
use crate::error::{FailureKind, Result, TransformError};

/// Lines of stderr kept for the failure diagnostic.
const DIAGNOSTIC_LINES: usize = 20;

// ============================================================================
// Binary Resolution
// ============================================================================

fn new_command(program: &Path) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(0x08000000);
    cmd
}

fn exe_name(binary: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", binary)
    } else {
        binary.to_string()
    }
}

/// Explicit path, then the configured engine directory, then the versioned
/// data directory, then a `bin/` folder next to the executable, then `PATH`.
fn locate(binary: &str, explicit: Option<&Path>, config: &EngineConfig) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let file = exe_name(binary);

    let mut candidates = Vec::new();
    if let Some(location) = &config.location {
        candidates.push(location.join(&file));
    }
    if let Some(data) = dirs::data_dir() {
        candidates.push(
            data.join("media-transform")
                .join("engine")
                .join(&config.version)
                .join("bin")
                .join(&file),
        );
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(dir) = exe_path.parent() {
            candidates.push(dir.join("bin").join(&file));
        }
    }

    candidates
        .into_iter()
        .find(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from(binary))
}

pub(crate) fn parse_version(output: &str) -> Option<String> {
    let re = Regex::new(r"(?:ffmpeg|ffprobe) version (\S+)").ok()?;
    re.captures(output)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

pub(crate) fn parse_encoders(output: &str) -> EncoderSupport {
    EncoderSupport {
        libx264: output.contains("libx264"),
        libx265: output.contains("libx265"),
        libvpx_vp9: output.contains("libvpx-vp9"),
        nvenc: output.contains("h264_nvenc") || output.contains("hevc_nvenc"),
        amf: output.contains("h264_amf") || output.contains("hevc_amf"),
        qsv: output.contains("h264_qsv") || output.contains("hevc_qsv"),
    }
}

async fn run_version(program: &Path) -> Result<String> {
    let output = new_command(program)
        .args(["-hide_banner", "-version"])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| TransformError::EngineUnavailable(format!("failed to run {}: {}", program.display(), e)))?;
    if !output.status.success() {
        return Err(TransformError::EngineUnavailable(format!(
            "{} exited with code {:?}",
            program.display(),
            output.status.code()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_version(&stdout).unwrap_or_else(|| "unknown".to_string()))
}

// ============================================================================
// Loader
// ============================================================================

pub struct FfmpegLoader {
    config: EngineConfig,
    scratch_dir: Option<PathBuf>,
}

impl FfmpegLoader {
    pub fn new(config: EngineConfig, scratch_dir: Option<PathBuf>) -> Self {
        Self { config, scratch_dir }
    }
}

#[async_trait]
impl EngineLoader for FfmpegLoader {
    async fn load(&self) -> Result<Arc<dyn Engine>> {
        let ffmpeg = locate("ffmpeg", self.config.ffmpeg_path.as_deref(), &self.config);
        let ffprobe = locate("ffprobe", self.config.ffprobe_path.as_deref(), &self.config);
        info!("loading ffmpeg from {} (probe: {})", ffmpeg.display(), ffprobe.display());

        let version = run_version(&ffmpeg).await?;
        run_version(&ffprobe).await?;

        let encoders = match new_command(&ffmpeg)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) => {
                let combined = format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                parse_encoders(&combined)
            }
            Err(e) => {
                warn!("could not list encoders: {}", e);
                EncoderSupport::default()
            }
        };
        if !encoders.libx264 {
            warn!("ffmpeg {} has no libx264; h264 output will fail", version);
        }

        if let Some(dir) = &self.scratch_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        Ok(Arc::new(FfmpegEngine {
            ffmpeg,
            ffprobe,
            scratch_dir: self.scratch_dir.clone(),
            info: EngineInfo {
                name: "ffmpeg".to_string(),
                version,
                encoders,
            },
        }))
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    scratch_dir: Option<PathBuf>,
    info: EngineInfo,
}

impl FfmpegEngine {
    /// Per-job working directory. Removed when dropped, whatever the outcome.
    fn scratch(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("media-transform-");
        let dir = match &self.scratch_dir {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

pub(crate) fn parse_probe(json: &str) -> Result<MediaInfo> {
    let data: ProbeOutput = serde_json::from_str(json).map_err(|e| TransformError::EncodeFailed {
        kind: FailureKind::UnsupportedInput,
        detail: format!("unreadable ffprobe output: {}", e),
    })?;

    let stream = data.streams.first();
    let fps = stream
        .and_then(|s| s.r_frame_rate.as_deref())
        .and_then(|rate| rate.split_once('/'))
        .and_then(|(num, den)| Some((num.parse::<f64>().ok()?, den.parse::<f64>().ok()?)))
        .filter(|(_, den)| *den > 0.0)
        .map(|(num, den)| num / den);

    Ok(MediaInfo {
        width: stream.and_then(|s| s.width),
        height: stream.and_then(|s| s.height),
        duration_seconds: data
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok()),
        fps,
    })
}

fn clock_seconds(h: &str, m: &str, s: &str) -> f64 {
    let h: f64 = h.parse().unwrap_or(0.0);
    let m: f64 = m.parse().unwrap_or(0.0);
    let s: f64 = s.parse().unwrap_or(0.0);
    h * 3600.0 + m * 60.0 + s
}

/// Turn ffmpeg's stderr into percentages. Returns the last lines for diagnostics.
///
/// Stats lines end in `\r`, log lines in `\n`; both are split on.
async fn relay_progress<R>(stderr: R, expected_duration: Option<f64>, progress: ProgressSink) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
{
    let duration_re = Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2}(?:\.\d+)?)").ok();
    let time_re = Regex::new(r"time=(\d{2}):(\d{2}):(\d{2}(?:\.\d+)?)").ok();

    let mut duration_in_seconds = expected_duration.unwrap_or(0.0);
    let mut tail = VecDeque::with_capacity(DIAGNOSTIC_LINES);
    let mut segments = BufReader::new(stderr).split(b'\r');

    while let Ok(Some(segment)) = segments.next_segment().await {
        let text = String::from_utf8_lossy(&segment);
        for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
            if duration_in_seconds <= 0.0 {
                if let Some(cap) = duration_re.as_ref().and_then(|re| re.captures(line)) {
                    duration_in_seconds = clock_seconds(&cap[1], &cap[2], &cap[3]);
                }
            }
            if duration_in_seconds > 0.0 {
                if let Some(cap) = time_re.as_ref().and_then(|re| re.captures(line)) {
                    let current_time = clock_seconds(&cap[1], &cap[2], &cap[3]);
                    progress.report((current_time / duration_in_seconds * 100.0).min(99.0));
                }
            }

            if tail.len() == DIAGNOSTIC_LINES {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        }
    }
    tail
}

#[async_trait]
impl Engine for FfmpegEngine {
    fn info(&self) -> &EngineInfo {
        &self.info
    }

    fn supports_abort(&self) -> bool {
        true
    }

    async fn probe(&self, name: &str, input: Bytes) -> Result<MediaInfo> {
        info!("probe called for: {}", name);
        let scratch = self.scratch()?;
        let ext = Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "bin".to_string());
        let input_path = scratch.path().join(format!("probe.{}", ext));
        tokio::fs::write(&input_path, &input).await?;
        drop(input);

        let output = new_command(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate:format=duration",
                "-of",
                "json",
            ])
            .arg(&input_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TransformError::EngineUnavailable(format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(TransformError::EncodeFailed {
                kind: FailureKind::classify(output.status.code(), &stderr),
                detail: stderr,
            });
        }
        parse_probe(&String::from_utf8_lossy(&output.stdout))
    }

    async fn execute(&self, invocation: Invocation, progress: ProgressSink, mut abort: AbortSignal) -> Result<Bytes> {
        let Invocation { command, input } = invocation;
        let scratch = self.scratch()?;

        tokio::fs::write(scratch.path().join(command.input_name()), &input).await?;
        drop(input);

        debug!("Running FFmpeg with args: {:?}", command.args());
        let mut child = new_command(&self.ffmpeg)
            .args(command.args())
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransformError::EncodeFailed {
                kind: FailureKind::Crashed,
                detail: format!("Failed to spawn ffmpeg: {}", e),
            })?;

        let reader = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(relay_progress(stderr, command.expected_duration(), progress.clone())));

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = abort.aborted() => {
                info!("aborting ffmpeg (pid {:?})", child.id());
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(TransformError::EncodeFailed {
                    kind: FailureKind::Crashed,
                    detail: "aborted".to_string(),
                });
            }
        };

        let tail = match reader {
            Some(task) => task.await.unwrap_or_default(),
            None => VecDeque::new(),
        };
        let diagnostic = tail.into_iter().collect::<Vec<_>>().join("\n");

        if !status.success() {
            error!("FFmpeg exited with code {:?}: {}", status.code(), diagnostic);
            return Err(TransformError::EncodeFailed {
                kind: FailureKind::classify(status.code(), &diagnostic),
                detail: diagnostic,
            });
        }

        let output = match tokio::fs::read(scratch.path().join(command.output_name())).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if output.is_empty() {
            return Err(TransformError::EncodeFailed {
                kind: FailureKind::EmptyOutput,
                detail: diagnostic,
            });
        }

        progress.report(100.0);
        Ok(Bytes::from(output))
    }
}
