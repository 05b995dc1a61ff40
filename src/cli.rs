use clap::{Parser, Subcommand};
use log::{info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::BufferStore;
use crate::command::{Quality, ResizeStrategy, TargetResolution};
use crate::config::{self, Config, ConfigOverrides, EncodeDefaults};
use crate::engine::{EngineManager, FfmpegLoader};
use crate::error::{Result, TransformError};
use crate::geometry::{CropRegion, DisplaySize, Size, TrimRange};
use crate::job::JobOutcome;
use crate::session::{Completion, Session, ToolRequest};

#[derive(Parser, Debug)]
#[command(
    name = "media-transform",
    about = "Crop, trim, compress and resize video and images with ffmpeg",
    version,
    arg_required_else_help = true
)]
pub struct Args {
    /// Path to TOML config file (default search: ./media-transform.toml, <config dir>/media-transform/config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// ffmpeg binary to use instead of the configured engine
    #[arg(long, value_name = "PATH", global = true)]
    pub ffmpeg: Option<PathBuf>,

    /// Where to write the result [default: next to the input]
    #[arg(short, long, value_name = "DIR", global = true)]
    pub output_dir: Option<PathBuf>,

    /// Cancel the job if it runs longer than this many seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug)]
pub enum Action {
    /// Print natural size and duration
    Probe { file: PathBuf },
    /// Crop to a rectangle drawn over a preview of the given size
    Crop {
        file: PathBuf,
        /// x,y,width,height in preview pixels
        #[arg(long, value_parser = parse_region)]
        region: CropRegion,
        /// Preview size the region was drawn on, e.g. 640x360 [default: natural size]
        #[arg(long, value_parser = parse_display)]
        preview: Option<DisplaySize>,
    },
    /// Keep only [start, end) seconds
    Trim {
        file: PathBuf,
        #[arg(long)]
        start: f64,
        #[arg(long)]
        end: f64,
    },
    /// Re-encode at a quality between 18 (best) and 32 (smallest)
    Compress {
        file: PathBuf,
        /// Constant rate factor [default: from config, else 23]
        #[arg(long)]
        crf: Option<u8>,
        /// x264/x265 preset name, e.g. veryfast
        #[arg(long)]
        preset: Option<String>,
        /// h264, h265 or vp9
        #[arg(long)]
        codec: Option<String>,
    },
    /// Scale to WxH (with a strategy) or to a height preset like 720p
    Resize {
        file: PathBuf,
        #[arg(long, value_parser = parse_target)]
        to: ResizeTarget,
        #[arg(long, default_value = "fit", value_parser = parse_strategy)]
        strategy: ResizeStrategy,
    },
}

impl Action {
    fn file(&self) -> &Path {
        match self {
            Action::Probe { file }
            | Action::Crop { file, .. }
            | Action::Trim { file, .. }
            | Action::Compress { file, .. }
            | Action::Resize { file, .. } => file,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ResizeTarget {
    Exact(Size),
    Height(u32),
}

fn parse_numbers(s: &str, sep: char, count: usize) -> std::result::Result<Vec<f64>, String> {
    let values: Vec<f64> = s
        .split(sep)
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("{}: {}", p, e)))
        .collect::<std::result::Result<_, _>>()?;
    if values.len() != count {
        return Err(format!("expected {} values separated by '{}'", count, sep));
    }
    Ok(values)
}

fn parse_region(s: &str) -> std::result::Result<CropRegion, String> {
    let v = parse_numbers(s, ',', 4)?;
    Ok(CropRegion::new(v[0], v[1], v[2], v[3]))
}

fn parse_display(s: &str) -> std::result::Result<DisplaySize, String> {
    let v = parse_numbers(&s.to_lowercase(), 'x', 2)?;
    Ok(DisplaySize::new(v[0], v[1]))
}

fn parse_target(s: &str) -> std::result::Result<ResizeTarget, String> {
    let lower = s.to_lowercase();
    if let Some(height) = lower.strip_suffix('p') {
        return height
            .parse::<u32>()
            .map(ResizeTarget::Height)
            .map_err(|e| format!("{}: {}", s, e));
    }
    let (w, h) = lower
        .split_once('x')
        .ok_or_else(|| format!("expected WxH or <height>p, got {}", s))?;
    let w = w.parse::<u32>().map_err(|e| format!("{}: {}", s, e))?;
    let h = h.parse::<u32>().map_err(|e| format!("{}: {}", s, e))?;
    Ok(ResizeTarget::Exact(Size::new(w, h)))
}

fn parse_strategy(s: &str) -> std::result::Result<ResizeStrategy, String> {
    match s.to_lowercase().as_str() {
        "fit" => Ok(ResizeStrategy::Fit),
        "fill" => Ok(ResizeStrategy::Fill),
        "stretch" => Ok(ResizeStrategy::Stretch),
        other => Err(format!("unknown strategy: {}", other)),
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let file_config = config::find_config_file(args.config.as_deref()).and_then(|path| {
        match config::load_config(&path) {
            Ok(cfg) => {
                info!("Loaded config from {}", path.display());
                Some(cfg)
            }
            Err(e) => {
                warn!("Failed to parse config file: {}", e);
                None
            }
        }
    });
    let mut overrides = ConfigOverrides {
        ffmpeg_path: args.ffmpeg.clone(),
        ..ConfigOverrides::default()
    };
    if let Action::Compress { crf, preset, codec, .. } = &args.action {
        overrides.crf = *crf;
        overrides.preset = preset.clone();
        overrides.codec = codec.clone();
    }
    Ok(Config::resolve(file_config, &overrides)?)
}

fn request_for(action: &Action, defaults: &EncodeDefaults, session: &mut Session) -> Result<Option<ToolRequest>> {
    let request = match action {
        Action::Probe { .. } => return Ok(None),
        Action::Crop { region, preview, .. } => {
            let displayed = match preview {
                Some(p) => *p,
                None => {
                    let natural = session
                        .asset()
                        .and_then(|a| a.natural())
                        .ok_or(TransformError::AssetNotReady)?;
                    DisplaySize::new(natural.width as f64, natural.height as f64)
                }
            };
            session.set_preview(displayed);
            ToolRequest::Crop { region: *region }
        }
        Action::Trim { start, end, .. } => ToolRequest::Trim {
            range: TrimRange::new(*start, *end),
        },
        Action::Compress { .. } => ToolRequest::Compress {
            quality: Quality::Crf(defaults.crf),
            preset: Some(defaults.preset),
        },
        Action::Resize { to, strategy, .. } => ToolRequest::Resize {
            target: match to {
                ResizeTarget::Exact(size) => TargetResolution::Exact {
                    size: *size,
                    strategy: *strategy,
                },
                ResizeTarget::Height(h) => TargetResolution::Height(*h),
            },
        },
    };
    Ok(Some(request))
}

pub async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let loader = FfmpegLoader::new(config.engine.clone(), config.scratch_dir.clone());
    let engines = Arc::new(EngineManager::new(Arc::new(loader)));
    let store = BufferStore::new();
    let mut session = Session::new(store.clone(), engines, config.encode.clone());

    let path = args.action.file().to_path_buf();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let bytes = tokio::fs::read(&path).await?;
    session.open(&name, None, bytes)?;

    let info = session.probe().await?;
    let Some(request) = request_for(&args.action, &config.encode, &mut session)? else {
        println!("{}", serde_json::to_string_pretty(&info).unwrap_or_default());
        return Ok(());
    };

    let mut job = session.process(&request).await?;
    job.on_progress(|percent| {
        eprint!("\rprogress: {:3}%", percent);
        let _ = std::io::stderr().flush();
    });
    let cancel = job.cancel_handle();
    let timeout = args.timeout;
    let wait = async move {
        match timeout {
            Some(secs) => job.wait_timeout(Duration::from_secs(secs)).await,
            None => job.wait().await,
        }
    };
    tokio::pin!(wait);

    let outcome: JobOutcome = tokio::select! {
        outcome = &mut wait => outcome,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            wait.await
        }
    };
    eprintln!();

    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    let (target, bytes) = match session.complete(outcome) {
        Completion::Artifact(artifact) => (output_dir.join(&artifact.name), artifact.bytes(&store)?),
        Completion::Cancelled => {
            println!("cancelled");
            return Ok(());
        }
        Completion::Failed(e) => return Err(unshare(e)),
    };
    tokio::fs::write(&target, &bytes).await?;
    println!("{}", target.display());

    session.clear();
    Ok(())
}

/// The job's state channel may still hold the error; keep it wrapped rather than rebuild it.
fn unshare(error: Arc<TransformError>) -> TransformError {
    Arc::try_unwrap(error).unwrap_or_else(TransformError::Shared)
}
