use bytes::Bytes;
use log::{info, warn};
use std::sync::Arc;

use crate::asset::{artifact_name, MediaAsset, MediaInfo, MediaKind, OutputArtifact};
use crate::buffer::{BufferStore, PreviewLease};
use crate::command::{self, AudioMode, Preset, Quality, TargetResolution, TransformSpec};
use crate::config::EncodeDefaults;
use crate::engine::EngineManager;
use crate::error::{Result, TransformError};
use crate::geometry::{self, CropRegion, DisplaySize, Size, TrimRange, ViewportMapping};
use crate::job::{self, Job, JobOutcome};

/// What the user asked one of the tools to do, in display coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    Crop { region: CropRegion },
    Trim { range: TrimRange },
    Compress { quality: Quality, preset: Option<Preset> },
    Resize { target: TargetResolution },
}

impl ToolRequest {
    /// Prefix of the output file name.
    pub fn strategy(&self) -> &'static str {
        match self {
            ToolRequest::Crop { .. } => "cropped",
            ToolRequest::Trim { .. } => "trimmed",
            ToolRequest::Compress { .. } => "compressed",
            ToolRequest::Resize {
                target: TargetResolution::Exact { strategy, .. },
            } => strategy.as_str(),
            ToolRequest::Resize { .. } => "resized",
        }
    }
}

#[derive(Debug)]
pub enum Completion<'a> {
    Artifact(&'a OutputArtifact),
    Failed(Arc<TransformError>),
    Cancelled,
}

/// One open file and its latest output, wired to the shared engine.
pub struct Session {
    store: BufferStore,
    engines: Arc<EngineManager>,
    defaults: EncodeDefaults,
    asset: Option<MediaAsset>,
    preview: Option<DisplaySize>,
    output: Option<OutputArtifact>,
    pending_name: Option<String>,
}

impl Session {
    pub fn new(store: BufferStore, engines: Arc<EngineManager>, defaults: EncodeDefaults) -> Self {
        Self {
            store,
            engines,
            defaults,
            asset: None,
            preview: None,
            output: None,
            pending_name: None,
        }
    }

    pub fn store(&self) -> &BufferStore {
        &self.store
    }

    pub fn asset(&self) -> Option<&MediaAsset> {
        self.asset.as_ref()
    }

    pub fn output(&self) -> Option<&OutputArtifact> {
        self.output.as_ref()
    }

    /// Replace the current file. The previous asset and output are released,
    /// and crops wait for the new preview size.
    pub fn open(&mut self, name: &str, mime: Option<&str>, bytes: impl Into<Bytes>) -> Result<&MediaAsset> {
        let asset = MediaAsset::open(&self.store, name, mime, bytes)?;
        self.clear();
        Ok(self.asset.insert(asset))
    }

    /// Rendered size of the preview element, reported whenever layout changes.
    pub fn set_preview(&mut self, displayed: DisplaySize) {
        self.preview = Some(displayed);
    }

    pub fn set_natural(&mut self, natural: Size) -> Result<()> {
        self.asset_mut()?.set_natural(natural);
        Ok(())
    }

    pub fn set_duration(&mut self, seconds: f64) -> Result<()> {
        self.asset_mut()?.set_duration(seconds);
        Ok(())
    }

    /// Ask the engine for natural size and duration.
    pub async fn probe(&mut self) -> Result<MediaInfo> {
        let (name, bytes) = {
            let asset = self.asset.as_ref().ok_or(TransformError::AssetNotReady)?;
            (asset.name().to_string(), asset.bytes(&self.store)?)
        };
        let engine = self.engines.acquire().await?;
        let info = engine.engine().probe(&name, bytes).await?;
        self.asset_mut()?.apply_probe(&info);
        Ok(info)
    }

    pub fn preview_lease(&self) -> Result<PreviewLease> {
        let asset = self.asset.as_ref().ok_or(TransformError::AssetNotReady)?;
        self.store.lease(asset.handle())
    }

    pub fn mapping(&self) -> Result<ViewportMapping> {
        let asset = self.asset.as_ref().ok_or(TransformError::AssetNotReady)?;
        let displayed = self.preview.ok_or(TransformError::AssetNotReady)?;
        Ok(ViewportMapping::new(asset.natural(), displayed))
    }

    /// Validate `request` against the current asset and preview. No engine involved.
    pub fn spec_for(&self, request: &ToolRequest) -> Result<TransformSpec> {
        let asset = self.asset.as_ref().ok_or(TransformError::AssetNotReady)?;
        let video = asset.kind() == MediaKind::Video;

        let mut builder = TransformSpec::builder()
            .codec(self.defaults.codec)
            .audio(AudioMode::Encode {
                bitrate_kbps: self.defaults.audio_bitrate_kbps,
            });
        if let Some(threads) = self.defaults.threads {
            builder = builder.threads(threads);
        }
        let reencode = |b: command::TransformSpecBuilder| {
            if video {
                b.quality(Quality::Crf(self.defaults.crf)).preset(self.defaults.preset)
            } else {
                b
            }
        };

        builder = match request {
            ToolRequest::Crop { region } => {
                let native = geometry::to_native(region, &self.mapping()?)?;
                reencode(builder.crop(native))
            }
            ToolRequest::Trim { range } => {
                if !video {
                    return Err(TransformError::InvalidSpec("images cannot be trimmed".into()));
                }
                let duration = asset.duration().ok_or(TransformError::AssetNotReady)?;
                builder.trim(geometry::to_native_range(range, duration)?)
            }
            ToolRequest::Compress { quality, preset } => {
                let builder = builder.quality(*quality);
                match (video, preset) {
                    (true, Some(p)) => builder.preset(*p),
                    (true, None) => builder.preset(self.defaults.preset),
                    (false, _) => builder,
                }
            }
            ToolRequest::Resize { target } => reencode(builder.resize(*target)),
        };
        builder.build()
    }

    /// Validate, build, and hand the job to the engine.
    pub async fn process(&mut self, request: &ToolRequest) -> Result<Job> {
        let spec = self.spec_for(request)?;
        let (args, input, name) = {
            let asset = self.asset.as_ref().ok_or(TransformError::AssetNotReady)?;
            let args = command::build(&spec, asset)?;
            let name = artifact_name(request.strategy(), asset.name(), args.output_extension());
            (args, asset.bytes(&self.store)?, name)
        };
        info!("process {:?} -> {}", request, name);

        let engine = self.engines.acquire().await?;
        let job = job::submit(args, input, &engine)?;
        self.pending_name = Some(name);
        Ok(job)
    }

    /// Take ownership of a finished job's output. Failed or cancelled jobs
    /// leave the previous artifact in place.
    pub fn complete(&mut self, outcome: JobOutcome) -> Completion<'_> {
        let name = self.pending_name.take();
        match outcome {
            JobOutcome::Succeeded(output) => {
                let name = name.unwrap_or_else(|| format!("output.{}", output.extension));
                let artifact = OutputArtifact::new(&self.store, name, output.mime, output.bytes);
                if let Some(previous) = self.output.take() {
                    previous.discard(&self.store);
                }
                Completion::Artifact(self.output.insert(artifact))
            }
            JobOutcome::Failed(e) => {
                warn!("job failed: {}", e);
                Completion::Failed(e)
            }
            JobOutcome::Cancelled => Completion::Cancelled,
        }
    }

    /// `process` + wait + `complete`, forwarding progress to `on_progress`.
    pub async fn run<F>(&mut self, request: &ToolRequest, on_progress: F) -> Result<Completion<'_>>
    where
        F: FnMut(u8) + Send + 'static,
    {
        let mut job = self.process(request).await?;
        job.on_progress(on_progress);
        let outcome = job.wait().await;
        Ok(self.complete(outcome))
    }

    /// Release the asset and the output.
    pub fn clear(&mut self) {
        self.pending_name = None;
        self.preview = None;
        if let Some(output) = self.output.take() {
            output.discard(&self.store);
        }
        if let Some(asset) = self.asset.take() {
            asset.discard(&self.store);
        }
    }

    fn asset_mut(&mut self) -> Result<&mut MediaAsset> {
        self.asset.as_mut().ok_or(TransformError::AssetNotReady)
    }
}
