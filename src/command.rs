use log::debug;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::asset::{mime_for_extension, MediaAsset, MediaKind};
use crate::error::{Result, TransformError};
use crate::geometry::{NativeCropRegion, Size, TrimRange};

pub const MIN_CRF: u8 = 18;
pub const MAX_CRF: u8 = 32;

// ============================================================================
// Encode Settings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
}

impl VideoCodec {
    pub fn encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Vp9 => "libvpx-vp9",
        }
    }

    pub fn container(&self) -> &'static str {
        match self {
            VideoCodec::H264 | VideoCodec::H265 => "mp4",
            VideoCodec::Vp9 => "webm",
        }
    }
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "libx264" | "avc" => Ok(VideoCodec::H264),
            "h265" | "libx265" | "hevc" => Ok(VideoCodec::H265),
            "vp9" | "libvpx-vp9" => Ok(VideoCodec::Vp9),
            other => Err(format!("unknown video codec: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Ultrafast => "ultrafast",
            Preset::Superfast => "superfast",
            Preset::Veryfast => "veryfast",
            Preset::Faster => "faster",
            Preset::Fast => "fast",
            Preset::Medium => "medium",
            Preset::Slow => "slow",
            Preset::Slower => "slower",
            Preset::Veryslow => "veryslow",
        }
    }

    /// libvpx has no x264-style presets; map onto its deadline modes.
    fn vp9_deadline(&self) -> &'static str {
        match self {
            Preset::Ultrafast | Preset::Superfast | Preset::Veryfast => "realtime",
            _ => "good",
        }
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let all = [
            Preset::Ultrafast,
            Preset::Superfast,
            Preset::Veryfast,
            Preset::Faster,
            Preset::Fast,
            Preset::Medium,
            Preset::Slow,
            Preset::Slower,
            Preset::Veryslow,
        ];
        let wanted = s.to_ascii_lowercase();
        all.into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| format!("unknown preset: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Constant rate factor, 18 (best) to 32 (smallest).
    Crf(u8),
    /// Average video bitrate in kbit/s.
    Bitrate(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeStrategy {
    /// Scale down to fit, letterbox the rest.
    Fit,
    /// Scale up to cover, crop the overflow.
    Fill,
    /// Ignore aspect ratio.
    Stretch,
}

impl ResizeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResizeStrategy::Fit => "fit",
            ResizeStrategy::Fill => "fill",
            ResizeStrategy::Stretch => "stretch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetResolution {
    Exact { size: Size, strategy: ResizeStrategy },
    /// Keep aspect ratio, fix the height (the 1080p/720p/... presets).
    Height(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioMode {
    Encode { bitrate_kbps: u32 },
    Copy,
    Drop,
}

// ============================================================================
// TransformSpec
// ============================================================================

/// One requested operation, already in native coordinates. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSpec {
    crop: Option<NativeCropRegion>,
    trim: Option<TrimRange>,
    resize: Option<TargetResolution>,
    quality: Option<Quality>,
    preset: Option<Preset>,
    codec: VideoCodec,
    audio: AudioMode,
    threads: Option<u32>,
}

impl TransformSpec {
    pub fn builder() -> TransformSpecBuilder {
        TransformSpecBuilder::default()
    }

    pub fn crop(&self) -> Option<NativeCropRegion> {
        self.crop
    }

    pub fn trim(&self) -> Option<TrimRange> {
        self.trim
    }

    pub fn resize(&self) -> Option<TargetResolution> {
        self.resize
    }

    pub fn quality(&self) -> Option<Quality> {
        self.quality
    }

    pub fn preset(&self) -> Option<Preset> {
        self.preset
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    /// Trim with nothing else can be done without re-encoding.
    pub fn is_stream_copy(&self) -> bool {
        self.trim.is_some() && self.crop.is_none() && self.resize.is_none() && self.quality.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct TransformSpecBuilder {
    spec: TransformSpec,
}

impl Default for TransformSpecBuilder {
    fn default() -> Self {
        Self {
            spec: TransformSpec {
                crop: None,
                trim: None,
                resize: None,
                quality: None,
                preset: None,
                codec: VideoCodec::H264,
                audio: AudioMode::Encode { bitrate_kbps: 128 },
                threads: None,
            },
        }
    }
}

impl TransformSpecBuilder {
    pub fn crop(mut self, region: NativeCropRegion) -> Self {
        self.spec.crop = Some(region);
        self
    }

    pub fn trim(mut self, range: TrimRange) -> Self {
        self.spec.trim = Some(range);
        self
    }

    pub fn resize(mut self, target: TargetResolution) -> Self {
        self.spec.resize = Some(target);
        self
    }

    pub fn quality(mut self, quality: Quality) -> Self {
        self.spec.quality = Some(quality);
        self
    }

    pub fn preset(mut self, preset: Preset) -> Self {
        self.spec.preset = Some(preset);
        self
    }

    pub fn codec(mut self, codec: VideoCodec) -> Self {
        self.spec.codec = codec;
        self
    }

    pub fn audio(mut self, audio: AudioMode) -> Self {
        self.spec.audio = audio;
        self
    }

    pub fn threads(mut self, threads: u32) -> Self {
        self.spec.threads = Some(threads).filter(|t| *t > 0);
        self
    }

    pub fn build(self) -> Result<TransformSpec> {
        let spec = self.spec;
        if spec.crop.is_none() && spec.trim.is_none() && spec.resize.is_none() && spec.quality.is_none() {
            return Err(TransformError::InvalidSpec("nothing to do".into()));
        }
        if let Some(crop) = spec.crop {
            if crop.width == 0 || crop.height == 0 {
                return Err(TransformError::InvalidRegion("zero-area region".into()));
            }
        }
        if let Some(trim) = spec.trim {
            if !(trim.start >= 0.0 && trim.start < trim.end && trim.end.is_finite()) {
                return Err(TransformError::InvalidRange(format!("{}s..{}s", trim.start, trim.end)));
            }
        }
        match spec.resize {
            Some(TargetResolution::Exact { size, .. }) if size.is_empty() => {
                return Err(TransformError::InvalidSpec(format!("target size {}", size)));
            }
            Some(TargetResolution::Height(0)) => {
                return Err(TransformError::InvalidSpec("target height 0".into()));
            }
            _ => {}
        }
        match spec.quality {
            Some(Quality::Crf(crf)) if !(MIN_CRF..=MAX_CRF).contains(&crf) => {
                return Err(TransformError::InvalidSpec(format!(
                    "quality {} outside {}-{}",
                    crf, MIN_CRF, MAX_CRF
                )));
            }
            Some(Quality::Bitrate(0)) => {
                return Err(TransformError::InvalidSpec("bitrate 0".into()));
            }
            _ => {}
        }
        if let AudioMode::Encode { bitrate_kbps: 0 } = spec.audio {
            return Err(TransformError::InvalidSpec("audio bitrate 0".into()));
        }
        Ok(spec)
    }
}

// ============================================================================
// Command Builder
// ============================================================================

/// Ordered engine arguments plus the file names they refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandArgs {
    args: Vec<String>,
    filters: Vec<String>,
    input_name: String,
    output_name: String,
    output_extension: &'static str,
    expected_duration: Option<f64>,
}

impl CommandArgs {
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Video filter chain in application order.
    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn output_extension(&self) -> &'static str {
        self.output_extension
    }

    pub fn output_mime(&self) -> &'static str {
        mime_for_extension(self.output_extension)
    }

    /// Media time the engine will produce, for progress estimation.
    pub fn expected_duration(&self) -> Option<f64> {
        self.expected_duration
    }
}

fn push(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

fn seconds(value: f64) -> String {
    format!("{:.3}", value)
}

/// yuv420p needs even dimensions.
fn even(value: u32) -> u32 {
    value & !1
}

fn image_output_extension(input: &'static str) -> &'static str {
    match input {
        "jpg" | "jpeg" => "jpg",
        "webp" => "webp",
        _ => "png",
    }
}

fn scale_filter(target: TargetResolution, even_only: bool) -> Result<String> {
    let fix = |v: u32| if even_only { even(v) } else { v };
    match target {
        TargetResolution::Height(h) => {
            let h = fix(h);
            if h == 0 {
                return Err(TransformError::InvalidSpec("target height too small".into()));
            }
            Ok(format!("scale=-2:{}", h))
        }
        TargetResolution::Exact { size, strategy } => {
            let (w, h) = (fix(size.width), fix(size.height));
            if w == 0 || h == 0 {
                return Err(TransformError::InvalidSpec(format!("target size {} too small", size)));
            }
            Ok(match strategy {
                ResizeStrategy::Fit => format!(
                    "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2"
                ),
                ResizeStrategy::Fill => {
                    format!("scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}")
                }
                ResizeStrategy::Stretch => format!("scale={w}:{h},setsar=1"),
            })
        }
    }
}

pub fn build(spec: &TransformSpec, asset: &MediaAsset) -> Result<CommandArgs> {
    let kind = asset.kind();
    let input_name = format!("input.{}", asset.extension());

    if kind == MediaKind::Image {
        if spec.trim.is_some() {
            return Err(TransformError::InvalidSpec("images cannot be trimmed".into()));
        }
        if matches!(spec.quality, Some(Quality::Bitrate(_))) {
            return Err(TransformError::InvalidSpec("images have no bitrate".into()));
        }
    }
    if let (Some(crop), Some(natural)) = (spec.crop, asset.natural()) {
        if !crop.fits_within(natural) {
            return Err(TransformError::InvalidRegion(format!(
                "{}x{}+{}+{} outside {}",
                crop.width, crop.height, crop.x, crop.y, natural
            )));
        }
    }
    if let (Some(trim), Some(duration)) = (spec.trim, asset.duration()) {
        if trim.end > duration {
            return Err(TransformError::InvalidRange(format!("end {}s past {}s", trim.end, duration)));
        }
    }

    let stream_copy = kind == MediaKind::Video && spec.is_stream_copy();
    let output_extension = match kind {
        MediaKind::Video if stream_copy => asset.extension(),
        MediaKind::Video => spec.codec.container(),
        MediaKind::Image => image_output_extension(asset.extension()),
    };
    let output_name = format!("output.{}", output_extension);

    let mut args: Vec<String> = Vec::new();
    push(&mut args, &["-hide_banner", "-y"]);
    if let Some(trim) = spec.trim {
        push(&mut args, &["-ss", &seconds(trim.start)]);
    }
    push(&mut args, &["-i", &input_name]);
    if let Some(trim) = spec.trim {
        push(&mut args, &["-t", &seconds(trim.duration())]);
    }

    // Crop first: its rectangle is in source pixels, which a prior scale would change.
    let even_only = kind == MediaKind::Video;
    let mut filters = Vec::new();
    if let Some(crop) = spec.crop {
        let (w, h) = if even_only { (even(crop.width), even(crop.height)) } else { (crop.width, crop.height) };
        if w == 0 || h == 0 {
            return Err(TransformError::InvalidRegion("crop narrower than 2 pixels".into()));
        }
        filters.push(format!("crop={}:{}:{}:{}", w, h, crop.x, crop.y));
    }
    if let Some(target) = spec.resize {
        filters.push(scale_filter(target, even_only)?);
    }
    if !filters.is_empty() {
        push(&mut args, &["-vf", &filters.join(",")]);
    }

    match kind {
        MediaKind::Video if stream_copy => {
            push(&mut args, &["-map", "0:v:0", "-map", "0:a?", "-c", "copy"]);
            push(&mut args, &["-avoid_negative_ts", "make_zero"]);
        }
        MediaKind::Video => {
            push(&mut args, &["-map", "0:v:0", "-map", "0:a?"]);
            push(&mut args, &["-c:v", spec.codec.encoder()]);
            match (spec.quality, spec.codec) {
                (Some(Quality::Crf(crf)), VideoCodec::Vp9) => {
                    push(&mut args, &["-crf", &crf.to_string(), "-b:v", "0"]);
                }
                (Some(Quality::Crf(crf)), _) => push(&mut args, &["-crf", &crf.to_string()]),
                (Some(Quality::Bitrate(kbps)), _) => push(&mut args, &["-b:v", &format!("{}k", kbps)]),
                (None, _) => {}
            }
            if let Some(preset) = spec.preset {
                match spec.codec {
                    VideoCodec::Vp9 => push(&mut args, &["-deadline", preset.vp9_deadline()]),
                    _ => push(&mut args, &["-preset", preset.as_str()]),
                }
            }
            push(&mut args, &["-pix_fmt", "yuv420p"]);
            match spec.audio {
                AudioMode::Encode { bitrate_kbps } => {
                    let encoder = if output_extension == "webm" { "libopus" } else { "aac" };
                    push(&mut args, &["-c:a", encoder, "-b:a", &format!("{}k", bitrate_kbps)]);
                }
                AudioMode::Copy => push(&mut args, &["-c:a", "copy"]),
                AudioMode::Drop => push(&mut args, &["-an"]),
            }
            if let Some(threads) = spec.threads {
                push(&mut args, &["-threads", &threads.to_string()]);
            }
        }
        MediaKind::Image => {
            push(&mut args, &["-frames:v", "1"]);
            if let Some(Quality::Crf(crf)) = spec.quality {
                match output_extension {
                    "jpg" => push(&mut args, &["-q:v", &((crf - MIN_CRF) / 2 + 1).to_string()]),
                    "webp" => {
                        let q = 100 - u32::from(crf - MIN_CRF) * 4;
                        push(&mut args, &["-quality", &q.to_string()]);
                    }
                    _ => push(&mut args, &["-compression_level", "9"]),
                }
            }
        }
    }
    if output_extension == "mp4" || output_extension == "mov" {
        push(&mut args, &["-movflags", "+faststart"]);
    }
    args.push(output_name.clone());

    let expected_duration = spec.trim.map(|t| t.duration()).or(asset.duration());
    debug!("built command: {:?}", args);

    Ok(CommandArgs {
        args,
        filters,
        input_name,
        output_name,
        output_extension,
        expected_duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crf_bounds_are_enforced() {
        let ok = TransformSpec::builder().quality(Quality::Crf(MIN_CRF)).build();
        assert!(ok.is_ok());
        let err = TransformSpec::builder().quality(Quality::Crf(MAX_CRF + 1)).build();
        assert!(matches!(err, Err(TransformError::InvalidSpec(_))));
    }

    #[test]
    fn empty_spec_is_rejected() {
        assert!(matches!(TransformSpec::builder().build(), Err(TransformError::InvalidSpec(_))));
    }

    #[test]
    fn preset_parse_round_trip() {
        assert_eq!("VerySlow".parse::<Preset>().unwrap(), Preset::Veryslow);
        assert!("placebo".parse::<Preset>().is_err());
        assert_eq!("hevc".parse::<VideoCodec>().unwrap(), VideoCodec::H265);
    }

    #[test]
    fn strategies_emit_one_expression_each() {
        let size = Size::new(1280, 720);
        let fit = scale_filter(TargetResolution::Exact { size, strategy: ResizeStrategy::Fit }, true).unwrap();
        let fill = scale_filter(TargetResolution::Exact { size, strategy: ResizeStrategy::Fill }, true).unwrap();
        let stretch = scale_filter(TargetResolution::Exact { size, strategy: ResizeStrategy::Stretch }, true).unwrap();
        assert!(fit.contains("decrease") && fit.contains("pad="));
        assert!(fill.contains("increase") && fill.ends_with("crop=1280:720"));
        assert_eq!(stretch, "scale=1280:720,setsar=1");
    }

    #[test]
    fn odd_targets_are_evened_for_video() {
        let f = scale_filter(TargetResolution::Height(721), true).unwrap();
        assert_eq!(f, "scale=-2:720");
        let f = scale_filter(TargetResolution::Height(721), false).unwrap();
        assert_eq!(f, "scale=-2:721");
    }
}
