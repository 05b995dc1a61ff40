//! Display-space to native-space translation.
//!
//! The preview shows an asset scaled to whatever size the layout gives it.
//! Regions drawn over that preview are multiplied by `natural / displayed`,
//! rounded to the nearest pixel, then clamped so the rectangle never leaves
//! the frame. Every tool goes through [`to_native`]; none scales by hand.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransformError};

/// Timestamps this close below zero are scrubber noise, not a caller bug.
const TIME_SLOP: f64 = 1e-3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Rendered size of the preview element, in layout pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: f64,
    pub height: f64,
}

impl DisplaySize {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    fn is_renderable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportMapping {
    natural: Option<Size>,
    displayed: DisplaySize,
}

impl ViewportMapping {
    /// Build from the asset's natural size (if known yet) and the preview's
    /// current rendered size.
    pub fn new(natural: Option<Size>, displayed: DisplaySize) -> Self {
        Self { natural, displayed }
    }

    /// Native pixels viewed at native scale.
    pub fn identity(natural: Size) -> Self {
        Self {
            natural: Some(natural),
            displayed: DisplaySize::new(natural.width as f64, natural.height as f64),
        }
    }

    pub fn natural(&self) -> Option<Size> {
        self.natural
    }

    pub fn displayed(&self) -> DisplaySize {
        self.displayed
    }

    /// `(natural.width / displayed.width, natural.height / displayed.height)`
    pub fn scale(&self) -> Result<(f64, f64)> {
        let natural = self.natural.filter(|n| !n.is_empty()).ok_or(TransformError::AssetNotReady)?;
        if !self.displayed.is_renderable() {
            return Err(TransformError::AssetNotReady);
        }
        Ok((
            natural.width as f64 / self.displayed.width,
            natural.height as f64 / self.displayed.height,
        ))
    }
}

/// Rectangle in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropRegion {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    fn validate(&self) -> Result<()> {
        let parts = [self.x, self.y, self.width, self.height];
        if parts.iter().any(|v| !v.is_finite()) {
            return Err(TransformError::InvalidRegion("non-finite coordinate".into()));
        }
        if parts.iter().any(|v| *v < 0.0) {
            return Err(TransformError::InvalidRegion("negative coordinate".into()));
        }
        if self.width == 0.0 || self.height == 0.0 {
            return Err(TransformError::InvalidRegion("zero-area region".into()));
        }
        Ok(())
    }
}

/// Integer pixel rectangle inside `[0, width) x [0, height)` of the asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl NativeCropRegion {
    /// Exclusive right edge. Wider than `u32` so a far-out `x` cannot wrap.
    pub fn right(&self) -> u64 {
        u64::from(self.x) + u64::from(self.width)
    }

    pub fn bottom(&self) -> u64 {
        u64::from(self.y) + u64::from(self.height)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn fits_within(&self, natural: Size) -> bool {
        self.width > 0 && self.height > 0 && self.right() <= u64::from(natural.width)
            && self.bottom() <= u64::from(natural.height)
    }

    /// The same rectangle as a display-space region at native scale.
    pub fn as_display(&self) -> CropRegion {
        CropRegion::new(self.x as f64, self.y as f64, self.width as f64, self.height as f64)
    }
}

pub fn to_native(region: &CropRegion, mapping: &ViewportMapping) -> Result<NativeCropRegion> {
    region.validate()?;
    let (scale_x, scale_y) = mapping.scale()?;
    let displayed = mapping.displayed();
    let natural = mapping.natural().ok_or(TransformError::AssetNotReady)?;

    let tolerance = 1e-6 * displayed.width.max(displayed.height).max(1.0);
    if region.x + region.width > displayed.width + tolerance
        || region.y + region.height > displayed.height + tolerance
    {
        return Err(TransformError::InvalidRegion(format!(
            "region exceeds the {}x{} preview",
            displayed.width, displayed.height
        )));
    }

    let (x, width) = clamp_axis(region.x * scale_x, region.width * scale_x, natural.width);
    let (y, height) = clamp_axis(region.y * scale_y, region.height * scale_y, natural.height);

    if width == 0 || height == 0 {
        return Err(TransformError::InvalidRegion(format!(
            "region rounds to {}x{} native pixels",
            width, height
        )));
    }
    Ok(NativeCropRegion { x, y, width, height })
}

/// Round one axis and keep `offset + length <= limit`.
fn clamp_axis(offset: f64, length: f64, limit: u32) -> (u32, u32) {
    let offset = (offset.round().max(0.0) as u64).min(limit.saturating_sub(1) as u64) as u32;
    let length = (length.round().max(0.0) as u64).min((limit - offset) as u64) as u32;
    (offset, length)
}

/// `[start, end)` in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimRange {
    pub start: f64,
    pub end: f64,
}

impl TrimRange {
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Time needs no scaling; only validation and clamping to `[0, duration]`.
/// A start before zero is rejected, an end past the container is pulled back.
pub fn to_native_range(range: &TrimRange, duration: f64) -> Result<TrimRange> {
    if !duration.is_finite() || duration <= 0.0 {
        return Err(TransformError::AssetNotReady);
    }
    if !range.start.is_finite() || !range.end.is_finite() {
        return Err(TransformError::InvalidRange("non-finite timestamp".into()));
    }
    if range.start < -TIME_SLOP {
        return Err(TransformError::InvalidRange(format!("start {}s is before 0s", range.start)));
    }

    let start = range.start.max(0.0);
    let end = range.end.min(duration);
    if start >= end {
        return Err(TransformError::InvalidRange(format!(
            "empty range {}s..{}s on a {}s asset",
            range.start, range.end, duration
        )));
    }
    Ok(TrimRange { start, end })
}
