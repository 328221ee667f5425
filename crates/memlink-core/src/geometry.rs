//! Geometry policy: from a [`PreprocessConfig`] to blit rectangles.
//!
//! # Precedence
//!
//! 1. Padding (if configured and not already applied upstream) shrinks the
//!    usable destination to the inner area.
//! 2. Resize scales the source ROI toward the inner area; aspect-locked modes
//!    use the smaller factor.  When a crop follows, both factors get a margin
//!    of [`CROP_MARGIN`] so the crop has material to remove.
//! 3. Crop trims the resized region back to the inner area on the requested
//!    side; the trim is pushed back onto the source rectangle.
//! 4. The region is centered in the destination; the border is filled.
//!
//! The returned [`TransformRecord`] is enough to map detections on the
//! destination back to source coordinates.

use serde::{Deserialize, Serialize};

use crate::error::{MemError, Result};
use crate::preprocess::{CropMode, PreprocessConfig};

/// Extra scale applied before a crop.
pub const CROP_MARGIN: f64 = 1.125;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: usize,
    pub height: usize,
}

impl Size {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub const fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn full(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub const fn right(&self) -> usize {
        self.x + self.width
    }

    pub const fn bottom(&self) -> usize {
        self.y + self.height
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub const fn fits_within(&self, size: Size) -> bool {
        self.right() <= size.width && self.bottom() <= size.height
    }
}

// ─── Transformation record ──────────────────────────────────────────────────

/// What the geometry policy did to an image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformRecord {
    pub was_resize: bool,
    pub was_aspect_ratio_resize: bool,
    pub was_crop: bool,
    pub was_padding: bool,
    pub resize_scale_x: f64,
    pub resize_scale_y: f64,
    /// Trimmed border, in resized coordinates.
    pub crop_x: usize,
    pub crop_y: usize,
    /// Offset of the image inside the destination.
    pub padding_x: usize,
    pub padding_y: usize,
    /// Origin of the source ROI.
    pub roi_x: usize,
    pub roi_y: usize,
}

impl Default for TransformRecord {
    fn default() -> Self {
        Self {
            was_resize: false,
            was_aspect_ratio_resize: false,
            was_crop: false,
            was_padding: false,
            resize_scale_x: 1.0,
            resize_scale_y: 1.0,
            crop_x: 0,
            crop_y: 0,
            padding_x: 0,
            padding_y: 0,
            roi_x: 0,
            roi_y: 0,
        }
    }
}

impl TransformRecord {
    pub fn was_transformed(&self) -> bool {
        self.was_resize || self.was_aspect_ratio_resize || self.was_crop || self.was_padding
    }

    pub fn resize_done(&mut self, scale_x: f64, scale_y: f64) {
        self.was_resize = true;
        self.resize_scale_x *= scale_x;
        self.resize_scale_y *= scale_y;
    }

    pub fn crop_done(&mut self, x: usize, y: usize) {
        self.was_crop = true;
        self.crop_x += x;
        self.crop_y += y;
    }

    pub fn padding_done(&mut self, x: usize, y: usize) {
        self.was_padding = true;
        self.padding_x += x;
        self.padding_y += y;
    }

    /// Destination point back to source coordinates.
    pub fn restore_point(&self, x: f64, y: f64) -> (f64, f64) {
        let sx = (x - self.padding_x as f64 + self.crop_x as f64) / self.resize_scale_x;
        let sy = (y - self.padding_y as f64 + self.crop_y as f64) / self.resize_scale_y;
        (sx + self.roi_x as f64, sy + self.roi_y as f64)
    }

    /// Destination box `(x, y, w, h)` back to source coordinates.
    pub fn restore_rect(&self, x: f64, y: f64, w: f64, h: f64) -> (f64, f64, f64, f64) {
        let (x0, y0) = self.restore_point(x, y);
        let (x1, y1) = self.restore_point(x + w, y + h);
        (x0, y0, x1 - x0, y1 - y0)
    }
}

// ─── Plan ───────────────────────────────────────────────────────────────────

/// Blit parameters for one conversion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometryPlan {
    /// Region read from the source frame.
    pub src_rect: Rect,
    /// Region written in the destination; the rest is `fill`.
    pub dst_rect: Rect,
    pub fill: [u8; 4],
    pub transform: TransformRecord,
}

fn scaled(len: usize, scale: f64) -> usize {
    (len as f64 * scale + 0.5) as usize
}

fn unscaled(len: usize, scale: f64) -> usize {
    (len as f64 / scale) as usize
}

fn floored(len: usize, scale: f64) -> usize {
    (len as f64 * scale) as usize
}

/// Compute source/destination rectangles for converting the `roi` of a
/// `src`-sized frame into a `dst`-sized model input.
pub fn plan_geometry(
    config: &PreprocessConfig,
    src: Size,
    roi: Option<Rect>,
    dst: Size,
    prior: Option<&TransformRecord>,
) -> Result<GeometryPlan> {
    let roi = roi.unwrap_or(Rect::full(src));
    if roi.is_empty() || !roi.fits_within(src) {
        return Err(MemError::invalid(format!(
            "ROI {roi:?} is empty or outside the {}x{} source",
            src.width, src.height
        )));
    }
    if dst.width == 0 || dst.height == 0 {
        return Err(MemError::invalid("destination size must be non-zero"));
    }

    let mut record = prior.cloned().unwrap_or_default();

    let (pad_x, pad_y) = match &config.padding {
        Some(padding) if !record.was_padding => (padding.stride_x, padding.stride_y),
        _ => (0, 0),
    };
    if pad_x * 2 > dst.width || pad_y * 2 > dst.height {
        return Err(MemError::invalid(format!(
            "padding {pad_x}x{pad_y} does not fit a {}x{} destination",
            dst.width, dst.height
        )));
    }
    let inner = Size::new(dst.width - pad_x * 2, dst.height - pad_y * 2);

    let mut src_rect = roi;
    let mut region = Size::new(roi.width, roi.height);
    let (mut scale_x, mut scale_y) = (1.0f64, 1.0f64);
    let mut resized = false;

    // Resize
    if config.needs_resize() && (roi.width != inner.width || roi.height != inner.height) {
        scale_x = inner.width as f64 / roi.width as f64;
        scale_y = inner.height as f64 / roi.height as f64;
        if config.resize.is_aspect_locked() {
            let s = scale_x.min(scale_y);
            scale_x = s;
            scale_y = s;
        }
        if config.needs_crop() {
            scale_x *= CROP_MARGIN;
            scale_y *= CROP_MARGIN;
        }
        region = Size::new(
            scaled(roi.width, scale_x).max(1),
            scaled(roi.height, scale_y).max(1),
        );
        resized = true;
    }

    // Crop
    let mut crop = None;
    if config.needs_crop() && (region.width != inner.width || region.height != inner.height) {
        let border_x = region.width.saturating_sub(inner.width);
        let border_y = region.height.saturating_sub(inner.height);
        if config.crop == CropMode::CenterResize {
            let side = roi.width.min(roi.height);
            let start_x = (roi.width - side) / 2;
            let start_y = (roi.height - side) / 2;
            src_rect = Rect::new(roi.x + start_x, roi.y + start_y, side, side);
            region = inner;
            scale_x = inner.width as f64 / side as f64;
            scale_y = inner.height as f64 / side as f64;
            resized = true;
            crop = Some((scaled(start_x, scale_x), scaled(start_y, scale_y)));
        } else {
            let (bx, by) = match config.crop {
                CropMode::Center => (border_x / 2, border_y / 2),
                CropMode::TopLeft | CropMode::None | CropMode::CenterResize => (0, 0),
                CropMode::TopRight => (border_x, 0),
                CropMode::BottomLeft => (0, border_y),
                CropMode::BottomRight => (border_x, border_y),
            };
            region = Size::new(region.width - border_x, region.height - border_y);
            // Rounding may push the trimmed rectangle past the ROI edge.
            let off_x = unscaled(bx, scale_x).min(roi.width - 1);
            let off_y = unscaled(by, scale_y).min(roi.height - 1);
            src_rect = Rect::new(
                roi.x + off_x,
                roi.y + off_y,
                unscaled(region.width, scale_x).min(roi.width - off_x).max(1),
                unscaled(region.height, scale_y).min(roi.height - off_y).max(1),
            );
            let crop_x = if off_x == unscaled(bx, scale_x) { bx } else { floored(off_x, scale_x) };
            let crop_y = if off_y == unscaled(by, scale_y) { by } else { floored(off_y, scale_y) };
            crop = Some((crop_x, crop_y));
        }
    }

    // A region larger than the inner area (no resize requested) is clipped.
    if region.width > inner.width {
        src_rect.width = unscaled(inner.width, scale_x).min(roi.right() - src_rect.x).max(1);
        region.width = inner.width;
    }
    if region.height > inner.height {
        src_rect.height = unscaled(inner.height, scale_y).min(roi.bottom() - src_rect.y).max(1);
        region.height = inner.height;
    }

    // Center
    let dst_rect = Rect::new(
        (dst.width - region.width) / 2,
        (dst.height - region.height) / 2,
        region.width,
        region.height,
    );

    if resized {
        record.resize_done(scale_x, scale_y);
        if config.resize.is_aspect_locked() {
            record.was_aspect_ratio_resize = true;
        }
    }
    if let Some((x, y)) = crop {
        record.crop_done(x, y);
    }
    if dst_rect.x > 0 || dst_rect.y > 0 || pad_x > 0 || pad_y > 0 {
        record.padding_done(dst_rect.x, dst_rect.y);
    }
    record.roi_x += roi.x;
    record.roi_y += roi.y;

    Ok(GeometryPlan {
        src_rect,
        dst_rect,
        fill: config.fill_color(),
        transform: record,
    })
}
