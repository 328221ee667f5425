//! Preprocessing configuration surface.
//!
//! `PreprocessConfig` is what an inference adaptor hands a backend converter:
//! how to resize, crop, convert and pad an image before it reaches the model
//! input.  It deserializes from JSON and parses from a compact
//! `key=value;key=value` string:
//!
//! ```text
//! resize=keep-aspect;crop=center;padding=4,4,114,114,114;mean=0.485,0.456,0.406;std=0.229,0.224,0.225
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MemError, Result};
use crate::types::ImageFormat;

pub const IMAGENET_MEAN: [f64; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f64; 3] = [0.229, 0.224, 0.225];

// ─── Policies ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeMode {
    #[default]
    None,
    IgnoreAspect,
    KeepAspect,
    KeepAspectPad,
}

impl ResizeMode {
    pub const fn is_aspect_locked(self) -> bool {
        matches!(self, Self::KeepAspect | Self::KeepAspectPad)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::IgnoreAspect => "ignore-aspect",
            Self::KeepAspect => "keep-aspect",
            Self::KeepAspectPad => "keep-aspect-pad",
        }
    }
}

impl FromStr for ResizeMode {
    type Err = MemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "no" | "false" => Ok(Self::None),
            "ignore-aspect" | "no-aspect-ratio" | "true" => Ok(Self::IgnoreAspect),
            "keep-aspect" | "aspect-ratio" => Ok(Self::KeepAspect),
            "keep-aspect-pad" | "aspect-ratio-pad" => Ok(Self::KeepAspectPad),
            other => Err(MemError::invalid(format!("unknown resize mode '{other}'"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CropMode {
    #[default]
    None,
    Center,
    CenterResize,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl CropMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Center => "center",
            Self::CenterResize => "center-resize",
            Self::TopLeft => "top-left",
            Self::TopRight => "top-right",
            Self::BottomLeft => "bottom-left",
            Self::BottomRight => "bottom-right",
        }
    }
}

impl FromStr for CropMode {
    type Err = MemError;

    fn from_str(s: &str) -> Result<Self> {
        let norm = s.trim().to_ascii_lowercase().replace('_', "-");
        match norm.as_str() {
            "none" | "no" => Ok(Self::None),
            "center" | "central" => Ok(Self::Center),
            "center-resize" | "central-resize" => Ok(Self::CenterResize),
            "top-left" => Ok(Self::TopLeft),
            "top-right" => Ok(Self::TopRight),
            "bottom-left" => Ok(Self::BottomLeft),
            "bottom-right" => Ok(Self::BottomRight),
            other => Err(MemError::invalid(format!("unknown crop mode '{other}'"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorSpace {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "RGB")]
    Rgb,
    #[serde(rename = "BGR")]
    Bgr,
    #[serde(rename = "YUV")]
    Yuv,
    #[serde(rename = "grayscale")]
    Grayscale,
}

impl ColorSpace {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Rgb => "RGB",
            Self::Bgr => "BGR",
            Self::Yuv => "YUV",
            Self::Grayscale => "grayscale",
        }
    }

    /// Colour space a source image format already is in.
    pub const fn of_format(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Rgb | ImageFormat::Rgbx | ImageFormat::Rgba | ImageFormat::Rgbp => {
                Self::Rgb
            }
            ImageFormat::Bgr | ImageFormat::Bgrx | ImageFormat::Bgra | ImageFormat::Bgrp => {
                Self::Bgr
            }
            ImageFormat::Nv12 | ImageFormat::I420 => Self::Yuv,
            ImageFormat::Gray8 => Self::Grayscale,
        }
    }
}

impl FromStr for ColorSpace {
    type Err = MemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" | "NO" => Ok(Self::None),
            "RGB" => Ok(Self::Rgb),
            "BGR" => Ok(Self::Bgr),
            "YUV" => Ok(Self::Yuv),
            "GRAYSCALE" | "GRAY" => Ok(Self::Grayscale),
            _ => Err(MemError::invalid(format!("unknown color space '{s}'"))),
        }
    }
}

macro_rules! display_via_as_str {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    )*};
}

display_via_as_str!(ResizeMode, CropMode, ColorSpace);

// ─── Normalization & padding ────────────────────────────────────────────────

/// Linear map of `[0, 255]` onto `[min, max]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeNormalization {
    pub min: f64,
    pub max: f64,
}

impl RangeNormalization {
    /// `(scale, offset)` such that `out = in * scale + offset`.
    pub fn scale_offset(&self) -> (f64, f64) {
        ((self.max - self.min) / 255.0, self.min)
    }
}

/// Per-channel `(x - mean) / std`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistributionNormalization {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl DistributionNormalization {
    pub fn imagenet() -> Self {
        Self {
            mean: IMAGENET_MEAN.to_vec(),
            std: IMAGENET_STD.to_vec(),
        }
    }
}

/// Border around the model input, per side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Padding {
    pub stride_x: usize,
    pub stride_y: usize,
    #[serde(default)]
    pub fill: Vec<f64>,
}

// ─── Config ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct PreprocessConfig {
    pub resize: ResizeMode,
    pub crop: CropMode,
    pub color_space: ColorSpace,
    #[serde(alias = "range-normalization")]
    pub range: Option<RangeNormalization>,
    #[serde(alias = "distribution-normalization")]
    pub distribution: Option<DistributionNormalization>,
    pub padding: Option<Padding>,
}

impl PreprocessConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MemError::invalid(format!("preprocess config JSON: {e}")))?;
        config.validate()?;
        Ok(config.with_implied_defaults())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(range) = &self.range
            && range.min.partial_cmp(&range.max) != Some(Ordering::Less)
        {
            return Err(MemError::invalid(format!(
                "range normalization needs min < max, got [{}, {}]",
                range.min, range.max
            )));
        }
        if let Some(dist) = &self.distribution {
            if dist.mean.is_empty() || dist.mean.len() != dist.std.len() {
                return Err(MemError::invalid(format!(
                    "mean ({}) and std ({}) must be non-empty and equal length",
                    dist.mean.len(),
                    dist.std.len()
                )));
            }
            if dist.std.iter().any(|&s| s == 0.0) {
                return Err(MemError::invalid("std entries must be non-zero"));
            }
        }
        if let Some(padding) = &self.padding
            && padding.fill.iter().any(|v| !v.is_finite())
        {
            return Err(MemError::invalid("padding fill values must be finite"));
        }
        Ok(())
    }

    /// Resize or crop requested.
    pub fn transforms_to_blob_size(&self) -> bool {
        self.resize != ResizeMode::None || self.crop != CropMode::None
    }

    pub fn is_defined(&self) -> bool {
        self.transforms_to_blob_size()
            || self.color_space != ColorSpace::None
            || self.range.is_some()
            || self.distribution.is_some()
            || self.padding.is_some()
    }

    /// Any other preprocessing without an explicit resize/crop implies a
    /// plain resize to the model input size.
    pub fn with_implied_defaults(mut self) -> Self {
        if self.is_defined() && !self.transforms_to_blob_size() {
            self.resize = ResizeMode::IgnoreAspect;
        }
        self
    }

    pub fn needs_resize(&self) -> bool {
        self.resize != ResizeMode::None
    }

    /// Crop is meaningless when the resize ignores the aspect ratio.
    pub fn needs_crop(&self) -> bool {
        self.crop != CropMode::None && self.resize != ResizeMode::IgnoreAspect
    }

    pub fn needs_padding(&self) -> bool {
        self.padding.is_some()
    }

    pub fn needs_color_conversion(&self, src: ImageFormat) -> bool {
        self.color_space != ColorSpace::None && self.color_space != ColorSpace::of_format(src)
    }

    /// Padding fill per channel (clamped to `0..=255`) with opaque alpha;
    /// black when no fill is configured.
    pub fn fill_color(&self) -> [u8; 4] {
        let mut color = [0, 0, 0, 255];
        if let Some(padding) = &self.padding {
            for (dst, v) in color.iter_mut().take(3).zip(&padding.fill) {
                *dst = v.round().clamp(0.0, 255.0) as u8;
            }
        }
        color
    }
}

fn parse_f64_list(key: &str, value: &str) -> Result<Vec<f64>> {
    value
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|e| MemError::invalid(format!("{key}: '{v}' is not a number: {e}")))
        })
        .collect()
}

impl FromStr for PreprocessConfig {
    type Err = MemError;

    fn from_str(s: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut mean = None;
        let mut std = None;
        for item in s.split(';').map(str::trim).filter(|i| !i.is_empty()) {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| MemError::invalid(format!("expected key=value, got '{item}'")))?;
            let key = key.trim().to_ascii_lowercase().replace('_', "-");
            match key.as_str() {
                "resize" => config.resize = value.parse()?,
                "crop" => config.crop = value.parse()?,
                "color-space" => config.color_space = value.parse()?,
                "range" => match parse_f64_list("range", value)?.as_slice() {
                    [min, max] => {
                        config.range = Some(RangeNormalization {
                            min: *min,
                            max: *max,
                        })
                    }
                    other => {
                        return Err(MemError::invalid(format!(
                            "range expects min,max; got {} values",
                            other.len()
                        )));
                    }
                },
                "mean" => mean = Some(parse_f64_list("mean", value)?),
                "std" => std = Some(parse_f64_list("std", value)?),
                "padding" => {
                    let values = parse_f64_list("padding", value)?;
                    let [sx, sy, fill @ ..] = values.as_slice() else {
                        return Err(MemError::invalid("padding expects stride_x,stride_y[,fill...]"));
                    };
                    if *sx < 0.0 || *sy < 0.0 || sx.fract() != 0.0 || sy.fract() != 0.0 {
                        return Err(MemError::invalid(format!(
                            "padding strides must be non-negative integers, got {sx},{sy}"
                        )));
                    }
                    config.padding = Some(Padding {
                        stride_x: *sx as usize,
                        stride_y: *sy as usize,
                        fill: fill.to_vec(),
                    });
                }
                other => return Err(MemError::invalid(format!("unknown preprocess key '{other}'"))),
            }
        }
        config.distribution = match (mean, std) {
            (Some(mean), Some(std)) => Some(DistributionNormalization { mean, std }),
            (None, None) => None,
            _ => return Err(MemError::invalid("mean and std must be given together")),
        };
        config.validate()?;
        Ok(config.with_implied_defaults())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_string() {
        let config: PreprocessConfig =
            "resize=keep-aspect; crop=top_left; color-space=RGB; range=0,1; padding=4,2,114,114,114"
                .parse()
                .expect("valid config");
        assert_eq!(config.resize, ResizeMode::KeepAspect);
        assert_eq!(config.crop, CropMode::TopLeft);
        assert_eq!(config.color_space, ColorSpace::Rgb);
        assert_eq!(config.range, Some(RangeNormalization { min: 0.0, max: 1.0 }));
        let padding = config.padding.as_ref().expect("padding");
        assert_eq!((padding.stride_x, padding.stride_y), (4, 2));
        assert_eq!(config.fill_color(), [114, 114, 114, 255]);
    }

    #[test]
    fn legacy_policy_names_are_accepted() {
        assert_eq!("aspect-ratio".parse::<ResizeMode>().expect("alias"), ResizeMode::KeepAspect);
        assert_eq!("no-aspect-ratio".parse::<ResizeMode>().expect("alias"), ResizeMode::IgnoreAspect);
        assert_eq!("central-resize".parse::<CropMode>().expect("alias"), CropMode::CenterResize);
        assert_eq!("grayscale".parse::<ColorSpace>().expect("alias"), ColorSpace::Grayscale);
    }

    #[test]
    fn unknown_keys_and_values_are_rejected() {
        for bad in [
            "resize=stretch",
            "crop=middle",
            "gamma=2.2",
            "range=1",
            "mean=0.5",
            "padding=-1,0",
            "resize",
        ] {
            let err = bad.parse::<PreprocessConfig>().expect_err(bad);
            assert!(matches!(err, MemError::InvalidArgument(_)), "{bad}: {err:?}");
        }
    }

    #[test]
    fn validation_rules() {
        assert!("range=1,0".parse::<PreprocessConfig>().is_err());
        assert!("mean=0.5,0.5;std=0.1".parse::<PreprocessConfig>().is_err());
        assert!("mean=0.5;std=0".parse::<PreprocessConfig>().is_err());
    }

    #[test]
    fn padding_alone_implies_plain_resize() {
        let config: PreprocessConfig = "padding=2,2".parse().expect("valid");
        assert_eq!(config.resize, ResizeMode::IgnoreAspect);
        let empty: PreprocessConfig = "".parse().expect("empty");
        assert_eq!(empty.resize, ResizeMode::None);
        assert!(!empty.is_defined());
    }

    #[test]
    fn crop_disabled_by_ignore_aspect() {
        let config: PreprocessConfig = "resize=ignore-aspect;crop=center".parse().expect("valid");
        assert!(!config.needs_crop());
        let config: PreprocessConfig = "resize=keep-aspect;crop=center".parse().expect("valid");
        assert!(config.needs_crop());
    }

    #[test]
    fn json_config_uses_kebab_case() {
        let config = PreprocessConfig::from_json_str(
            r#"{"resize":"keep-aspect-pad","color-space":"BGR","distribution":{"mean":[0.485,0.456,0.406],"std":[0.229,0.224,0.225]}}"#,
        )
        .expect("json");
        assert_eq!(config.resize, ResizeMode::KeepAspectPad);
        assert_eq!(config.color_space, ColorSpace::Bgr);
        assert_eq!(config.distribution, Some(DistributionNormalization::imagenet()));
        assert!(PreprocessConfig::from_json_str(r#"{"sharpen":true}"#).is_err());
    }

    #[test]
    fn color_conversion_need_depends_on_source() {
        let config: PreprocessConfig = "color-space=BGR".parse().expect("valid");
        assert!(!config.needs_color_conversion(ImageFormat::Bgrx));
        assert!(config.needs_color_conversion(ImageFormat::Nv12));
    }

    #[test]
    fn range_scale_offset() {
        let range = RangeNormalization { min: -1.0, max: 1.0 };
        let (scale, offset) = range.scale_offset();
        assert!((255.0 * scale + offset - 1.0).abs() < 1e-12);
        assert_eq!(offset, -1.0);
    }
}
