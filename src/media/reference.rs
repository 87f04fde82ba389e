//! Delivery URLs for stored assets.
//!
//! A URL is `{base_url}/tr:{step}:{step}/{asset_handle}` where every step is one
//! transformation in the order the caller supplied it. No steps means no `tr:`
//! segment. The mapping is pure string composition.

use std::fmt::Write as _;

use crate::error::{AppError, AppResult};
use super::kind::MediaKind;

const MAX_DIMENSION: u32 = 4096;
const MAX_OVERLAY_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Grayscale,
    Blur,
    Sharpen,
    Contrast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Auto,
    Jpg,
    Png,
    Webp,
    Avif,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    Width(u32),
    Height(u32),
    Crop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    Overlay(String),
    Filter(Filter),
    Quality(u8),
    Format(Format),
}

fn parse_dimension(key: &str, value: &str) -> AppResult<u32> {
    match value.trim().parse::<u32>() {
        Ok(v) if (1..=MAX_DIMENSION).contains(&v) => Ok(v),
        _ => Err(AppError::validation(format!(
            "{key} must be an integer between 1 and {MAX_DIMENSION}"
        ))),
    }
}

fn parse_crop(value: &str) -> AppResult<Transform> {
    let parts: Vec<u32> = value
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|_| AppError::validation("crop must be x,y,width,height"))?;
    match parts[..] {
        [x, y, width, height]
            if (1..=MAX_DIMENSION).contains(&width) && (1..=MAX_DIMENSION).contains(&height) =>
        {
            Ok(Transform::Crop {
                x,
                y,
                width,
                height,
            })
        }
        _ => Err(AppError::validation("crop must be x,y,width,height")),
    }
}

impl Transform {
    /// Parses one `key=value` option. Unknown keys are rejected, never skipped.
    pub fn parse(key: &str, value: &str) -> AppResult<Self> {
        let key = key.trim();
        match key {
            "width" | "w" => parse_dimension(key, value).map(Transform::Width),
            "height" | "h" => parse_dimension(key, value).map(Transform::Height),
            "crop" => parse_crop(value),
            "overlay" | "text" => {
                let chars = value.chars().count();
                if chars == 0 || chars > MAX_OVERLAY_CHARS {
                    return Err(AppError::validation(format!(
                        "overlay text must be 1 to {MAX_OVERLAY_CHARS} characters"
                    )));
                }
                Ok(Transform::Overlay(value.to_string()))
            }
            "filter" | "e" => {
                let filter = match value.trim().to_ascii_lowercase().as_str() {
                    "grayscale" | "greyscale" => Filter::Grayscale,
                    "blur" => Filter::Blur,
                    "sharpen" => Filter::Sharpen,
                    "contrast" => Filter::Contrast,
                    _ => return Err(AppError::validation(format!("unknown filter {value:?}"))),
                };
                Ok(Transform::Filter(filter))
            }
            "quality" | "q" => match value.trim().parse::<u8>() {
                Ok(q) if (1..=100).contains(&q) => Ok(Transform::Quality(q)),
                _ => Err(AppError::validation("quality must be between 1 and 100")),
            },
            "format" | "f" => {
                let format = match value.trim().to_ascii_lowercase().as_str() {
                    "auto" => Format::Auto,
                    "jpg" | "jpeg" => Format::Jpg,
                    "png" => Format::Png,
                    "webp" => Format::Webp,
                    "avif" => Format::Avif,
                    _ => return Err(AppError::validation(format!("unknown format {value:?}"))),
                };
                Ok(Transform::Format(format))
            }
            other => Err(AppError::UnsupportedTransform(other.to_string())),
        }
    }

    fn render(&self, out: &mut String) {
        // Writing into a String cannot fail.
        let _ = match self {
            Transform::Width(w) => write!(out, "w-{w}"),
            Transform::Height(h) => write!(out, "h-{h}"),
            Transform::Crop {
                x,
                y,
                width,
                height,
            } => write!(out, "cm-extract,x-{x},y-{y},w-{width},h-{height}"),
            Transform::Overlay(text) => {
                write!(out, "l-text,i-{},l-end", urlencoding::encode(text))
            }
            Transform::Filter(f) => out.write_str(match f {
                Filter::Grayscale => "e-grayscale",
                Filter::Blur => "bl-10",
                Filter::Sharpen => "e-sharpen",
                Filter::Contrast => "e-contrast",
            }),
            Transform::Quality(q) => write!(out, "q-{q}"),
            Transform::Format(f) => out.write_str(match f {
                Format::Auto => "f-auto",
                Format::Jpg => "f-jpg",
                Format::Png => "f-png",
                Format::Webp => "f-webp",
                Format::Avif => "f-avif",
            }),
        };
    }
}

/// Ordered list of transformations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformSet(Vec<Transform>);

impl TransformSet {
    pub fn parse<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> AppResult<Self> {
        pairs
            .iter()
            .map(|(k, v)| Transform::parse(k.as_ref(), v.as_ref()))
            .collect::<AppResult<Vec<_>>>()
            .map(TransformSet)
    }

    /// Applied when a request carries no options of its own.
    pub fn default_for(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => TransformSet(vec![Transform::Width(1080), Transform::Quality(80)]),
            MediaKind::Video => TransformSet::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MediaReferenceBuilder {
    base_url: String,
}

impl MediaReferenceBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    pub fn build_url<K: AsRef<str>, V: AsRef<str>>(
        &self,
        asset_handle: &str,
        options: &[(K, V)],
    ) -> AppResult<String> {
        let transforms = TransformSet::parse(options)?;
        Ok(self.render(asset_handle, &transforms))
    }

    /// Renders an already validated set; infallible.
    pub fn render(&self, asset_handle: &str, transforms: &TransformSet) -> String {
        let mut out = String::with_capacity(self.base_url.len() + asset_handle.len() + 32);
        out.push_str(&self.base_url);
        if !transforms.is_empty() {
            out.push_str("/tr:");
            for (i, t) in transforms.0.iter().enumerate() {
                if i > 0 {
                    out.push(':');
                }
                t.render(&mut out);
            }
        }
        for segment in asset_handle.split('/').filter(|s| !s.is_empty()) {
            out.push('/');
            out.push_str(&urlencoding::encode(segment));
        }
        out
    }
}
