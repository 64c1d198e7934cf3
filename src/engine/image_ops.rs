//! Built-in engine running the default catalog with the `image` crate.

use image::{DynamicImage, ImageError, ImageFormat, ImageReader, Rgb, RgbImage};
use std::path::Path;

use super::{EngineFailure, TransformEngine};

/// Sepia tone matrix (rows produce R, G, B)
const SEPIA: [[f32; 3]; 3] = [
    [0.393, 0.769, 0.189],
    [0.349, 0.686, 0.168],
    [0.272, 0.534, 0.131],
];

const EDGE_KERNEL: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0];

/// Bits kept per channel by `posterize`
const POSTERIZE_BITS: u32 = 4;

const SOLARIZE_THRESHOLD: u8 = 128;

const BLUR_SIGMA: f32 = 2.0;

/// In-process engine for the default transform catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageOpsEngine;

impl ImageOpsEngine {
    pub fn new() -> Self {
        Self
    }

    /// Names this engine understands
    pub fn supports(name: &str) -> bool {
        matches!(
            name.to_ascii_lowercase().as_str(),
            "grayscale"
                | "invert"
                | "sepia"
                | "posterize"
                | "solarize"
                | "autocontrast"
                | "blur"
                | "sharpen"
                | "find_edges"
                | "contour"
                | "emboss"
                | "mirror"
                | "rotate90"
        )
    }

    fn run(name: &str, img: DynamicImage) -> Result<DynamicImage, EngineFailure> {
        let out = match name.to_ascii_lowercase().as_str() {
            "grayscale" => img.grayscale(),
            "invert" => {
                let mut img = img;
                img.invert();
                img
            }
            "sepia" => map_rgb(&img, |[r, g, b]| {
                let [r, g, b] = [r as f32, g as f32, b as f32];
                SEPIA.map(|row| clamp_u8(row[0] * r + row[1] * g + row[2] * b))
            }),
            "posterize" => {
                let mask = !(u8::MAX >> POSTERIZE_BITS);
                map_rgb(&img, |px| px.map(|v| v & mask))
            }
            "solarize" => map_rgb(&img, |px| {
                px.map(|v| if v >= SOLARIZE_THRESHOLD { u8::MAX - v } else { v })
            }),
            "autocontrast" => autocontrast(&img),
            "blur" => img.blur(BLUR_SIGMA),
            "sharpen" => img.unsharpen(BLUR_SIGMA, 3),
            "find_edges" => DynamicImage::ImageRgb8(img.to_rgb8()).filter3x3(&EDGE_KERNEL),
            "contour" => {
                let mut edges = DynamicImage::ImageRgb8(img.to_rgb8()).filter3x3(&EDGE_KERNEL);
                edges.invert();
                edges
            }
            "emboss" => emboss(&img.to_rgb8()),
            "mirror" => img.fliph(),
            "rotate90" => img.rotate90(),
            other => {
                return Err(EngineFailure::Rejected(format!(
                    "unknown transform '{other}'"
                )))
            }
        };
        Ok(out)
    }
}

impl TransformEngine for ImageOpsEngine {
    #[tracing::instrument(level = "debug", skip(self))]
    fn apply(&self, transform: &str, input: &Path, output: &Path) -> Result<(), EngineFailure> {
        if !Self::supports(transform) {
            return Err(EngineFailure::Rejected(format!(
                "unknown transform '{transform}'"
            )));
        }

        let img = ImageReader::open(input)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| into_failure("cannot decode input", e))?;
        tracing::debug!(width = img.width(), height = img.height(), "Decoded input");

        let result = Self::run(transform, img)?;

        let format = ImageFormat::from_path(output)
            .map_err(|e| into_failure("unsupported output format", e))?;
        // JPEG has no alpha channel
        let result = if format == ImageFormat::Jpeg && result.color().has_alpha() {
            DynamicImage::ImageRgb8(result.to_rgb8())
        } else {
            result
        };

        result
            .save_with_format(output, format)
            .map_err(|e| into_failure("cannot write output", e))?;
        Ok(())
    }
}

fn into_failure(context: &str, err: ImageError) -> EngineFailure {
    match err {
        ImageError::IoError(io) => EngineFailure::Io(io),
        other => EngineFailure::Rejected(format!("{context}: {other}")),
    }
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn map_rgb(img: &DynamicImage, f: impl Fn([u8; 3]) -> [u8; 3]) -> DynamicImage {
    let mut rgb = img.to_rgb8();
    for px in rgb.pixels_mut() {
        px.0 = f(px.0);
    }
    DynamicImage::ImageRgb8(rgb)
}

/// Stretch each channel so its darkest value maps to 0 and brightest to 255.
fn autocontrast(img: &DynamicImage) -> DynamicImage {
    let rgb = img.to_rgb8();
    let mut lo = [u8::MAX; 3];
    let mut hi = [u8::MIN; 3];
    for px in rgb.pixels() {
        for c in 0..3 {
            lo[c] = lo[c].min(px.0[c]);
            hi[c] = hi[c].max(px.0[c]);
        }
    }

    map_rgb(img, |px| {
        let mut out = px;
        for c in 0..3 {
            if hi[c] > lo[c] {
                let span = (hi[c] - lo[c]) as f32;
                out[c] = clamp_u8((px[c] - lo[c]) as f32 * 255.0 / span);
            }
        }
        out
    })
}

/// Difference with the upper-left neighbour, centred on mid-gray.
fn emboss(rgb: &RgbImage) -> DynamicImage {
    let (w, h) = rgb.dimensions();
    let out = RgbImage::from_fn(w, h, |x, y| {
        let here = rgb.get_pixel(x, y).0;
        let prev = rgb.get_pixel(x.saturating_sub(1), y.saturating_sub(1)).0;
        Rgb([0usize, 1, 2].map(|c| clamp_u8(here[c] as f32 - prev[c] as f32 + 128.0)))
    });
    DynamicImage::ImageRgb8(out)
}
