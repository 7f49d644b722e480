//! Face detection. A detector finds face regions in a decoded image; the
//! emotion classifier then only looks at those crops.

use anyhow::{anyhow, Result};
use image::DynamicImage;
use serde::Serialize;
use std::fmt::Debug;
use std::path::Path;
use tch::{no_grad, Kind, Tensor};
use tracing::{debug, info};

/// Values per row of a detector's output: `x1, y1, x2, y2, score`
const DETECTION_WIDTH: usize = 5;

/// A face located in the source image, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub confidence: f32,
}

impl FaceRegion {
    /// The region covering the whole image, used when no face was found
    pub fn whole(image: &DynamicImage) -> Self {
        FaceRegion {
            x: 0,
            y: 0,
            w: image.width(),
            h: image.height(),
            confidence: 0.0,
        }
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }
}

/// Something that can find faces in an image
pub trait FaceDetector: Send + Sync + Debug {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceRegion>>;

    /// Whether this detector can find faces at all
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Never finds a face. Analysis falls back to the whole image (or fails, if
/// detection is enforced).
#[derive(Debug, Default)]
pub struct NoFaceDetector;

impl FaceDetector for NoFaceDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<FaceRegion>> {
        Ok(vec![])
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// A TorchScript face detector. The module takes a `[1, 3, H, W]` RGB float
/// tensor scaled to `[0, 1]` and returns `[N, 5]` rows of
/// `x1, y1, x2, y2, score` in input pixels.
#[derive(Debug)]
pub struct TorchFaceDetector {
    model: tch::CModule,
    min_confidence: f32,
}

impl TorchFaceDetector {
    pub fn new(filename: &Path, min_confidence: f32) -> Result<Self> {
        let model = tch::CModule::load(filename)
            .map_err(|e| anyhow!("failed to load face model {}: {e}", filename.display()))?;
        info!(model = %filename.display(), min_confidence, "loaded face detector");
        Ok(TorchFaceDetector {
            model,
            min_confidence,
        })
    }
}

impl FaceDetector for TorchFaceDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceRegion>> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();

        // HWC bytes to CHW floats
        let plane = (width * height) as usize;
        let mut data = vec![0f32; plane * 3];
        for (i, pixel) in rgb.pixels().enumerate() {
            for c in 0..3 {
                data[c * plane + i] = pixel[c] as f32 / 255.;
            }
        }
        let input = Tensor::from_slice(&data).view([1, 3, height as i64, width as i64]);

        let output = no_grad(|| self.model.forward_ts(&[input]))?;
        let rows = Vec::<f32>::try_from(&output.to_kind(Kind::Float).flatten(0, -1))?;

        let faces = parse_detections(&rows, width, height, self.min_confidence)?;
        debug!("face detector found {} faces", faces.len());
        Ok(faces)
    }
}

/// Turn flat detector output into regions, dropping low scores and boxes
/// that vanish once clamped to the image.
pub(crate) fn parse_detections(
    rows: &[f32],
    width: u32,
    height: u32,
    min_confidence: f32,
) -> Result<Vec<FaceRegion>> {
    if rows.len() % DETECTION_WIDTH != 0 {
        return Err(anyhow!(
            "face detector returned {} values, expected rows of {DETECTION_WIDTH}",
            rows.len()
        ));
    }

    let faces = rows
        .chunks_exact(DETECTION_WIDTH)
        .filter(|row| row[4] >= min_confidence)
        .filter_map(|row| {
            let x1 = row[0].clamp(0., width as f32) as u32;
            let y1 = row[1].clamp(0., height as f32) as u32;
            let x2 = row[2].clamp(0., width as f32) as u32;
            let y2 = row[3].clamp(0., height as f32) as u32;
            if x2 <= x1 || y2 <= y1 {
                return None;
            }
            Some(FaceRegion {
                x: x1,
                y: y1,
                w: x2 - x1,
                h: y2 - y1,
                confidence: row[4],
            })
        })
        .collect();

    Ok(faces)
}
