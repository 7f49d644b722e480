//! Loading and running (trained) TorchScript emotion classifiers

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt::Debug;
use std::path::Path;
use tch::{no_grad, Kind, Tensor};
use tracing::info;

/// Per-label emotion scores, kept in the classifier's label order. Serializes
/// as a JSON object `{label: score}`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionScores(pub Vec<(String, f64)>);

impl EmotionScores {
    /// Scale logits to a percentage distribution over `labels`
    pub fn from_logits(labels: &[String], logits: &[f32]) -> Self {
        let scores = softmax(logits).into_iter().map(|p| p * 100.);
        Self(labels.iter().cloned().zip(scores).collect())
    }

    /// The highest-scoring label. Ties go to the earliest label
    pub fn dominant(&self) -> Option<&str> {
        self.0
            .iter()
            .fold(None, |best: Option<&(String, f64)>, entry| match best {
                Some(b) if b.1 >= entry.1 => Some(b),
                _ => Some(entry),
            })
            .map(|(label, _)| label.as_str())
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.0.iter().find(|(l, _)| l == label).map(|(_, s)| *s)
    }
}

impl Serialize for EmotionScores {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, score) in &self.0 {
            map.serialize_entry(label, score)?;
        }
        map.end()
    }
}

fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits
        .iter()
        .cloned()
        .fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = logits.iter().map(|&l| (l as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Something that can score a face crop against a fixed set of emotions
pub trait EmotionClassifier: Send + Sync + Debug {
    /// Labels, in the order `classify` scores them
    fn labels(&self) -> &[String];

    /// Raw logits for a grayscale face crop, one per label
    fn classify(&self, face: &GrayImage) -> Result<Vec<f32>>;
}

/// Load and run a TorchScript emotion model. The module takes a
/// `[1, 1, S, S]` grayscale tensor scaled to `[0, 1]` and returns one logit
/// per label.
#[derive(Debug)]
pub struct TorchEmotionClassifier {
    /// The loaded torch model
    model: tch::CModule,
    input_size: u32,
    labels: Vec<String>,
}

impl TorchEmotionClassifier {
    pub fn new(filename: &Path, input_size: u32, labels: Vec<String>) -> Result<Self> {
        let model = tch::CModule::load(filename)
            .map_err(|e| anyhow!("failed to load emotion model {}: {e}", filename.display()))?;
        info!(model = %filename.display(), ?labels, input_size, "loaded emotion classifier");
        Ok(TorchEmotionClassifier {
            model,
            input_size,
            labels,
        })
    }

    fn to_tensor(&self, face: &GrayImage) -> Tensor {
        let size = self.input_size;
        let resized = imageops::resize(face, size, size, FilterType::Triangle);
        let data: Vec<f32> = resized.into_raw().into_iter().map(|p| p as f32 / 255.).collect();
        Tensor::from_slice(&data).view([1, 1, size as i64, size as i64])
    }
}

impl EmotionClassifier for TorchEmotionClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn classify(&self, face: &GrayImage) -> Result<Vec<f32>> {
        let input = self.to_tensor(face);
        let output = no_grad(|| self.model.forward_ts(&[input]))?;
        let logits = Vec::<f32>::try_from(&output.to_kind(Kind::Float).flatten(0, -1))?;

        if logits.len() != self.labels.len() {
            return Err(anyhow!(
                "emotion model returned {} scores for {} labels",
                logits.len(),
                self.labels.len()
            ));
        }
        Ok(logits)
    }
}
