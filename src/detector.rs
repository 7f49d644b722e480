//! Turns a data-URL image into an emotion reading. Every failure is folded
//! into the returned `Detection` instead of being propagated.

use crate::analysis::{AnalysisError, AnalyzeOptions, Analyzer, FaceAnalysis};
use crate::config::{AnalysisSettings, FaceSelection};
use crate::emotion::{EmotionScores, TorchEmotionClassifier};
use crate::face::{FaceDetector, NoFaceDetector, TorchFaceDetector};
use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("image is not a data URL: missing ',' separator")]
    MissingSeparator,
    #[error("invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("could not decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("{0}")]
    Analysis(#[from] AnalysisError),
    #[error("analysis returned no faces")]
    NoResult,
}

/// The outcome of processing one image. Serializes either as
/// `{"emotions": {..}, "dominant_emotion": ".."}` or `{"error": ".."}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Detection {
    Emotions {
        emotions: EmotionScores,
        dominant_emotion: String,
    },
    Error {
        error: String,
    },
}

impl Detection {
    pub fn error(message: impl ToString) -> Self {
        Detection::Error {
            error: message.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Detection::Error { .. })
    }
}

impl From<Result<FaceAnalysis, ProcessError>> for Detection {
    fn from(result: Result<FaceAnalysis, ProcessError>) -> Self {
        match result {
            Ok(face) => Detection::Emotions {
                emotions: face.emotion,
                dominant_emotion: face.dominant_emotion,
            },
            Err(e) => Detection::error(e),
        }
    }
}

/// Built once at startup and shared by every request
#[derive(Debug)]
pub struct EmotionDetector {
    analyzer: Analyzer,
    options: AnalyzeOptions,
    selection: FaceSelection,
}

impl EmotionDetector {
    pub fn new(analyzer: Analyzer, options: AnalyzeOptions, selection: FaceSelection) -> Self {
        EmotionDetector {
            analyzer,
            options,
            selection,
        }
    }

    /// Load the configured TorchScript models
    pub fn from_settings(settings: &AnalysisSettings) -> Result<Self> {
        let detector: Box<dyn FaceDetector> = match &settings.face_model {
            Some(path) => Box::new(TorchFaceDetector::new(path, settings.min_face_confidence)?),
            None => Box::new(NoFaceDetector),
        };
        let classifier = TorchEmotionClassifier::new(
            &settings.emotion_model,
            settings.input_size,
            settings.labels.clone(),
        )?;

        Ok(Self::new(
            Analyzer::new(detector, Box::new(classifier)),
            AnalyzeOptions {
                enforce_detection: settings.enforce_detection,
            },
            settings.face_selection,
        ))
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn options(&self) -> AnalyzeOptions {
        self.options
    }

    pub fn selection(&self) -> FaceSelection {
        self.selection
    }

    /// Decode a `<prefix>,<base64>` image and analyze it
    pub fn process_image(&self, data_url: &str) -> Detection {
        self.try_process(data_url).into()
    }

    fn try_process(&self, data_url: &str) -> Result<FaceAnalysis, ProcessError> {
        let image = decode_data_url(data_url)?;
        let faces = self.analyzer.analyze(&image, self.options)?;
        select_face(faces, self.selection).ok_or(ProcessError::NoResult)
    }
}

/// Split off the data-URL prefix and decode the image behind it
pub fn decode_data_url(data_url: &str) -> Result<DynamicImage, ProcessError> {
    let (_, payload) = data_url
        .split_once(',')
        .ok_or(ProcessError::MissingSeparator)?;
    let bytes = general_purpose::STANDARD.decode(payload)?;
    Ok(image::load_from_memory(&bytes)?)
}

/// Pick the face that answers the request
pub fn select_face(faces: Vec<FaceAnalysis>, selection: FaceSelection) -> Option<FaceAnalysis> {
    let mut faces = faces.into_iter();
    match selection {
        FaceSelection::First => faces.next(),
        // ties keep the earliest face
        FaceSelection::Largest => faces.fold(None, |best, face| match best {
            Some(b) if b.region.area() >= face.region.area() => Some(b),
            _ => Some(face),
        }),
        FaceSelection::MostConfident => faces.fold(None, |best, face| match best {
            Some(b) if b.face_confidence >= face.face_confidence => Some(b),
            _ => Some(face),
        }),
    }
}
