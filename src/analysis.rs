//! Face analysis: find faces, then score each one's emotions

use crate::emotion::{EmotionClassifier, EmotionScores};
use crate::face::{FaceDetector, FaceRegion};
use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Face could not be detected. Please confirm that the picture is a face photo or consider to set enforce_detection param to False.")]
    NoFaceDetected,
    #[error("face detection failed: {0}")]
    Detection(anyhow::Error),
    #[error("emotion classification failed: {0}")]
    Classification(anyhow::Error),
    #[error("emotion model returned no scores")]
    EmptyScores,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzeOptions {
    /// Fail instead of analyzing the whole image when no face is found
    pub enforce_detection: bool,
}

/// The emotion analysis of one face
#[derive(Debug, Clone, Serialize)]
pub struct FaceAnalysis {
    pub region: FaceRegion,
    pub face_confidence: f32,
    pub emotion: EmotionScores,
    pub dominant_emotion: String,
}

/// A face detector paired with an emotion classifier
#[derive(Debug)]
pub struct Analyzer {
    detector: Box<dyn FaceDetector>,
    classifier: Box<dyn EmotionClassifier>,
}

impl Analyzer {
    pub fn new(detector: Box<dyn FaceDetector>, classifier: Box<dyn EmotionClassifier>) -> Self {
        Analyzer {
            detector,
            classifier,
        }
    }

    pub fn labels(&self) -> &[String] {
        self.classifier.labels()
    }

    pub fn has_face_detector(&self) -> bool {
        self.detector.is_enabled()
    }

    /// Analyze every face in `image`, in detector order
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn analyze(
        &self,
        image: &DynamicImage,
        options: AnalyzeOptions,
    ) -> Result<Vec<FaceAnalysis>, AnalysisError> {
        let mut regions = self
            .detector
            .detect(image)
            .map_err(AnalysisError::Detection)?;

        if regions.is_empty() {
            if options.enforce_detection {
                return Err(AnalysisError::NoFaceDetected);
            }
            debug!("no face found, analyzing the whole image");
            regions.push(FaceRegion::whole(image));
        }

        regions
            .into_iter()
            .map(|region| self.analyze_region(image, region))
            .collect()
    }

    fn analyze_region(
        &self,
        image: &DynamicImage,
        region: FaceRegion,
    ) -> Result<FaceAnalysis, AnalysisError> {
        let face = image
            .crop_imm(region.x, region.y, region.w, region.h)
            .to_luma8();
        let logits = self
            .classifier
            .classify(&face)
            .map_err(AnalysisError::Classification)?;

        let emotion = EmotionScores::from_logits(self.classifier.labels(), &logits);
        let dominant_emotion = emotion
            .dominant()
            .ok_or(AnalysisError::EmptyScores)?
            .to_string();

        Ok(FaceAnalysis {
            region,
            face_confidence: region.confidence,
            emotion,
            dominant_emotion,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test::*;
    use super::*;

    fn region(x: u32, w: u32, confidence: f32) -> FaceRegion {
        FaceRegion {
            x,
            y: 0,
            w,
            h: 10,
            confidence,
        }
    }

    #[test]
    fn test_whole_image_fallback() {
        let analyzer = analyzer(vec![]);
        let image = half_dark(20, 10);
        let faces = analyzer.analyze(&image, AnalyzeOptions::default()).unwrap();

        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].region, FaceRegion::whole(&image));
        assert_eq!(faces[0].face_confidence, 0.);
        // mean brightness 127 lands on label 3
        assert_eq!(faces[0].dominant_emotion, "happy");
    }

    #[test]
    fn test_enforce_detection() {
        let analyzer = analyzer(vec![]);
        let err = analyzer
            .analyze(
                &half_dark(20, 10),
                AnalyzeOptions {
                    enforce_detection: true,
                },
            )
            .unwrap_err();

        assert!(matches!(err, AnalysisError::NoFaceDetected));
        assert!(err.to_string().starts_with("Face could not be detected"));
    }

    #[test]
    fn test_one_result_per_face() {
        let analyzer = analyzer(vec![region(0, 10, 0.9), region(10, 10, 0.8)]);
        let faces = analyzer
            .analyze(&half_dark(20, 10), AnalyzeOptions::default())
            .unwrap();

        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].dominant_emotion, "angry");
        assert_eq!(faces[1].dominant_emotion, "neutral");
        assert_eq!(faces[1].face_confidence, 0.8);
        assert_eq!(faces[1].emotion.dominant(), Some("neutral"));
    }
}
