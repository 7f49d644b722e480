//! Feedback on how approachable an emotion distribution reads. Scores are
//! percentages as produced by the emotion classifier; missing labels count
//! as zero.

use crate::emotion::EmotionScores;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub feedback: Vec<&'static str>,
    pub tips: Vec<&'static str>,
    pub approachability_score: u8,
}

/// The scores the rules look at
#[derive(Debug, Clone, Copy, Default)]
pub struct Expression {
    pub happy: f64,
    pub neutral: f64,
    pub angry: f64,
    pub fear: f64,
    pub sad: f64,
}

impl Expression {
    fn lookup(score: impl Fn(&str) -> Option<f64>) -> Self {
        let get = |label: &str| score(label).unwrap_or(0.);
        Expression {
            happy: get("happy"),
            neutral: get("neutral"),
            angry: get("angry"),
            fear: get("fear"),
            sad: get("sad"),
        }
    }
}

impl From<&HashMap<String, f64>> for Expression {
    fn from(map: &HashMap<String, f64>) -> Self {
        Expression::lookup(|label| map.get(label).copied())
    }
}

impl From<&EmotionScores> for Expression {
    fn from(scores: &EmotionScores) -> Self {
        Expression::lookup(|label| scores.get(label))
    }
}

fn within(value: f64, low: f64, high: f64) -> bool {
    value >= low && value <= high
}

pub fn assess(e: Expression) -> Report {
    let mut feedback = vec![];
    let mut tips = vec![];
    let mut note = |f: &'static str, t: &'static str| {
        feedback.push(f);
        tips.push(t);
    };

    if e.happy > 90. {
        note(
            "Your smile might appear forced",
            "Try to relax your smile slightly for a more natural look",
        );
    } else if within(e.happy, 40., 90.) && e.neutral >= 20. {
        note(
            "Good natural expression!",
            "This balanced smile-neutral mix appears approachable",
        );
    }

    if e.angry > 5. {
        note(
            "You might appear stern",
            "Try to relax your eyebrows and forehead",
        );
    }

    if e.fear > 5. {
        note(
            "You might appear anxious",
            "Take a deep breath and try to relax your facial muscles",
        );
    }

    if e.sad > 5. {
        note(
            "Your expression might appear downcast",
            "Try lifting your cheeks slightly and maintaining soft eye contact",
        );
    }

    if e.neutral > 90. {
        note(
            "Your expression might appear too reserved",
            "Try adding a slight smile to appear more approachable",
        );
    } else if within(e.neutral, 20., 90.) && e.happy >= 40. {
        note(
            "Good engagement level!",
            "This mix of expressions appears attentive and friendly",
        );
    }

    if within(e.happy, 20., 90.)
        && within(e.neutral, 20., 90.)
        && e.angry < 5.
        && e.fear < 5.
        && e.sad < 5.
    {
        note(
            "Excellent approachable expression!",
            "You're maintaining a great balance of friendly and professional",
        );
    }

    Report {
        feedback,
        tips,
        approachability_score: score(e),
    }
}

/// Positive and neutral expressions raise the score, negative ones lower it.
/// Always in `0..=100`.
pub fn score(e: Expression) -> u8 {
    let raw = e.happy
        + e.neutral * 0.8
        + (100. - e.angry)
        + (100. - e.fear * 0.8)
        + (100. - e.sad * 0.8);

    (raw / 5. + 0.5).floor().clamp(0., 100.) as u8
}
