use crate::config::FaceSelection;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The body of a detection request. Kept as raw JSON so that the `image`
/// field can be checked the way a dynamically typed client expects.
pub struct DetectRequest(Map<String, Value>);

/// What the `image` field of a request holds
#[derive(Debug, PartialEq)]
pub enum ImageField<'a> {
    /// Absent, null, or an empty/false/zero value
    Missing,
    DataUrl(&'a str),
    NotAString,
}

impl DetectRequest {
    pub fn parse(body: &[u8]) -> Result<Self> {
        match serde_json::from_slice(body)? {
            Value::Object(map) => Ok(DetectRequest(map)),
            other => Err(anyhow!(
                "request body must be a JSON object, got {}",
                kind(&other)
            )),
        }
    }

    pub fn image(&self) -> ImageField<'_> {
        match self.0.get("image") {
            None => ImageField::Missing,
            Some(value) if is_empty(value) => ImageField::Missing,
            Some(Value::String(s)) => ImageField::DataUrl(s),
            Some(_) => ImageField::NotAString,
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Either a ready-made emotion distribution, or an image to analyze first
#[derive(Debug, Deserialize)]
pub struct ApproachabilityRequest {
    pub emotions: Option<HashMap<String, f64>>,
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Health<'a> {
    pub status: &'static str,
    pub labels: &'a [String],
    pub face_detector: bool,
    pub enforce_detection: bool,
    pub face_selection: FaceSelection,
}
