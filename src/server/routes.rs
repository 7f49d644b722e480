//! Route handlers. Model inference is blocking libtorch work, so it runs on
//! actix's blocking pool rather than on the worker's event loop.

use super::protocol::{self, ApproachabilityRequest, DetectRequest, ImageField};
use super::WebError;
use crate::approachability::{assess, Expression};
use crate::config::ServerSettings;
use crate::detector::{Detection, EmotionDetector};
use actix_web::http::StatusCode;
use actix_web::{get, post, web, HttpResponse, Responder};
use anyhow::anyhow;
use std::sync::Arc;
use tracing::{info, warn};

type Result<T> = std::result::Result<T, WebError>;

/// Register every route under the configured prefix
pub fn configure(cfg: &mut web::ServiceConfig, settings: &ServerSettings) {
    if settings.route_prefix.is_empty() {
        register(cfg, settings);
    } else {
        let scope = web::scope(&settings.route_prefix).configure(|cfg| register(cfg, settings));
        cfg.service(scope);
    }
}

/// The routes, plus the JSON body limit and error shape they share
fn register(cfg: &mut web::ServiceConfig, settings: &ServerSettings) {
    let json = web::JsonConfig::default()
        .limit(settings.max_body_bytes)
        .error_handler(|err, _req| WebError::bad_request(err).into());

    cfg.app_data(json)
        .service(detect)
        .service(approachability)
        .service(health);
}

/// Status for a body that carries a processing error
fn processing_status(settings: &ServerSettings) -> StatusCode {
    StatusCode::from_u16(settings.processing_error_status).unwrap_or(StatusCode::OK)
}

/// Collect a request body, failing as a handler fault past `limit` bytes
async fn read_body(payload: web::Payload, limit: usize) -> Result<web::Bytes> {
    let body = payload
        .to_bytes_limited(limit)
        .await
        .map_err(|e| anyhow!("failed to read request body: {e}"))?
        .map_err(|_| anyhow!("request body exceeds {limit} bytes"))?;
    Ok(body)
}

async fn run_detection(detector: Arc<EmotionDetector>, image: String) -> Result<Detection> {
    Ok(web::block(move || detector.process_image(&image)).await?)
}

/// Detect the dominant emotion of a data-URL image
#[post("/detect/")]
pub async fn detect(
    payload: web::Payload,
    detector: web::Data<EmotionDetector>,
    settings: web::Data<ServerSettings>,
) -> Result<HttpResponse> {
    let body = read_body(payload, settings.max_body_bytes).await?;
    let req = DetectRequest::parse(&body)?;

    let detection = match req.image() {
        ImageField::Missing => {
            warn!("detection request without an image");
            return Err(WebError::bad_request("No image provided"));
        }
        ImageField::NotAString => Detection::error("image must be a string"),
        ImageField::DataUrl(image) => {
            run_detection(detector.into_inner(), image.to_string()).await?
        }
    };

    info!(?detection, "finished serving detection request");

    let status = match detection.is_error() {
        true => processing_status(&settings),
        false => StatusCode::OK,
    };
    Ok(HttpResponse::build(status).json(detection))
}

/// Approachability feedback for an emotion distribution, or for the emotions
/// detected in an image
#[post("/approachability/")]
pub async fn approachability(
    req: web::Json<ApproachabilityRequest>,
    detector: web::Data<EmotionDetector>,
    settings: web::Data<ServerSettings>,
) -> Result<HttpResponse> {
    let ApproachabilityRequest { emotions, image } = req.into_inner();

    let expression = match (emotions, image) {
        (Some(emotions), _) => Expression::from(&emotions),
        (None, Some(image)) if !image.is_empty() => {
            match run_detection(detector.into_inner(), image).await? {
                Detection::Emotions { emotions, .. } => Expression::from(&emotions),
                error => return Ok(HttpResponse::build(processing_status(&settings)).json(error)),
            }
        }
        _ => return Err(WebError::bad_request("No emotions or image provided")),
    };

    Ok(HttpResponse::Ok().json(assess(expression)))
}

#[get("/health/")]
pub async fn health(detector: web::Data<EmotionDetector>) -> impl Responder {
    let analyzer = detector.analyzer();
    let body = protocol::Health {
        status: "ok",
        labels: analyzer.labels(),
        face_detector: analyzer.has_face_detector(),
        enforce_detection: detector.options().enforce_detection,
        face_selection: detector.selection(),
    };
    HttpResponse::Ok().json(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test::{analyzer, data_url, half_dark};
    use crate::analysis::AnalyzeOptions;
    use crate::config::{FaceSelection, DEFAULT_MAX_BODY_BYTES};
    use actix_web::dev::ServiceResponse;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    fn settings(processing_error_status: u16) -> ServerSettings {
        ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
            route_prefix: String::new(),
            workers: None,
            processing_error_status,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Serve one request against an app with stand-in models
    async fn serve(req: test::TestRequest, settings: ServerSettings) -> ServiceResponse {
        let detector = EmotionDetector::new(
            analyzer(vec![]),
            AnalyzeOptions::default(),
            FaceSelection::First,
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(detector))
                .app_data(web::Data::new(settings.clone()))
                .configure(|cfg| configure(cfg, &settings)),
        )
        .await;

        test::call_service(&app, req.to_request()).await
    }

    async fn call(req: test::TestRequest, processing_error_status: u16) -> (StatusCode, Value) {
        let res = serve(req, settings(processing_error_status)).await;
        let status = res.status();
        (status, test::read_body_json(res).await)
    }

    async fn post(uri: &str, body: Value, processing_error_status: u16) -> (StatusCode, Value) {
        let req = test::TestRequest::post().uri(uri).set_json(body);
        call(req, processing_error_status).await
    }

    #[actix_web::test]
    async fn test_detect() {
        let image = data_url(&half_dark(20, 10));
        let (status, body) = post("/detect/", json!({ "image": image }), 200).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.get("error").is_none());
        let dominant = body["dominant_emotion"].as_str().unwrap();
        let emotions = body["emotions"].as_object().unwrap();
        assert_eq!(dominant, "happy");
        assert!(emotions.contains_key(dominant));
        assert!(emotions.values().all(Value::is_number));
    }

    #[actix_web::test]
    async fn test_detect_missing_image() {
        for body in [json!({}), json!({ "image": "" }), json!({ "image": null })] {
            let (status, body) = post("/detect/", body, 200).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body, json!({ "error": "No image provided" }));
        }
    }

    #[actix_web::test]
    async fn test_detect_processing_error_is_ok() {
        let (status, body) = post("/detect/", json!({ "image": "not,valid_base64!!" }), 200).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["error"].as_str().unwrap().contains("base64"));
        assert!(body.get("emotions").is_none());
    }

    #[actix_web::test]
    async fn test_detect_processing_error_status() {
        let (status, body) = post("/detect/", json!({ "image": "no separator" }), 422).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body,
            json!({ "error": "image is not a data URL: missing ',' separator" })
        );
    }

    #[actix_web::test]
    async fn test_detect_image_not_a_string() {
        let (status, body) = post("/detect/", json!({ "image": 42 }), 200).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "error": "image must be a string" }));
    }

    #[actix_web::test]
    async fn test_detect_malformed_body() {
        let req = test::TestRequest::post()
            .uri("/detect/")
            .insert_header(("content-type", "application/json"))
            .set_payload("{\"image\": ");
        let (status, body) = call(req, 200).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());

        let (status, _) = post("/detect/", json!(["image"]), 200).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn test_detect_body_too_large() {
        let settings = ServerSettings {
            max_body_bytes: 1000,
            ..settings(200)
        };
        let image = format!("data:image/png;base64,{}", "A".repeat(2000));
        let req = test::TestRequest::post()
            .uri("/detect/")
            .set_json(json!({ "image": image }));
        let res = serve(req, settings).await;

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body, json!({ "error": "request body exceeds 1000 bytes" }));
    }

    #[actix_web::test]
    async fn test_route_prefix() {
        let image = data_url(&half_dark(20, 10));
        let prefixed = || ServerSettings {
            route_prefix: "/api".into(),
            ..settings(200)
        };

        let req = test::TestRequest::post()
            .uri("/api/detect/")
            .set_json(json!({ "image": image }));
        let res = serve(req, prefixed()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["dominant_emotion"], "happy");

        let req = test::TestRequest::post()
            .uri("/detect/")
            .set_json(json!({ "image": image }));
        let res = serve(req, prefixed()).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = serve(test::TestRequest::get().uri("/api/health/"), prefixed()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_detect_is_stable() {
        let image = data_url(&half_dark(20, 10));
        let (_, first) = post("/detect/", json!({ "image": image }), 200).await;
        let (_, second) = post("/detect/", json!({ "image": image }), 200).await;
        assert_eq!(first, second);
    }

    #[actix_web::test]
    async fn test_approachability_from_emotions() {
        let emotions = json!({ "happy": 60.0, "neutral": 35.0, "angry": 1.0, "fear": 2.0, "sad": 2.0 });
        let (status, body) = post("/approachability/", json!({ "emotions": emotions }), 200).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["approachability_score"], 77);
        assert_eq!(body["feedback"].as_array().unwrap().len(), 3);
    }

    #[actix_web::test]
    async fn test_approachability_from_image() {
        let image = data_url(&half_dark(20, 10));
        let (status, body) = post("/approachability/", json!({ "image": image }), 200).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["approachability_score"].is_u64());
        assert!(body["tips"].is_array());
    }

    #[actix_web::test]
    async fn test_approachability_bad_requests() {
        let (status, body) = post("/approachability/", json!({}), 200).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "No emotions or image provided" }));

        let (status, body) = post("/approachability/", json!({ "emotions": "happy" }), 200).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = post("/approachability/", json!({ "image": "bad" }), 200).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["error"].is_string());
    }

    #[actix_web::test]
    async fn test_health() {
        let (status, body) = call(test::TestRequest::get().uri("/health/"), 200).await;

        assert_eq!(status, StatusCode::OK);

        assert_eq!(body["status"], "ok");
        assert_eq!(body["labels"].as_array().unwrap().len(), 7);
        assert_eq!(body["face_detector"], true);
        assert_eq!(body["enforce_detection"], false);
        assert_eq!(body["face_selection"], "first");
    }
}
