use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use log::info;
use serde::Deserialize;
use shared::{AnalysisResponse, ChatResponse};
use std::io::Write;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::inference::detector::RegionDetector;
use crate::inference::severity::SeverityClassifier;
use crate::upload::TempUpload;

/// Minimum confidence for a detected region to be reported.
const DETECTION_CONFIDENCE_THRESHOLD: f32 = 0.25;
/// Constant classification tag carried on every analysis response.
const CLASSIFICATION_TAG: &str = "multi";
/// Fixed chat reply; no model behind this endpoint.
const CHAT_REPLY: &str = "Hey there I'm Epiderma";

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/analyze").route(web::post().to(handle_analyze)))
        .service(web::resource("/chat").route(web::post().to(handle_chat)));
}

/// Straight-line pipeline per request: receive the upload, persist it
/// transiently, detect regions, grade severity, respond. The transient
/// file is removed on every exit path by the `TempUpload` guard.
async fn handle_analyze(
    detector: web::Data<RegionDetector>,
    classifier: web::Data<SeverityClassifier>,
    config: web::Data<AppConfig>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut saw_file = false;
    let mut original_name = None;
    let mut image_data = Vec::new();

    while let Ok(Some(mut field)) = payload.try_next().await {
        if field.name() != Some("file") {
            continue;
        }
        saw_file = true;
        original_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_owned);
        while let Some(chunk) = field.next().await {
            let data = chunk?;
            image_data.write_all(&data)?;
        }
        break;
    }

    if !saw_file {
        return Err(ApiError::MissingFile);
    }
    if image_data.is_empty() {
        return Err(ApiError::EmptyUpload);
    }

    let temp = TempUpload::persist(
        &config.upload_dir,
        original_name.as_deref().unwrap_or("upload"),
        &image_data,
    )?;

    let image = image::load_from_memory(&image_data)?.to_rgb8();
    let detections = detector.detect(&image, DETECTION_CONFIDENCE_THRESHOLD)?;
    let severity = classifier.classify(temp.path())?;
    drop(temp);

    info!(
        "Analyzed upload: severity {}, {} detections",
        severity.label,
        detections.len()
    );

    Ok(HttpResponse::Ok().json(AnalysisResponse {
        severity: severity.label.to_string(),
        detections,
        classification: CLASSIFICATION_TAG.to_string(),
    }))
}

#[derive(Deserialize)]
struct ChatRequest {
    text: String,
}

async fn handle_chat(form: web::Form<ChatRequest>) -> HttpResponse {
    log::debug!("Chat message received ({} chars)", form.text.len());
    HttpResponse::Ok().json(ChatResponse {
        reply: CHAT_REPLY.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn chat_returns_fixed_reply() {
        let app = test::init_service(App::new().configure(configure_routes)).await;
        let req = test::TestRequest::post()
            .uri("/chat")
            .set_form([("text", "what severity is this?")])
            .to_request();

        let body: ChatResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.reply, "Hey there I'm Epiderma");
    }

    #[actix_web::test]
    async fn chat_ignores_input_content() {
        let app = test::init_service(App::new().configure(configure_routes)).await;
        let req = test::TestRequest::post()
            .uri("/chat")
            .set_form([("text", "")])
            .to_request();

        let body: ChatResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.reply, CHAT_REPLY);
    }
}
