//! # Encode Endpoint
//!
//! `POST /encode` turns a text message into a WAV file carrying it as sound.
//!
//! ## Request Body:
//! ```json
//! { "message": "Hello", "volume": 50, "sampleRate": 48000, "protocol": 1 }
//! ```
//! Only `message` is required. The tuning fields are forwarded to
//! `ggwave-to-file` as `-v`, `-s` and `-p` when they hold a truthy value
//! (not null, zero, false or an empty string). Any other value is passed
//! through as text, rendered the way a JavaScript client would stringify it;
//! the tool validates it.
//!
//! ## Response:
//! `200` with `Content-Type: audio/wav` and the WAV bytes.

use crate::error::{AppError, AppResult};
use crate::modem::EncodeOptions;
use crate::state::AppState;
use actix_web::http::header;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeRequest {
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub volume: Option<Value>,
    #[serde(default)]
    pub sample_rate: Option<Value>,
    #[serde(default)]
    pub protocol: Option<Value>,
}

impl EncodeRequest {
    pub fn into_options(self) -> AppResult<EncodeOptions> {
        let message = self.message.as_ref().map(message_text).unwrap_or_default();
        if message.is_empty() {
            return Err(AppError::Input("message is required".to_string()));
        }

        Ok(EncodeOptions {
            message,
            volume: self.volume.as_ref().and_then(flag_value),
            sample_rate: self.sample_rate.as_ref().and_then(flag_value),
            protocol: self.protocol.as_ref().and_then(flag_value),
        })
    }
}

/// Any JSON value is accepted as the message and rendered as text.
fn message_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => js_text(other),
    }
}

/// `value` rendered the way JavaScript's `String(value)` would: `48000.0` is
/// `48000`, arrays are comma-joined, objects are `[object Object]`.
fn js_text(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(n) if n.is_f64() => n.as_f64().map(|f| f.to_string()).unwrap_or_default(),
        Value::Number(n) => n.to_string(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => js_text(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Flag text for truthy values, `None` for the falsy ones.
fn flag_value(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::String(text) if text.is_empty() => None,
        other => Some(js_text(other)),
    }
}

pub async fn encode(
    state: web::Data<AppState>,
    body: web::Json<EncodeRequest>,
) -> AppResult<HttpResponse> {
    let options = body.into_inner().into_options()?;
    let wav = state.toolkit().encode(&options).await?;

    Ok(HttpResponse::Ok()
        .content_type("audio/wav")
        .insert_header((header::CONTENT_DISPOSITION, "inline; filename=\"message.wav\""))
        .body(wav))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers;
    use crate::test_support::FakeTools;
    use actix_web::test::{call_service, init_service, read_body, read_body_json, TestRequest};
    use actix_web::{http::StatusCode, App};
    use serde_json::json;

    #[test]
    fn test_truthy_flags_only() {
        let request: EncodeRequest = serde_json::from_value(json!({
            "message": "hi",
            "volume": 0,
            "sampleRate": 44100.5,
            "protocol": ""
        }))
        .unwrap();
        let options = request.into_options().unwrap();
        assert_eq!(options.volume, None);
        assert_eq!(options.sample_rate.as_deref(), Some("44100.5"));
        assert_eq!(options.protocol, None);

        let request: EncodeRequest =
            serde_json::from_value(json!({ "message": 42, "volume": "50", "protocol": 2 })).unwrap();
        let options = request.into_options().unwrap();
        assert_eq!(options.message, "42");
        assert_eq!(options.volume.as_deref(), Some("50"));
        assert_eq!(options.protocol.as_deref(), Some("2"));
    }

    #[test]
    fn test_values_render_like_javascript_strings() {
        let request: EncodeRequest = serde_json::from_value(json!({
            "message": { "text": "hi" },
            "sampleRate": 48000.0,
            "volume": [10, null, 20],
            "protocol": true
        }))
        .unwrap();
        let options = request.into_options().unwrap();
        assert_eq!(options.message, "[object Object]");
        assert_eq!(options.sample_rate.as_deref(), Some("48000"));
        assert_eq!(options.volume.as_deref(), Some("10,,20"));
        assert_eq!(options.protocol.as_deref(), Some("true"));

        let request: EncodeRequest =
            serde_json::from_value(json!({ "message": 1.5, "sampleRate": -0.0 })).unwrap();
        let options = request.into_options().unwrap();
        assert_eq!(options.message, "1.5");
        assert_eq!(options.sample_rate, None);
    }

    #[test]
    fn test_missing_or_empty_message_is_rejected() {
        for body in [json!({}), json!({ "message": "" }), json!({ "message": null })] {
            let request: EncodeRequest = serde_json::from_value(body).unwrap();
            assert!(matches!(request.into_options(), Err(AppError::Input(_))));
        }
    }

    #[actix_web::test]
    async fn test_encode_returns_wav_and_leaves_no_workspace() {
        let tools = FakeTools::new();
        let app = init_service(
            App::new()
                .app_data(web::Data::new(tools.state()))
                .configure(handlers::configure),
        )
        .await;

        let before = tools.workspace_count();
        let request = TestRequest::post()
            .uri("/encode")
            .set_json(json!({ "message": "Hello" }))
            .to_request();
        let response = call_service(&app, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "audio/wav");
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "inline; filename=\"message.wav\""
        );
        let body = read_body(response).await;
        assert_eq!(&body[..4], b"RIFF");
        assert_eq!(tools.workspace_count(), before);
    }

    #[actix_web::test]
    async fn test_encode_without_message_is_400() {
        let tools = FakeTools::new();
        let app = init_service(
            App::new()
                .app_data(web::Data::new(tools.state()))
                .configure(handlers::configure),
        )
        .await;

        let request = TestRequest::post()
            .uri("/encode")
            .set_json(json!({ "volume": 10 }))
            .to_request();
        let response = call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = read_body_json(response).await;
        assert_eq!(body, json!({ "error": "message is required" }));
    }

    #[actix_web::test]
    async fn test_encode_with_missing_tool_is_500() {
        let tools = FakeTools::new();
        let mut config = tools.config();
        config.tools.bin_dir = None;
        let app = init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(config)))
                .configure(handlers::configure),
        )
        .await;

        let request = TestRequest::post()
            .uri("/encode")
            .set_json(json!({ "message": "Hello" }))
            .to_request();
        let response = call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = read_body_json(response).await;
        assert_eq!(
            body,
            json!({ "error": "ggwave-to-file binary not found or not configured." })
        );
        assert_eq!(tools.workspace_count(), 0);
    }

    #[actix_web::test]
    async fn test_malformed_json_is_400() {
        let tools = FakeTools::new();
        let app = init_service(
            App::new()
                .app_data(web::Data::new(tools.state()))
                .configure(handlers::configure),
        )
        .await;

        let request = TestRequest::post()
            .uri("/encode")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload("{not json")
            .to_request();
        let response = call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = read_body_json(response).await;
        assert!(body["error"].as_str().unwrap().starts_with("invalid JSON body"));
    }
}
