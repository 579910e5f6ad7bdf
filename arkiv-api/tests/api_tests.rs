//! Unit and integration tests for arkiv-api

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::json;
use tower::util::ServiceExt;

use arkiv::ServiceConfig;
use arkiv_api::{app, AppState, ConversionRequest, ErrorResponse};

const COMPLIANT_HTML: &str = "<html lang=\"en\"><head><title>Report</title>\
    <meta name=\"author\" content=\"QA\"></head>\
    <body><h1>Report</h1><p>Body text.</p></body></html>";

async fn test_app() -> Router {
    let state = tokio::task::spawn_blocking(|| {
        AppState::with_config(ServiceConfig::default()).expect("pipeline init")
    })
    .await
    .expect("startup task");
    app(Arc::new(state))
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use axum::response::IntoResponse;
    use arkiv_api::AppError;

    #[test]
    fn test_conversion_request_deserialization() {
        let json = json!({
            "html": "<p>x</p>",
            "baseUrl": "https://example.com/",
            "attachments": [
                { "name": "a.txt", "content": "aGk=", "relationship": "Data" }
            ]
        });
        let request: ConversionRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.html, "<p>x</p>");
        assert_eq!(request.base_url.as_deref(), Some("https://example.com/"));
        assert_eq!(request.attachments.len(), 1);
        assert_eq!(request.attachments[0].name, "a.txt");
    }

    #[test]
    fn test_conversion_request_defaults() {
        let request: ConversionRequest = serde_json::from_value(json!({ "html": "<p>x</p>" })).unwrap();
        assert!(request.base_url.is_none());
        assert!(request.attachments.is_empty());
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            error: "boom".to_string(),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn test_client_errors_map_to_400() {
        let response =
            AppError::Core(arkiv::ArkivError::InvalidInput("blank".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_processing_errors_map_to_500() {
        let response =
            AppError::Core(arkiv::ArkivError::Render("engine".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check_endpoint() {
        let app = test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .method("GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "arkiv API");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn test_convert_returns_pdf_bytes() {
        let app = test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/convert")
                    .method("POST")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_string(&json!({ "html": COMPLIANT_HTML })).unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/pdf"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.starts_with(b"%PDF-"));
    }

    #[tokio::test]
    async fn test_convert_blank_html_is_400() {
        let app = test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/convert")
                    .method("POST")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_string(&json!({ "html": "   " })).unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(error.error.contains("blank"));
    }

    #[tokio::test]
    async fn test_convert_rejects_bad_attachment_before_any_output() {
        let app = test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/convert")
                    .method("POST")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_string(&json!({
                            "html": COMPLIANT_HTML,
                            "attachments": [
                                { "name": "x.bin", "content": "aGk=", "relationship": "Cousin" }
                            ]
                        }))
                        .unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(error.error.contains("relationship"));
    }

    #[tokio::test]
    async fn test_convert_with_report_returns_compliant_report() {
        let app = test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/convert/report")
                    .method("POST")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_string(&json!({
                            "html": COMPLIANT_HTML,
                            "attachments": [
                                { "name": "data.csv", "content": "YSxiCjEsMg==", "mimeType": "text/csv" }
                            ]
                        }))
                        .unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert!(json["pdf"].as_str().unwrap().len() > 100);
        assert_eq!(json["report"]["isCompliant"], true);
        assert_eq!(json["report"]["documentInfo"]["pages"], 1);
        assert_eq!(json["report"]["profiles"][0]["profile"], "archival-3a");
        assert_eq!(json["report"]["profiles"][1]["profile"], "accessibility-1");
    }

    #[tokio::test]
    async fn test_validate_endpoint_reports_on_upload() {
        let app = test_app().await;

        // Produce a PDF through the core pipeline, then upload it.
        let pdf = tokio::task::spawn_blocking(|| {
            let catalog = Arc::new(arkiv::FontCatalog::new());
            let renderer = arkiv::PdfRenderer::new(catalog);
            renderer
                .render(
                    COMPLIANT_HTML,
                    &arkiv::RenderOptions {
                        producer: "arkiv test".to_string(),
                        base_url: None,
                        resolver: None,
                    },
                )
                .unwrap()
        })
        .await
        .unwrap();

        let boundary = "ArkivTestBoundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; \
                 filename=\"upload.pdf\"\r\nContent-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&pdf);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/validate")
                    .method("POST")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["isCompliant"], true);
        assert_eq!(json["documentInfo"]["tagged"], true);
    }

    #[tokio::test]
    async fn test_validate_without_file_is_400() {
        let app = test_app().await;

        let boundary = "ArkivTestBoundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nx\r\n--{boundary}--\r\n"
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/validate")
                    .method("POST")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
