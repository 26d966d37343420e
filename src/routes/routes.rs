//! Defines routes for file operations.
//!
//! ## Structure
//! - `POST   /files`              multipart upload
//! - `GET    /files`              list visible files (paged, filtered, sorted)
//! - `PATCH  /files/{id}`         update description, tags, visibility
//! - `DELETE /files/{id}`         delete bytes and record
//! - `GET    /files/{id}/content` download (anonymous allowed for public files)
//! - `GET    /healthz`, `GET /readyz`

use crate::{
    handlers::{
        file_handlers::{delete_file, download_file, list_files, update_file, upload_file},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, patch},
};

/// Room for multipart boundaries and the text fields around the file.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Build the router. Request bodies are capped just above
/// `max_upload_bytes`; the registry enforces the exact limit.
pub fn routes(max_upload_bytes: u64) -> Router<AppState> {
    let body_limit = usize::try_from(max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES))
        .unwrap_or(usize::MAX);

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/files", get(list_files).post(upload_file))
        .route("/files/{id}", patch(update_file).delete(delete_file))
        .route("/files/{id}/content", get(download_file))
        .layer(DefaultBodyLimit::max(body_limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{TokenVerifier, issue_token},
        config::{Secret, UploadLimits},
        db,
        services::{
            backend::{Backend, BackendSet, ObjectStoreBackend},
            file_registry::FileRegistry,
            metadata_store::SqliteMetadataStore,
        },
    };
    use axum::{
        body::Body,
        http::{Request, Response, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &str = "router-test-secret";
    const BOUNDARY: &str = "filevault-test-boundary";

    async fn app() -> Router {
        let pool = db::memory_pool().await.expect("pool");
        let limits = UploadLimits::default();
        let max = limits.max_upload_bytes;
        let state = AppState {
            registry: FileRegistry::new(
                BackendSet::new(Arc::new(Backend::ObjectStore(ObjectStoreBackend::in_memory()))),
                Arc::new(SqliteMetadataStore::new(pool)),
                limits,
            ),
            tokens: TokenVerifier::new(&Secret::new(SECRET)),
        };
        routes(max).with_state(state)
    }

    fn token_for(user: Uuid) -> String {
        format!("Bearer {}", issue_token(SECRET, &user.to_string(), 600))
    }

    fn multipart_body(
        file_name: &str,
        content_type: &str,
        data: &[u8],
        is_public: bool,
    ) -> Vec<u8> {
        let mut body = Vec::new();
        let text_field = |body: &mut Vec<u8>, name: &str, value: &str| {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        };
        text_field(&mut body, "description", "scanned invoice");
        text_field(&mut body, "tags", "invoices, 2024");
        text_field(&mut body, "isPublic", if is_public { "true" } else { "false" });
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(auth: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/files")
            .header(header::AUTHORIZATION, auth)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn upload(app: &Router, owner: Uuid, is_public: bool) -> Value {
        let body = multipart_body("invoice.pdf", "application/pdf", b"%PDF-1.7 data", is_public);
        let response = app
            .clone()
            .oneshot(upload_request(&token_for(owner), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let response = app()
            .await
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_checks_store_and_backend() {
        let response = app()
            .await
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["checks"]["metadata"]["ok"], true);
        assert_eq!(json["checks"]["storage"]["ok"], true);
    }

    #[tokio::test]
    async fn file_routes_require_token() {
        let response = app()
            .await
            .oneshot(Request::get("/files").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn upload_returns_record_without_locator() {
        let app = app().await;
        let owner = Uuid::new_v4();
        let json = upload(&app, owner, false).await;

        assert_eq!(json["originalName"], "invoice.pdf");
        assert_eq!(json["mimeType"], "application/pdf");
        assert_eq!(json["ownerId"], owner.to_string());
        assert_eq!(json["isPublic"], false);
        assert_eq!(json["tags"], serde_json::json!(["2024", "invoices"]));
        assert!(json.get("storageLocator").is_none());
    }

    #[tokio::test]
    async fn upload_rejects_disallowed_type() {
        let app = app().await;
        let body = multipart_body("a.zip", "application/zip", b"PK", false);
        let response = app
            .oneshot(upload_request(&token_for(Uuid::new_v4()), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn upload_rejects_oversized_file() {
        let app = app().await;
        let data = vec![0u8; 6 * 1024 * 1024];
        let body = multipart_body("big.pdf", "application/pdf", &data, false);
        let response = app
            .oneshot(upload_request(&token_for(Uuid::new_v4()), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn download_sets_attachment_headers_and_respects_visibility() {
        let app = app().await;
        let owner = Uuid::new_v4();
        let record = upload(&app, owner, false).await;
        let uri = format!("/files/{}/content", record["id"].as_str().unwrap());

        let anonymous = app
            .clone()
            .oneshot(Request::get(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(
                Request::get(&uri)
                    .header(header::AUTHORIZATION, token_for(owner))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        assert!(
            response.headers()[header::CONTENT_DISPOSITION]
                .to_str()
                .unwrap()
                .starts_with("attachment; filename=\"invoice.pdf\"")
        );
        let length = response.headers()[header::CONTENT_LENGTH].clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"%PDF-1.7 data");
        assert_eq!(length, bytes.len().to_string().as_str());
    }

    #[tokio::test]
    async fn public_download_works_anonymously() {
        let app = app().await;
        let record = upload(&app, Uuid::new_v4(), true).await;
        let uri = format!("/files/{}/content", record["id"].as_str().unwrap());

        let response = app
            .oneshot(Request::get(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn patch_then_delete() {
        let app = app().await;
        let owner = Uuid::new_v4();
        let record = upload(&app, owner, false).await;
        let uri = format!("/files/{}", record["id"].as_str().unwrap());

        let response = app
            .clone()
            .oneshot(
                Request::patch(&uri)
                    .header(header::AUTHORIZATION, token_for(owner))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"isPublic":true,"tags":"paid","ownerId":"00000000-0000-0000-0000-000000000000"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let updated = json_body(response).await;
        assert_eq!(updated["isPublic"], true);
        assert_eq!(updated["tags"], serde_json::json!(["paid"]));
        assert_eq!(updated["ownerId"], owner.to_string());

        let stranger = app
            .clone()
            .oneshot(
                Request::delete(&uri)
                    .header(header::AUTHORIZATION, token_for(Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(stranger.status(), StatusCode::FORBIDDEN);

        let deleted = app
            .clone()
            .oneshot(
                Request::delete(&uri)
                    .header(header::AUTHORIZATION, token_for(owner))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let gone = app
            .oneshot(
                Request::get(format!("{uri}/content"))
                    .header(header::AUTHORIZATION, token_for(owner))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_reports_page_totals() {
        let app = app().await;
        let owner = Uuid::new_v4();
        for _ in 0..3 {
            upload(&app, owner, false).await;
        }

        let response = app
            .clone()
            .oneshot(
                Request::get("/files?page=2&limit=2&sortBy=name&sortOrder=asc")
                    .header(header::AUTHORIZATION, token_for(owner))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["totalFiles"], 3);
        assert_eq!(json["totalPages"], 2);
        assert_eq!(json["currentPage"], 2);
        assert_eq!(json["files"].as_array().unwrap().len(), 1);

        let bad = app
            .oneshot(
                Request::get("/files?page=0")
                    .header(header::AUTHORIZATION, token_for(owner))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }

    async fn assert_json_bad_request(response: Response<Body>) {
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let json = json_body(response).await;
        assert_eq!(json["status"], 400);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn malformed_input_gets_json_bad_request() {
        let app = app().await;
        let owner = Uuid::new_v4();
        let record = upload(&app, owner, false).await;
        let uri = format!("/files/{}", record["id"].as_str().unwrap());

        let wrong_type = app
            .clone()
            .oneshot(
                Request::patch(&uri)
                    .header(header::AUTHORIZATION, token_for(owner))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"isPublic":"yes"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_json_bad_request(wrong_type).await;

        let broken_json = app
            .clone()
            .oneshot(
                Request::patch(&uri)
                    .header(header::AUTHORIZATION, token_for(owner))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_json_bad_request(broken_json).await;

        let bad_id = app
            .clone()
            .oneshot(
                Request::delete("/files/not-a-uuid")
                    .header(header::AUTHORIZATION, token_for(owner))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_json_bad_request(bad_id).await;

        let bad_page = app
            .clone()
            .oneshot(
                Request::get("/files?page=abc")
                    .header(header::AUTHORIZATION, token_for(owner))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_json_bad_request(bad_page).await;

        let unchanged = app
            .oneshot(
                Request::get(format!("{uri}/content"))
                    .header(header::AUTHORIZATION, token_for(owner))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unchanged.status(), StatusCode::OK);
    }
}
