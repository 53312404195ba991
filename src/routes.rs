use crate::handlers;
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:5173"),
            HeaderValue::from_static("http://localhost:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-request-id"),
        ]);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/import/fields", get(handlers::list_fields))
        .route("/api/v1/question-sets/:set_id/imports", post(handlers::start_import))
        .route(
            "/api/v1/question-sets/:set_id/questions",
            post(handlers::create_question).get(handlers::list_questions),
        )
        .route("/api/v1/imports/:session_id", axum::routing::delete(handlers::cancel_import))
        .route("/api/v1/imports/:session_id/preview", post(handlers::preview_import))
        .route("/api/v1/imports/:session_id/rows/:row/toggle", post(handlers::toggle_row))
        .route(
            "/api/v1/imports/:session_id/selection/toggle-valid",
            post(handlers::toggle_all_valid),
        )
        .route("/api/v1/imports/:session_id/commit", post(handlers::commit_import))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        build_router(crate::build_state().unwrap())
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let resp = router()
            .oneshot(
                Request::post("/api/v1/imports/not-a-uuid/commit")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn failed_shortcut_preview_closes_the_session() {
        use crate::mapping::ColumnMapper;
        use crate::state::{AppState, InMemoryQuestionStore};
        use crate::tabular::CsvDecoder;
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        use std::sync::Arc;

        // headers auto-map, so discovery goes straight to a preview that exceeds the row limit
        let state = AppState::new(
            Arc::new(InMemoryQuestionStore::new(None)),
            Arc::new(CsvDecoder::new(1)),
            Arc::new(ColumnMapper::default()),
        );
        let sheet = "QSNo,eng-question,eng-A,eng-B,correctOption\n1,q1,a,b,A\n2,q2,a,b,B\n";
        let body = serde_json::json!({ "fileName": "big.csv", "fileBase64": STANDARD.encode(sheet) });
        let resp = build_router(state.clone())
            .oneshot(
                Request::post("/api/v1/question-sets/set-1/imports")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(state.imports.is_empty());
    }

    #[tokio::test]
    async fn preflight_allows_the_operator_ui() {
        let resp = router()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/v1/import/fields")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );
    }
}
