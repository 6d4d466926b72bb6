//! Response shapes shared by every route. Each one carries
//! `Access-Control-Allow-Origin: *`.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

pub fn allow_any() -> HeaderValue {
    HeaderValue::from_static("*")
}

/// Answer to a CORS preflight. Built before any body parsing happens.
pub fn preflight() -> Response {
    let mut response = (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "preflight" })),
    )
        .into_response();
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_any());
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allow_any());
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, allow_any());
    response
}

pub fn success<T: Serialize>(payload: T) -> Response {
    success_with_status(payload, StatusCode::OK)
}

pub fn success_with_status<T: Serialize>(payload: T, status: StatusCode) -> Response {
    with_origin((status, Json(payload)).into_response())
}

pub fn error(message: &str, status: StatusCode) -> Response {
    with_origin((status, Json(serde_json::json!({ "error": message }))).into_response())
}

fn with_origin(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_any());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(response: &Response) -> Option<&HeaderValue> {
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
    }

    #[test]
    fn preflight_sets_all_cors_headers() {
        let response = preflight();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        for name in [
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            header::ACCESS_CONTROL_ALLOW_METHODS,
        ] {
            assert_eq!(headers.get(&name), Some(&allow_any()), "{name}");
        }
    }

    #[test]
    fn success_defaults_to_ok() {
        let response = success(serde_json::json!({ "text": "hi" }));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(origin(&response), Some(&allow_any()));
    }

    #[test]
    fn success_status_can_be_overridden() {
        let response = success_with_status(serde_json::json!({}), StatusCode::ACCEPTED);
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn error_carries_origin_but_not_preflight_headers() {
        let response = error("Prompt is required", StatusCode::BAD_REQUEST);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(origin(&response), Some(&allow_any()));
        assert!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_METHODS)
                .is_none()
        );
    }
}
