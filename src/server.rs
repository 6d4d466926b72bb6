use std::{any::Any, sync::Arc};

use axum::{
    Router,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::{StatusCode, header},
    response::Response,
    routing::{get, post},
};
use serde::Serialize;
use tower_http::{
    catch_panic::CatchPanicLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{
    error::ServiceError, invoker::GenerationInvoker, params::GenerationRequest, response,
};

const BREAK_TEXT: &str = "Model broken intentionally - this is a test response";

#[derive(Clone)]
pub struct AppState {
    pub invoker: Arc<GenerationInvoker>,
}

#[derive(Serialize)]
struct BreakResponse<'a> {
    text: &'static str,
    parameters: BreakParameters<'a>,
}

#[derive(Serialize)]
struct BreakParameters<'a> {
    status: &'static str,
    model: &'a str,
}

pub fn build_router(invoker: Arc<GenerationInvoker>) -> Router {
    let state = AppState { invoker };

    Router::new()
        .route("/predict", post(predict).options(preflight))
        .route("/break", get(break_model).options(preflight))
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            response::allow_any(),
        ))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
}

async fn preflight() -> Response {
    response::preflight()
}

async fn predict(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ServiceError> {
    let body = body.map_err(|rejection| {
        warn!(status = %rejection.status(), "unreadable request body");
        ServiceError::invalid_parameter(rejection.body_text())
    })?;
    info!(bytes = body.len(), "received request");

    let request = GenerationRequest::from_body(&body)?;
    info!(
        prompt_chars = request.prompt().chars().count(),
        temperature = request.temperature(),
        top_k = request.top_k(),
        "generating"
    );

    let result = state.invoker.invoke(&request).await?;
    Ok(response::success(result))
}

async fn break_model(State(state): State<AppState>) -> Response {
    warn!("model break requested");
    let identity = state.invoker.identity();
    response::success(BreakResponse {
        text: BREAK_TEXT,
        parameters: BreakParameters {
            status: "broken",
            model: &identity.name,
        },
    })
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(%detail, "handler panicked");
    response::error(
        &ServiceError::Internal(detail).to_string(),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
}
