use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{sync::Semaphore, task, time};
use tracing::{error, info, warn};

use crate::{
    config::AppConfig,
    engine::{CancelFlag, GenerationEngine, GenerationSettings, ModelIdentity},
    error::ServiceError,
    params::GenerationRequest,
};

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub text: String,
    pub parameters: GenerationParameters,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationParameters {
    pub temperature: f64,
    pub top_k: i64,
    pub model: String,
    pub device: String,
}

/// Runs validated requests against the shared engine. Calls beyond the
/// permit count wait in line; waiting counts against the timeout.
pub struct GenerationInvoker {
    engine: Arc<dyn GenerationEngine>,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
    max_length: usize,
}

impl GenerationInvoker {
    pub fn new(
        engine: Arc<dyn GenerationEngine>,
        max_concurrent: usize,
        timeout: Option<Duration>,
        max_length: usize,
    ) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
            max_length,
        }
    }

    pub fn from_config(engine: Arc<dyn GenerationEngine>, config: &AppConfig) -> Self {
        Self::new(
            engine,
            config.max_concurrent_generations,
            config.generation_timeout,
            config.max_length,
        )
    }

    pub fn identity(&self) -> &ModelIdentity {
        self.engine.identity()
    }

    pub async fn invoke(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, ServiceError> {
        let settings =
            GenerationSettings::sampling(request.temperature(), request.top_k(), self.max_length);
        let cancel = CancelFlag::new();
        // Fires when the caller goes away, e.g. a dropped connection.
        let _cancel_guard = cancel.cancel_on_drop();

        let decoded = match self.timeout {
            Some(limit) => match time::timeout(limit, self.run(request, &settings, &cancel)).await
            {
                Ok(result) => result?,
                Err(_) => {
                    cancel.cancel();
                    error!(timeout_secs = limit.as_secs_f64(), "generation timed out");
                    return Err(ServiceError::Timeout(limit));
                }
            },
            None => self.run(request, &settings, &cancel).await?,
        };

        let text = strip_prompt(&decoded, request.prompt());
        info!(chars = text.chars().count(), "generation complete");

        let identity = self.engine.identity();
        Ok(GenerationResult {
            text,
            parameters: GenerationParameters {
                temperature: request.temperature(),
                top_k: request.top_k(),
                model: identity.name.clone(),
                device: identity.device.clone(),
            },
        })
    }

    async fn run(
        &self,
        request: &GenerationRequest,
        settings: &GenerationSettings,
        cancel: &CancelFlag,
    ) -> Result<String, ServiceError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| ServiceError::Internal(format!("engine unavailable: {err}")))?;

        let engine = self.engine.clone();
        let prompt = request.prompt().to_string();
        let settings = settings.clone();
        let cancel = cancel.clone();

        // The permit is released only once the blocking call returns, even if
        // the waiting request has already timed out.
        task::spawn_blocking(move || {
            let _permit = permit;
            engine.generate(&prompt, &settings, &cancel)
        })
        .await
        .map_err(|err| ServiceError::Internal(format!("inference task failed: {err}")))?
        .map_err(|err| {
            error!(%err, "generation error");
            ServiceError::Generation(err.to_string())
        })
    }
}

/// Removes the echoed prompt from decoded output. Leading whitespace from
/// the decoder is ignored. If the decoder did not reproduce the prompt
/// verbatim, the whole output is kept.
pub fn strip_prompt(decoded: &str, prompt: &str) -> String {
    match decoded.trim_start().strip_prefix(prompt) {
        Some(rest) => rest.trim().to_string(),
        None => {
            warn!("decoded output does not start with the prompt; returning it whole");
            decoded.trim().to_string()
        }
    }
}
