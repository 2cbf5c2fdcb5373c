//! Shared plumbing for the hosted service clients.

use crate::error::{AvatalkError, Result, ServiceFailure, Stage};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Connect timeout for every service client. The per-stage budget is enforced
/// by the pipeline.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the HTTP client shared by a service implementation.
pub fn client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(format!("avatalk/{}", crate::version_string()))
        .build()
        .map_err(|e| AvatalkError::Other(format!("Failed to build HTTP client: {e}")))
}

/// Run `call` until it finishes or `cancel` fires.
///
/// On cancellation the call future is dropped, which aborts any request it
/// has in flight, and the stage resolves as [`AvatalkError::StageCancelled`].
pub async fn cancellable<F, T>(stage: Stage, cancel: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(%stage, "request aborted by cancellation");
            Err(AvatalkError::StageCancelled { stage })
        }
        result = call => result,
    }
}

/// Map a transport-level failure to a service error for `stage`.
pub fn request_failed(stage: Stage, e: reqwest::Error) -> AvatalkError {
    AvatalkError::service(stage, ServiceFailure::Request(e.to_string()))
}

/// Send `request` and reject non-success statuses with the body as context.
pub async fn send(stage: Stage, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|e| request_failed(stage, e))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(%stage, status = status.as_u16(), "service returned an error status");
    Err(AvatalkError::service(
        stage,
        ServiceFailure::Status {
            code: status.as_u16(),
            body: body.trim().to_string(),
        },
    ))
}

/// Join `base` and `path` with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url_normalizes_slashes() {
        assert_eq!(
            join_url("https://api.openai.com/v1/", "/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(join_url("http://x", "y"), "http://x/y");
    }

    #[tokio::test]
    async fn test_cancellable_passes_result_through() {
        let token = CancellationToken::new();
        let result = cancellable(Stage::Completion, &token, async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancellable_resolves_as_cancelled() {
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<()> =
            cancellable(Stage::Synthesis, &token, std::future::pending()).await;
        match result {
            Err(AvatalkError::StageCancelled { stage }) => assert_eq!(stage, Stage::Synthesis),
            other => panic!("Expected StageCancelled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation_over_ready_result() {
        let token = CancellationToken::new();
        token.cancel();

        let result = cancellable(Stage::Transcription, &token, async { Ok("late") }).await;
        assert!(result.unwrap_err().is_cancellation());
    }

    #[test]
    fn test_client_builds() {
        assert!(client().is_ok());
    }
}
