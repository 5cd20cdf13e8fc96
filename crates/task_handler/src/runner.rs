use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::handler::AnalysisHandler;
use crate::outcome::{AnalysisOutcome, HandlerError};
use crate::request::AnalysisRequest;

/// Outcome of a dispatch together with how long the handler ran.
#[derive(Debug)]
pub struct DispatchResult {
    pub duration: Duration,
    pub result: Result<AnalysisOutcome, HandlerError>,
}

/// Runs `handler` on its own task so that a panic surfaces as
/// [`HandlerError::Panic`], giving up after `timeout` when one is set.
pub async fn dispatch(
    handler: Arc<dyn AnalysisHandler>,
    request: AnalysisRequest,
    timeout: Option<Duration>,
) -> DispatchResult {
    let start = Instant::now();

    let task = tokio::spawn(async move { handler.analyze(request).await });
    let abort_handle = task.abort_handle();

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                abort_handle.abort();
                return DispatchResult {
                    duration: start.elapsed(),
                    result: Err(HandlerError::Timeout(limit)),
                };
            }
        },
        None => task.await,
    };

    let result = match joined {
        Ok(result) => result,
        Err(_) => Err(HandlerError::Panic),
    };

    DispatchResult {
        duration: start.elapsed(),
        result,
    }
}
