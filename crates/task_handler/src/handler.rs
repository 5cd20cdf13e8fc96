use std::fmt::Debug;
use std::future::Future;

use async_trait::async_trait;

use crate::outcome::{AnalysisOutcome, HandlerError};
use crate::request::AnalysisRequest;

/// Performs the analysis for one period.
///
/// Implementations must tolerate being called more than once for the same
/// period: dispatch is at-least-once.
#[async_trait]
pub trait AnalysisHandler: Send + Sync {
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisOutcome, HandlerError>;

    fn identifier(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Adapts an async closure into an [`AnalysisHandler`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

pub fn handler_fn<F, Fut, E>(f: F) -> HandlerFn<F>
where
    F: Fn(AnalysisRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AnalysisOutcome, E>> + Send,
    E: Debug + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut, E> AnalysisHandler for HandlerFn<F>
where
    F: Fn(AnalysisRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AnalysisOutcome, E>> + Send,
    E: Debug + Send,
{
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisOutcome, HandlerError> {
        (self.f)(request)
            .await
            .map_err(|e| HandlerError::Unreachable(format!("{e:?}")))
    }

    fn identifier(&self) -> &str {
        std::any::type_name::<F>()
    }
}
