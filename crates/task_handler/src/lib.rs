mod handler;
mod outcome;
mod registry;
mod request;
mod runner;

pub use handler::{handler_fn, AnalysisHandler, HandlerFn};
pub use outcome::{AnalysisOutcome, HandlerError, SkipReason};
pub use registry::AnalysisHandlers;
pub use request::{AnalysisRequest, ContractViolation};
pub use runner::{dispatch, DispatchResult};
