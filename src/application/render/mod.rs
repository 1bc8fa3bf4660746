mod invoker;
mod types;

pub use invoker::{
    METRIC_RENDER_DURATION_MS, METRIC_RENDER_FAILURE, METRIC_RENDER_SUCCESS, RenderInvoker,
};
pub use types::{RenderError, RenderFailureKind, RenderRequest, classify_diagnostic};
