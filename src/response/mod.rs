mod analyser;
mod classifier;
mod model;

pub use analyser::{
    Entity, EntityKind, ErrorDetails, FormattedMessage, ResponseAnalyser, Severity,
    WORKSPACE_ADMIN_EXEMPTION,
};
pub use classifier::{ProcessingResult, ProcessingStatus, classify, process_payload};
pub use model::{CompletionStatus, InvalidResponseError, Response};
