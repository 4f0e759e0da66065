//! crates/receipt_pipeline_core/src/error.rs
//!
//! The pipeline's error taxonomy. Port failures are wrapped with the step
//! that produced them so callers can decide between retrying and abandoning.

use crate::ports::PortError;

/// The caller-facing kind of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    NoData,
    Conflict,
    Unauthenticated,
    UnlinkedAccount,
    PartialFailure,
    Transient,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NoData => "no_data",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::UnlinkedAccount => "unlinked_account",
            ErrorKind::PartialFailure => "partial_failure",
            ErrorKind::Transient => "transient",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// The external call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Store,
    BlobUpload,
    ReadUrl,
    Extraction,
    AccessToken,
    CreateDocument,
    WriteRows,
    FormatHeader,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Store => "record_store",
            Step::BlobUpload => "blob_upload",
            Step::ReadUrl => "blob_read_url",
            Step::Extraction => "extraction",
            Step::AccessToken => "access_token",
            Step::CreateDocument => "create_document",
            Step::WriteRows => "write_rows",
            Step::FormatHeader => "format_header",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    NoData(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("No linked spreadsheet account; link your account and try again")]
    UnlinkedAccount,

    /// The document was created but populating it failed. The document is
    /// left in place as an orphaned artifact.
    #[error("Spreadsheet {spreadsheet_id} was created but {step} failed: {cause}")]
    PartialExport {
        spreadsheet_id: String,
        spreadsheet_url: String,
        step: Step,
        cause: String,
    },

    #[error("{step} failed: {message}")]
    External {
        step: Step,
        message: String,
        retryable: bool,
        timed_out: bool,
    },

    #[error("Cancelled before it started")]
    Cancelled,
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::NotFound { .. } => ErrorKind::NotFound,
            PipelineError::NoData(_) => ErrorKind::NoData,
            PipelineError::Conflict(_) => ErrorKind::Conflict,
            PipelineError::Unauthenticated => ErrorKind::Unauthenticated,
            PipelineError::UnlinkedAccount => ErrorKind::UnlinkedAccount,
            PipelineError::PartialExport { .. } => ErrorKind::PartialFailure,
            PipelineError::External { .. } => ErrorKind::Transient,
            PipelineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        PipelineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Wraps a port failure with the step that produced it. `NotFound`,
    /// `Conflict` and `Unauthorized` keep their own kinds.
    pub fn from_port(step: Step, err: PortError) -> Self {
        match err {
            PortError::NotFound(id) => PipelineError::NotFound {
                entity: "resource",
                id,
            },
            PortError::Conflict(msg) => PipelineError::Conflict(msg),
            PortError::Unauthorized => PipelineError::Unauthenticated,
            PortError::Timeout(msg) => PipelineError::External {
                step,
                message: msg,
                retryable: true,
                timed_out: true,
            },
            PortError::Rejected(msg) => PipelineError::External {
                step,
                message: msg,
                retryable: false,
                timed_out: false,
            },
            PortError::Unexpected(msg) => PipelineError::External {
                step,
                message: msg,
                retryable: true,
                timed_out: false,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::External { retryable: true, .. })
    }
}

/// Runs one external call under a deadline. An elapsed deadline becomes a
/// retryable `External` error for `step`.
pub(crate) async fn bounded<T, F>(
    step: Step,
    limit: std::time::Duration,
    call: F,
) -> PipelineResult<T>
where
    F: std::future::Future<Output = Result<T, PortError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(|e| PipelineError::from_port(step, e)),
        Err(_) => Err(PipelineError::from_port(
            step,
            PortError::Timeout(format!("no response within {}s", limit.as_secs())),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_retryable_and_rejections_are_not() {
        let timeout = PipelineError::from_port(Step::Extraction, PortError::Timeout("60s".into()));
        assert_eq!(timeout.kind(), ErrorKind::Transient);
        assert!(timeout.is_retryable());

        let rejected =
            PipelineError::from_port(Step::Extraction, PortError::Rejected("bad image".into()));
        assert_eq!(rejected.kind(), ErrorKind::Transient);
        assert!(!rejected.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_call_reports_timeout_as_retryable() {
        let slow = async {
            tokio::time::sleep(std::time::Duration::from_secs(120)).await;
            Ok::<_, PortError>(())
        };
        let err = bounded(Step::CreateDocument, std::time::Duration::from_secs(5), slow)
            .await
            .unwrap_err();
        match err {
            PipelineError::External {
                step, timed_out, ..
            } => {
                assert_eq!(step, Step::CreateDocument);
                assert!(timed_out);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn port_not_found_keeps_its_kind() {
        let err = PipelineError::from_port(Step::Store, PortError::NotFound("r1".into()));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
