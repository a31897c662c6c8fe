use std::time::Duration;

/// Broad category of a failure, independent of the operation that hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Authorization,
    Transport,
    Conflict,
    /// The wait helper gave up before the job settled.
    Wait,
    /// A service error this client could not classify.
    Unexpected,
}

/// Errors surfaced by the job client.
///
/// Every failure of a remote call is mapped to one of these variants and
/// returned to the caller. The client never retries on its own; callers can
/// consult [`EmrError::is_retryable`].
#[derive(Debug, thiserror::Error)]
pub enum EmrError {
    #[error("no running virtual cluster found for namespace `{0}`")]
    NamespaceNotFound(String),

    #[error("namespace `{namespace}` is served by several running virtual clusters: {}", .cluster_ids.join(", "))]
    AmbiguousNamespace {
        namespace: String,
        cluster_ids: Vec<String>,
    },

    #[error("{operation}: not found: {message}")]
    NotFound {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: invalid request: {message}")]
    Validation {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: not authorized: {message}")]
    Authorization {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: transport failure: {message}")]
    Transport {
        operation: &'static str,
        retryable: bool,
        message: String,
    },

    #[error("{operation}: conflicting request: {message}")]
    Conflict {
        operation: &'static str,
        message: String,
    },

    #[error("job {job_id} did not settle within {timeout:?}")]
    WaitTimedOut { job_id: String, timeout: Duration },

    #[error("wait for job {job_id} was cancelled")]
    WaitCancelled { job_id: String },

    #[error("{operation}: unexpected service error {}: {message}", .code.as_deref().unwrap_or("<no code>"))]
    Unexpected {
        operation: &'static str,
        code: Option<String>,
        message: String,
    },
}

impl EmrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EmrError::NamespaceNotFound(_) | EmrError::NotFound { .. } => ErrorKind::NotFound,
            EmrError::AmbiguousNamespace { .. } | EmrError::Validation { .. } => {
                ErrorKind::Validation
            }
            EmrError::Authorization { .. } => ErrorKind::Authorization,
            EmrError::Transport { .. } => ErrorKind::Transport,
            EmrError::Conflict { .. } => ErrorKind::Conflict,
            EmrError::WaitTimedOut { .. } | EmrError::WaitCancelled { .. } => ErrorKind::Wait,
            EmrError::Unexpected { .. } => ErrorKind::Unexpected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EmrError::Transport { retryable: true, .. })
    }

    pub(crate) fn validation(operation: &'static str, message: impl Into<String>) -> Self {
        EmrError::Validation {
            operation,
            message: message.into(),
        }
    }

    /// Map a service error code to the error taxonomy.
    pub fn from_service_code(
        operation: &'static str,
        code: Option<&str>,
        message: Option<&str>,
    ) -> Self {
        let message = message.unwrap_or_default().to_string();
        match code {
            Some("ResourceNotFoundException" | "NotFoundException") => {
                EmrError::NotFound { operation, message }
            }
            Some(
                "ValidationException"
                | "InvalidParameterException"
                | "InvalidParameterValueException"
                | "SerializationException",
            ) => EmrError::Validation { operation, message },
            Some(
                "AccessDeniedException"
                | "UnauthorizedException"
                | "UnrecognizedClientException"
                | "InvalidClientTokenId"
                | "InvalidSignatureException"
                | "SignatureDoesNotMatch"
                | "IncompleteSignature"
                | "MissingAuthenticationToken"
                | "ExpiredTokenException"
                | "ExpiredToken",
            ) => EmrError::Authorization { operation, message },
            Some("ConflictException") => EmrError::Conflict { operation, message },
            Some(
                "ThrottlingException"
                | "TooManyRequestsException"
                | "RequestLimitExceeded"
                | "InternalServerException"
                | "InternalFailure"
                | "ServiceUnavailable"
                | "ServiceUnavailableException"
                | "RequestTimeout",
            ) => EmrError::Transport {
                operation,
                retryable: true,
                message,
            },
            other => EmrError::Unexpected {
                operation,
                code: other.map(str::to_string),
                message,
            },
        }
    }
}
