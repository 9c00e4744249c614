use reqwest::StatusCode;

/// Coarse classification of everything that can go wrong talking to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The server answered 401; the session is over.
    Unauthorized,
    /// Timeouts, connection failures and 5xx answers.
    Transient,
    /// The addressed resource does not exist (yet).
    NotFound,
    /// Rejected locally before any request was made.
    Validation,
    /// The server refused the request with a business-level reason.
    Service,
    /// The response body did not have the expected shape.
    Decode,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not authenticated")]
    Unauthorized,
    #[error("Request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("server error {status}: {detail}")]
    Server { status: StatusCode, detail: String },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Service(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Timeout | Self::Network(_) | Self::Server { .. } => ErrorKind::Transient,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Service(_) => ErrorKind::Service,
            Self::Decode(_) => ErrorKind::Decode,
        }
    }

    /// Conditions a poll loop runs into routinely and should not report.
    pub fn is_expected_while_polling(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::NotFound)
    }

    /// Classify a non-success status together with the server's explanation.
    pub fn from_status(status: StatusCode, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            StatusCode::UNAUTHORIZED => Self::Unauthorized,
            StatusCode::NOT_FOUND => Self::NotFound(detail),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Self::Timeout,
            status if status.is_server_error() => Self::Server { status, detail },
            _ => Self::Service(detail),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status, err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
