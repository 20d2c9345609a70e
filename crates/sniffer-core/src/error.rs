use thiserror::Error;

/// Errors produced while turning a [`crate::config::RawConfig`] into a
/// validated [`crate::config::CaptureConfig`]. Synchronous, surfaced before
/// `start` is ever invoked.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ports must not be empty")]
    EmptyPorts,
    #[error("port {0} is out of range (must be 1-65535)")]
    PortOutOfRange(u32),
    #[error("sample_rate {0} is out of range (must be in [0, 1])")]
    SampleRateOutOfRange(f64),
    #[error("max_body_size must be > 0")]
    ZeroMaxBodySize,
    #[error("max_concurrent_connections must be > 0")]
    ZeroMaxConnections,
    #[error("connection_idle_timeout_ms must be > 0")]
    ZeroIdleTimeout,
}

/// The stable fatal-error codes surfaced to the embedder, per the wire
/// contract in spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalErrorCode {
    InvalidInterface,
    CaptureOpenFailed,
    Unrecoverable,
}

impl FatalErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInterface => "INVALID_INTERFACE",
            Self::CaptureOpenFailed => "CAPTURE_OPEN_FAILED",
            Self::Unrecoverable => "UNRECOVERABLE",
        }
    }
}

impl std::fmt::Display for FatalErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors the Capture Source and Lifecycle Controller can report. Each
/// variant carries the code that's put on the wire in a `FatalError` event.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("{code}: {message}")]
    Fatal {
        code: FatalErrorCode,
        message: String,
    },
    #[error("start() called while a capture is already running")]
    AlreadyRunning,
    #[error("stop() called while no capture is running")]
    NotRunning,
}

impl CaptureError {
    pub fn invalid_interface(message: impl Into<String>) -> Self {
        Self::Fatal {
            code: FatalErrorCode::InvalidInterface,
            message: message.into(),
        }
    }

    pub fn open_failed(message: impl Into<String>) -> Self {
        Self::Fatal {
            code: FatalErrorCode::CaptureOpenFailed,
            message: message.into(),
        }
    }

    pub fn unrecoverable(message: impl Into<String>) -> Self {
        Self::Fatal {
            code: FatalErrorCode::Unrecoverable,
            message: message.into(),
        }
    }

    /// The `(code, message)` pair to put on the wire, if this is a fatal
    /// error rather than a lifecycle misuse error.
    pub fn as_fatal(&self) -> Option<(FatalErrorCode, &str)> {
        match self {
            Self::Fatal { code, message } => Some((*code, message.as_str())),
            _ => None,
        }
    }
}

/// Errors a [`crate::model::MessageSink`]-style consumer can report.
/// Never propagated into the core; the CLI logs these and moves on, per
/// spec.md §1's external-collaborator boundary on sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(String),
    #[error("sink HTTP error: {0}")]
    Http(String),
    #[error("sink callback error: {0}")]
    Callback(String),
}
