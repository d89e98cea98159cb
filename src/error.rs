//! Error types for the troubleshooting pipeline

use thiserror::Error;

/// Coarse classification used by the diagnostic error handler to decide
/// between re-prompting and aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad operator input; re-prompt in the same state.
    Input,
    /// A lookup against a snapshot failed.
    Resolution,
    /// Cluster API, kubeconfig or tunnel acquisition failure.
    Transport,
    /// Cannot continue: control-flow bug or closed terminal.
    Fatal,
}

/// Main error type for kube-trouble operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Operator typed something that is not a valid answer
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Selection index outside the presented list
    #[error("selection {index} is out of range, pick a number between 0 and {}", .len.saturating_sub(1))]
    OutOfRange { index: usize, len: usize },

    /// A named object or label could not be found
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// More than one object matched where exactly one was expected
    #[error("{kind} for {name} is ambiguous, candidates: {}", .candidates.join(", "))]
    Ambiguous {
        kind: &'static str,
        name: String,
        candidates: Vec<String>,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubeconfig could not be located or parsed
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Tunnel could not be acquired or failed before becoming ready
    #[error("tunnel error: {0}")]
    Tunnel(String),

    /// A step ran before the data it depends on was collected
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A cluster query was attempted before a connection was acquired
    #[error("no cluster connection has been established")]
    NotConnected,

    /// Terminal or socket I/O error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid input error with the given message
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a not found error for the given kind of object
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a kubeconfig error with the given message
    pub fn kubeconfig(msg: impl Into<String>) -> Self {
        Self::Kubeconfig(msg.into())
    }

    /// Create a tunnel error with the given message
    pub fn tunnel(msg: impl Into<String>) -> Self {
        Self::Tunnel(msg.into())
    }

    /// Create a precondition error with the given message
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidInput(_) | Self::OutOfRange { .. } => ErrorClass::Input,
            Self::NotFound { .. } | Self::Ambiguous { .. } => ErrorClass::Resolution,
            Self::Kube(_) | Self::Kubeconfig(_) | Self::Tunnel(_) => ErrorClass::Transport,
            Self::Precondition(_) | Self::NotConnected | Self::Io(_) | Self::Serialization(_) => {
                ErrorClass::Fatal
            }
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}

/// Result type alias using the crate error
pub type Result<T, E = Error> = std::result::Result<T, E>;
