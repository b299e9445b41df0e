use thiserror::Error;

/// Errors raised by report sessions and the remote collaborators behind them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReportError {
    /// The operation's preconditions are not met (e.g. analyze with no file).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed user input (empty question, unsupported file type).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A question was asked before any report was successfully analyzed.
    #[error("No analyzed report is available")]
    NoActiveReport,

    /// A conflicting operation is already in flight.
    #[error("Busy: {0}")]
    Busy(String),

    /// Network, HTTP status or payload failure while talking to a remote service.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The remote service answered but declared the input unusable.
    #[error("Remote rejection: {0}")]
    RemoteRejection(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ReportError {
    /// The bare message without the category prefix, as shown to users.
    pub fn detail(&self) -> String {
        match self {
            Self::InvalidState(msg)
            | Self::InvalidInput(msg)
            | Self::Busy(msg)
            | Self::TransportFailure(msg)
            | Self::RemoteRejection(msg)
            | Self::Config(msg) => msg.clone(),
            Self::NoActiveReport => self.to_string(),
        }
    }
}

impl From<reqwest::Error> for ReportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::TransportFailure(format!("malformed response: {}", err))
        } else {
            Self::TransportFailure(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
