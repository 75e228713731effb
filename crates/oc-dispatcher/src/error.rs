use std::fmt;

/// Error kinds surfaced by the dispatcher worker. Mirrors the five kinds
/// used across this system (bad input never retried, transient retried by
/// the caller, protocol/persistent/fatal never retried).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherError {
    BadInput(String),
    Transient(String),
    Protocol(String),
    Persistent(String),
    Fatal(String),
}

impl fmt::Display for DispatcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatcherError::BadInput(m) => write!(f, "bad input: {m}"),
            DispatcherError::Transient(m) => write!(f, "transient: {m}"),
            DispatcherError::Protocol(m) => write!(f, "protocol: {m}"),
            DispatcherError::Persistent(m) => write!(f, "persistent: {m}"),
            DispatcherError::Fatal(m) => write!(f, "fatal: {m}"),
        }
    }
}

impl std::error::Error for DispatcherError {}
