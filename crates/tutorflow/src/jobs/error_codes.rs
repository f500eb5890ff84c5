// src/jobs/error_codes.rs
//
// Failure codes a handler (or the executor on its behalf) reports.

pub const TIMEOUT: &str = "TIMEOUT";
pub const PANIC: &str = "PANIC";
pub const BAD_PAYLOAD: &str = "BAD_PAYLOAD";
pub const UNKNOWN_TASK_KIND: &str = "UNKNOWN_TASK_KIND";
pub const LEASE_EXPIRED: &str = "LEASE_EXPIRED";
pub const WORKER_SHUTDOWN: &str = "WORKER_SHUTDOWN";
pub const DEPENDENCY_DOWN: &str = "DEPENDENCY_DOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout,
    Panic,
    BadPayload,
    UnknownTaskKind,
    LeaseExpired,
    WorkerShutdown,
    DependencyDown,
    Unknown,
}

impl ErrorCode {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            TIMEOUT => Self::Timeout,
            PANIC => Self::Panic,
            BAD_PAYLOAD => Self::BadPayload,
            UNKNOWN_TASK_KIND => Self::UnknownTaskKind,
            LEASE_EXPIRED => Self::LeaseExpired,
            WORKER_SHUTDOWN => Self::WorkerShutdown,
            DEPENDENCY_DOWN => Self::DependencyDown,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => TIMEOUT,
            Self::Panic => PANIC,
            Self::BadPayload => BAD_PAYLOAD,
            Self::UnknownTaskKind => UNKNOWN_TASK_KIND,
            Self::LeaseExpired => LEASE_EXPIRED,
            Self::WorkerShutdown => WORKER_SHUTDOWN,
            Self::DependencyDown => DEPENDENCY_DOWN,
            Self::Unknown => "UNKNOWN",
        }
    }
}
