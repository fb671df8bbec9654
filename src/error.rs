//! # Errors
//!
//! Every fallible operation of the crate reports one of three kinds:
//! - [ErrorKind::PrimitiveFailure] - the thing underneath us failed (thread spawn, semaphore overflow)
//! - [ErrorKind::ContractViolation] - the caller broke a usage rule (wrong mutex, wrong thread)
//! - [ErrorKind::ShutDown] - the scheduler doesn't accept work anymore

use std::{error, fmt};

use strum_macros::{Display, EnumIter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    PrimitiveFailure,
    ContractViolation,
    ShutDown,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn primitive_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PrimitiveFailure, message)
    }

    pub fn contract_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContractViolation, message)
    }

    pub fn shut_down(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ShutDown, message)
    }

    /// attach the lower-level error that caused this one
    pub fn with_source(mut self, source: impl error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn error::Error + 'static))
    }
}
