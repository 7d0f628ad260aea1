use std::fmt;

/// Closed set of error kinds returned by the record-store subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Invalid,
    Resource,
    Recovery,
    PartialBatch,
    Interrupted,
    /// A decode/encode buffer was too small; caller resizes to
    /// `required_size()` and retries the same call.
    Resize,
}

#[derive(Debug, Clone)]
pub struct StoreError {
    kind: ErrorKind,
    message: String,
    required_size: Option<usize>,
}

impl StoreError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            required_size: None,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, msg)
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, msg)
    }

    pub fn recovery(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Recovery, msg)
    }

    pub fn partial_batch(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PartialBatch, msg)
    }

    pub fn interrupted(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Interrupted, msg)
    }

    pub fn resize(required_size: usize) -> Self {
        Self {
            kind: ErrorKind::Resize,
            message: format!("buffer too small, need {} bytes", required_size),
            required_size: Some(required_size),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn required_size(&self) -> Option<usize> {
        self.required_size
    }

    /// Best-space-cap errors are soft: logged and swallowed.
    pub fn is_soft(&self) -> bool {
        self.kind == ErrorKind::Resource
    }

    /// The replica apply engine's "ignore on apply" predicate.
    pub fn ignorable_on_apply(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound | ErrorKind::Invalid)
    }

    pub fn show_backtrace(&self) {
        let bt = backtrace::Backtrace::new();
        log::error!("{}\n{:?}", self, bt);
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;
