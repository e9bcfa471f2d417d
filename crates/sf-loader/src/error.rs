//! Error types for sf-loader.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    pub kind: ErrorKind,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub fn with_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn validation(object: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation {
            object: object.map(str::to_string),
            message: message.into(),
        })
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// True when the caller stopped the load (or its deadline elapsed).
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// True for transport failures that outlived their retry budget.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// A load request is malformed; nothing was sent.
    #[error("Validation error{}: {message}", object.as_ref().map(|o| format!(" on {o}")).unwrap_or_default())]
    Validation {
        object: Option<String>,
        message: String,
    },
    /// The objects cannot be ordered; nothing was sent.
    #[error("Cyclic dependency between objects: {}", objects.join(", "))]
    CyclicDependency { objects: Vec<String> },
    /// Network or server failure after the retry budget was spent.
    #[error("Transport error: {0}")]
    Transport(String),
    /// Terminal job client failure (auth, malformed data, org limits).
    #[error("Job error: {0}")]
    Job(String),
    #[error("Load cancelled")]
    Cancelled,
}

impl From<busbar_sf_jobs::Error> for Error {
    fn from(err: busbar_sf_jobs::Error) -> Self {
        let kind = match &err.kind {
            busbar_sf_jobs::ErrorKind::RetriesExhausted { .. } => ErrorKind::Transport(err.to_string()),
            _ if err.is_transport() => ErrorKind::Transport(err.to_string()),
            _ => ErrorKind::Job(err.to_string()),
        };
        Error::with_source(kind, err)
    }
}
