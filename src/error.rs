pub type MontraResult<T> = Result<T, MontraError>;

/// Error taxonomy for the export pipeline.
///
/// `Configuration` and `Encoding` are fatal and abort the render. `Asset` is
/// recoverable: the compositor paints a placeholder for the affected item and
/// continues. `Cleanup` is reported but never masks the primary result.
#[derive(thiserror::Error, Debug)]
pub enum MontraError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("asset error: {0}")]
    Asset(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("cleanup error: {0}")]
    Cleanup(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MontraError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn asset(msg: impl Into<String>) -> Self {
        Self::Asset(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    pub fn cleanup(msg: impl Into<String>) -> Self {
        Self::Cleanup(msg.into())
    }

    /// Stable kind tag used when reporting a structured failure to the caller.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Asset(_) => "asset",
            Self::Encoding(_) => "encoding",
            Self::Cleanup(_) => "cleanup",
            Self::Other(_) => "other",
        }
    }

    /// Asset errors are recovered inside the compositor; everything else
    /// aborts the render.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Asset(_))
    }
}
