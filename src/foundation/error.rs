pub type GpucapResult<T> = Result<T, GpucapError>;

#[derive(thiserror::Error, Debug)]
pub enum GpucapError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("gpu error: {0}")]
    Gpu(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GpucapError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    /// `true` for the synchronous-capture poll bound being exhausted.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            GpucapError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(GpucapError::gpu("x").to_string().contains("gpu error:"));
        assert!(GpucapError::timeout("x").to_string().contains("timeout:"));
        assert!(
            GpucapError::encode("x")
                .to_string()
                .contains("encode error:")
        );
        assert!(
            GpucapError::serde("x")
                .to_string()
                .contains("serialization error:")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = GpucapError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn only_timeout_reports_timeout() {
        assert!(GpucapError::timeout("x").is_timeout());
        assert!(!GpucapError::gpu("x").is_timeout());
    }
}
