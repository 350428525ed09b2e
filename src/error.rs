//! Error taxonomy for the path tracer.
//!
//! Scene and capability problems are detected before any GPU work is
//! committed; build and submission failures abort the render.

/// Result alias for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// Malformed or unsupported mesh, or an unusable output resolution.
    #[error("invalid scene: {0}")]
    InvalidScene(String),

    /// A required GPU feature or limit is missing.
    #[error("device capability missing: {0}")]
    DeviceCapability(String),

    #[error("acceleration structure build failed: {0}")]
    AccelerationBuild(String),

    #[error("pipeline build failed: {0}")]
    PipelineBuild(String),

    /// Command submission or the wait for its completion failed.
    #[error("submission failed: {0}")]
    Submission(String),

    #[error("readback failed: {0}")]
    Readback(String),

    #[error("image encoding failed: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    pub fn scene<T: ToString>(msg: T) -> Self {
        RenderError::InvalidScene(msg.to_string())
    }

    pub fn capability<T: ToString>(msg: T) -> Self {
        RenderError::DeviceCapability(msg.to_string())
    }

    pub fn accel<T: ToString>(msg: T) -> Self {
        RenderError::AccelerationBuild(msg.to_string())
    }

    pub fn pipeline<T: ToString>(msg: T) -> Self {
        RenderError::PipelineBuild(msg.to_string())
    }

    pub fn submission<T: ToString>(msg: T) -> Self {
        RenderError::Submission(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        RenderError::Readback(msg.to_string())
    }

    /// Short category tag, handy for log lines.
    pub fn category(&self) -> &'static str {
        match self {
            RenderError::InvalidScene(_) => "Scene",
            RenderError::DeviceCapability(_) => "Device",
            RenderError::AccelerationBuild(_) => "Accel",
            RenderError::PipelineBuild(_) => "Pipeline",
            RenderError::Submission(_) => "Submit",
            RenderError::Readback(_) => "Readback",
            RenderError::Encode(_) => "Encode",
            RenderError::Io(_) => "IO",
        }
    }
}

impl From<image::ImageError> for RenderError {
    fn from(err: image::ImageError) -> Self {
        RenderError::Encode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_pick_the_right_variant() {
        assert!(matches!(RenderError::scene("x"), RenderError::InvalidScene(_)));
        assert!(matches!(
            RenderError::capability("x"),
            RenderError::DeviceCapability(_)
        ));
        assert!(matches!(RenderError::accel("x"), RenderError::AccelerationBuild(_)));
        assert!(matches!(RenderError::pipeline("x"), RenderError::PipelineBuild(_)));
        assert!(matches!(RenderError::submission("x"), RenderError::Submission(_)));
    }

    #[test]
    fn display_includes_message() {
        let err = RenderError::scene("mesh has 2 shapes");
        assert_eq!(err.to_string(), "invalid scene: mesh has 2 shapes");
        assert_eq!(err.category(), "Scene");
    }
}
