pub type FrameResult<T> = Result<T, LifeframeError>;

#[derive(thiserror::Error, Debug)]
pub enum LifeframeError {
    /// Pipeline compilation failed or the device lacks a required capability.
    #[error("setup error: {0}")]
    Setup(String),

    /// A caller broke a sizing or ordering precondition (arena overrun, uncommitted residency).
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The device rejected a submission or was lost.
    #[error("device execution error: {0}")]
    DeviceExecution(String),

    #[error("pacing timeout: frame {frame} not completed after {waited_ms} ms")]
    PacingTimeout { frame: u64, waited_ms: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LifeframeError {
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        Self::DeviceExecution(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// `true` for errors that leave the device in an unknown state.
    pub fn is_device_loss(&self) -> bool {
        matches!(self, Self::DeviceExecution(_) | Self::PacingTimeout { .. })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
