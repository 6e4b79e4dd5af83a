use crate::{Channel, DeviceIndex, Mode};

/// Result alias that carries the custom [`AtmoError`] type.
pub type Result<T> = std::result::Result<T, AtmoError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum AtmoError {
    /// A channel index (or channel list) does not fit the addressed device.
    #[error("invalid channel index {index}: device has {available} channels")]
    InvalidChannel { index: Channel, available: usize },
    /// A device index does not name a configured device.
    #[error("invalid device index {index}: {available} devices configured")]
    DeviceNotFound { index: DeviceIndex, available: usize },
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Failure reported by the serial port backend.
    #[error("serial port: {0}")]
    Serial(#[from] serialport::Error),
    /// The capture source could not deliver a frame.
    #[error("capture failed: {0}")]
    Capture(String),
    /// A mode was requested that has not been configured.
    #[error("mode `{0}` cannot be activated because it has not been configured")]
    ModeUnavailable(Mode),
    /// Malformed or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// The configuration file is not valid YAML for the expected schema.
    #[error("configuration error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// A control request was malformed or semantically invalid.
    #[error("{0}")]
    Request(String),
    /// Free-form message, used for lock poisoning and similar conditions.
    #[error("{0}")]
    Message(String),
}

impl AtmoError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn request<T: Into<String>>(msg: T) -> Self {
        Self::Request(msg.into())
    }

    pub fn capture<T: Into<String>>(msg: T) -> Self {
        Self::Capture(msg.into())
    }

    /// Returns `true` for operational faults that may disappear after the
    /// underlying transport has been reset. Index errors, configuration and
    /// request errors are caller bugs and are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Serial(_) | Self::Capture(_) | Self::Message(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_errors_are_not_transient() {
        let channel = AtmoError::InvalidChannel {
            index: 4,
            available: 4,
        };
        let device = AtmoError::DeviceNotFound {
            index: 2,
            available: 1,
        };

        assert!(!channel.is_transient());
        assert!(!device.is_transient());
        assert!(!AtmoError::ModeUnavailable(Mode::Analyzer).is_transient());
    }

    #[test]
    fn io_errors_are_transient() {
        let err = AtmoError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "unplugged",
        ));
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "unplugged");
    }
}
