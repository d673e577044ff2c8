use crate::error::{MuxError, Result};

/// Configuration for a demuxer.
///
/// `Config` holds the buffer sizing used for every registered channel and
/// for the receive loop, plus whether shutting the demuxer down should also
/// close the underlying connection.
///
/// # Examples
///
/// ## Using default configuration
///
/// ```rust
/// use kubemux::Config;
///
/// let config = Config::default();
/// assert_eq!(config.initial_buffer_size, 4096);
/// assert!(!config.owns_connection);
/// ```
///
/// ## Creating custom configuration
///
/// ```rust
/// use kubemux::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .initial_buffer_size(16 * 1024)
///     .max_buffer_size(1024 * 1024)
///     .owns_connection(true)
///     .build()
///     .expect("Valid configuration");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub initial_buffer_size: usize,
    pub max_buffer_size: usize,
    pub receive_buffer_size: usize,
    pub owns_connection: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_buffer_size: 4096,
            max_buffer_size: 40 * 1024 * 1024, // 40MB
            receive_buffer_size: 4096,
            owns_connection: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.initial_buffer_size == 0 {
            return Err(MuxError::Config(
                "Initial buffer size cannot be 0".to_string(),
            ));
        }

        if self.max_buffer_size < self.initial_buffer_size {
            return Err(MuxError::Config(
                "Max buffer size must be at least as large as initial buffer size".to_string(),
            ));
        }

        // A scratch buffer this small could not even hold a channel id plus
        // one payload byte.
        if self.receive_buffer_size < 2 {
            return Err(MuxError::Config(
                "Receive buffer size must be at least 2 bytes".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for creating custom `Config` instances.
///
/// Starts from `Config::default()`; `build` validates the result.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn initial_buffer_size(mut self, size: usize) -> Self {
        self.config.initial_buffer_size = size;
        self
    }

    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.config.max_buffer_size = size;
        self
    }

    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.config.receive_buffer_size = size;
        self
    }

    pub fn owns_connection(mut self, owns: bool) -> Self {
        self.config.owns_connection = owns;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = Config {
            initial_buffer_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            initial_buffer_size: 2048,
            max_buffer_size: 1024,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        // Equal sizes are fine: the buffer simply never grows
        let config = Config {
            initial_buffer_size: 1024,
            max_buffer_size: 1024,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = Config {
            receive_buffer_size: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .initial_buffer_size(64)
            .max_buffer_size(8 * 1024)
            .receive_buffer_size(512)
            .owns_connection(true)
            .build()
            .unwrap();

        assert_eq!(config.initial_buffer_size, 64);
        assert_eq!(config.max_buffer_size, 8 * 1024);
        assert_eq!(config.receive_buffer_size, 512);
        assert!(config.owns_connection);
    }

    #[test]
    fn test_config_builder_validation_failure() {
        let result = ConfigBuilder::new().initial_buffer_size(0).build();

        assert!(result.is_err());
    }
}
