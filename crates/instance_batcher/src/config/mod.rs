//! Configuration system

pub use serde::{Deserialize, Serialize};

/// Model-local binding slot of the lightmap sampler
pub const LIGHTMAP_TEXTURE_BINDING: u32 = 11;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Values that violate a batching invariant
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Sizing and binding parameters for instance groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Instance slots allocated when a group is created
    pub initial_capacity: u32,
    /// Hard cap on instances per group; growth doubles up to this
    pub max_capacity: u32,
    /// Binding slot compared when matching groups by texture
    pub lightmap_binding: u32,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 32,
            max_capacity: 1024,
            lightmap_binding: LIGHTMAP_TEXTURE_BINDING,
        }
    }
}

impl Config for BatchingConfig {}

impl BatchingConfig {
    /// Check that capacities can only ever be power-of-two multiples of the initial size
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_capacity == 0 || !self.initial_capacity.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "initial_capacity must be a non-zero power of two, got {}",
                self.initial_capacity
            )));
        }

        if self.max_capacity < self.initial_capacity || !self.max_capacity.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "max_capacity must be a power of two no smaller than initial_capacity ({}), got {}",
                self.initial_capacity, self.max_capacity
            )));
        }

        Ok(())
    }
}
