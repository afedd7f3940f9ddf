mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, LoggingSettings, PartialBrokerSettings, PartialLoggingSettings,
    PartialServerSettings, PartialSettings, ServerSettings, Settings,
};

/// Environment variables override file values, e.g.
/// `TIDINGS__BROKER__MAX_RETAINED_MESSAGES=50`.
pub const ENV_PREFIX: &str = "TIDINGS";

/// Loads the configuration from `config/default` (if present) and the environment.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Loads the configuration from the given file (extension optional, not required
/// to exist) and environment variables, then merges it with default values.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_with_defaults())
}
