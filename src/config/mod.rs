mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BackoffSettings, BrokerSettings, BufferSettings, CredentialSettings, LoggingSettings,
    OtaSettings, SessionSettings, Settings, SubscribeFailurePolicy,
};

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct with every section filled in
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Same as [`load_config`] with an explicit file stem (extension optional).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(Config::try_from(&Settings::default())?)
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("OTA")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let mut settings: Settings = config.try_deserialize()?;

    if settings.broker.client_id.is_empty() {
        settings.broker.client_id = format!("device-{}", uuid::Uuid::new_v4());
    }

    check_consistency(&settings)?;
    Ok(settings)
}

/// Reject combinations under which valid blocks could never be accepted.
pub fn check_consistency(settings: &Settings) -> Result<(), ConfigError> {
    let ota = &settings.ota;
    if ota.block_size > ota.max_block_size {
        return Err(ConfigError::Message(format!(
            "ota.block_size {} exceeds ota.max_block_size {}",
            ota.block_size, ota.max_block_size
        )));
    }
    let needed = ota.max_envelope_len();
    if settings.buffers.capacity < needed {
        return Err(ConfigError::Message(format!(
            "buffers.capacity {} cannot hold a {}-byte block envelope ({needed} bytes)",
            settings.buffers.capacity, ota.max_block_size
        )));
    }
    Ok(())
}
