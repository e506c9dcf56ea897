//! `config [key] [value]`.

use anyhow::{bail, Result};

use crate::config::Config;

/// Show the whole config, one value, or set a value.
pub fn run(key: Option<&str>, value: Option<&str>) -> Result<()> {
    match (key, value) {
        (None, _) => {
            println!("{}", serde_json::to_string_pretty(&Config::load()?)?);
        }
        (Some(key), None) => match Config::load()?.get_value(key) {
            Some(value) => println!("{value}"),
            None => bail!("Unknown config key: {key}"),
        },
        (Some(key), Some(value)) => {
            let mut config = Config::load_stored();
            config.set_value(key, value)?;
            config.save()?;
            log::info!("Config {} updated", key);
            println!("{key} = {}", config.get_value(key).unwrap_or_default());
        }
    }
    Ok(())
}
