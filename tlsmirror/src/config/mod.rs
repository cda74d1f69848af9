//! Configuration types for the tlsmirror proxy.
//!
//! Configuration is loaded with Figment from a TOML file, with environment
//! variables (`<PREFIX>SECTION__FIELD`) layered on top.

pub(crate) mod defaults;
mod mitm;
mod proxy;
mod transparent;

pub use mitm::{MitmConfig, MutualTlsConfig};
pub use proxy::{HijackMode, LogConfig, ProxyConfig};
pub use transparent::TransparentConfig;

use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::de::DeserializeOwned;
use std::path::Path;

pub trait ConfigInit<T: DeserializeOwned> {
    /// Initializes the configuration object from the given Figment
    fn init(figment: Figment, _env_prefix: &str) -> Result<T> {
        Ok(figment.extract()?)
    }
}

pub trait FromPath<T: DeserializeOwned + ConfigInit<T>> {
    /// Creates a configuration object from the given path and ENV prefix
    fn from_path(path: &Path, env_prefix: &str) -> Result<T> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(env_prefix).split("__"));

        T::init(figment, env_prefix)
    }
}

impl ConfigInit<ProxyConfig> for ProxyConfig {
    fn init(figment: Figment, _env_prefix: &str) -> Result<ProxyConfig> {
        let config: ProxyConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}

impl FromPath<ProxyConfig> for ProxyConfig {}
