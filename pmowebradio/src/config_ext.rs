//! Extension pour intégrer les réglages webradio dans pmoconfig
//!
//! Ce module fournit le trait `WebRadioConfigExt` qui ajoute à
//! `pmoconfig::Config` la lecture des réglages de la section `webradio`.
//!
//! # Exemple
//!
//! ```rust,ignore
//! use pmoconfig::get_config;
//! use pmowebradio::{Callbacks, Stream, WebRadioConfigExt};
//!
//! let settings = get_config().get_webradio_settings()?;
//! let stream = Stream::with_settings(url, Callbacks::new(), settings)?;
//! ```

use anyhow::{anyhow, Result};
use pmoconfig::Config;
use serde_yaml::{Number, Value};

use crate::settings::{StreamSettings, DEFAULT_MAX_REDIRECTS, DEFAULT_USER_AGENT};

const SECTION: &str = "webradio";

/// Trait d'extension pour gérer la configuration webradio dans pmoconfig
pub trait WebRadioConfigExt {
    /// Réglages complets du client
    ///
    /// Les clés absentes gardent leur valeur par défaut. Une section
    /// invalide est une erreur.
    fn get_webradio_settings(&self) -> Result<StreamSettings>;

    /// User-Agent envoyé au serveur (default: `pmowebradio/<version>`)
    fn get_webradio_user_agent(&self) -> Result<String>;

    fn set_webradio_user_agent(&self, user_agent: String) -> Result<()>;

    /// Nombre maximal de redirections HTTP suivies (default: 10)
    fn get_webradio_max_redirects(&self) -> Result<u32>;

    fn set_webradio_max_redirects(&self, max: u32) -> Result<()>;
}

impl WebRadioConfigExt for Config {
    fn get_webradio_settings(&self) -> Result<StreamSettings> {
        let settings: StreamSettings = match self.get_value(&[SECTION]) {
            Ok(Value::Null) | Err(_) => StreamSettings::default(),
            Ok(value) => serde_yaml::from_value(value)?,
        };
        settings
            .validate()
            .map_err(|msg| anyhow!("invalid webradio configuration: {}", msg))?;
        Ok(settings)
    }

    fn get_webradio_user_agent(&self) -> Result<String> {
        self.get_string_or(&[SECTION, "http", "user_agent"], DEFAULT_USER_AGENT)
    }

    fn set_webradio_user_agent(&self, user_agent: String) -> Result<()> {
        self.set_value(&[SECTION, "http", "user_agent"], Value::String(user_agent))
    }

    fn get_webradio_max_redirects(&self) -> Result<u32> {
        let max = self.get_usize_or(
            &[SECTION, "http", "max_redirects"],
            DEFAULT_MAX_REDIRECTS as usize,
        )?;
        Ok(u32::try_from(max).unwrap_or(DEFAULT_MAX_REDIRECTS))
    }

    fn set_webradio_max_redirects(&self, max: u32) -> Result<()> {
        self.set_value(
            &[SECTION, "http", "max_redirects"],
            Value::Number(Number::from(max)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::from_yaml_str("").unwrap();
        assert_eq!(config.get_webradio_user_agent().unwrap(), DEFAULT_USER_AGENT);
        assert_eq!(config.get_webradio_max_redirects().unwrap(), 10);
        assert_eq!(
            config.get_webradio_settings().unwrap(),
            StreamSettings::default()
        );
    }

    #[test]
    fn test_settings_from_yaml() {
        let config = Config::from_yaml_str(
            "webradio:\n  decode_buffer_samples: 2048\n  http:\n    user_agent: Winamp/5.0\n",
        )
        .unwrap();
        let settings = config.get_webradio_settings().unwrap();
        assert_eq!(settings.decode_buffer_samples, 2048);
        assert_eq!(settings.http.user_agent, "Winamp/5.0");
        assert_eq!(settings.header_buffer_size, 8192);
    }

    #[test]
    fn test_setters() {
        let config = Config::from_yaml_str("").unwrap();
        config.set_webradio_max_redirects(2).unwrap();
        config.set_webradio_user_agent("VLC/3.0".into()).unwrap();
        assert_eq!(config.get_webradio_max_redirects().unwrap(), 2);

        let settings = config.get_webradio_settings().unwrap();
        assert_eq!(settings.http.max_redirects, 2);
        assert_eq!(settings.http.user_agent, "VLC/3.0");
    }

    #[test]
    fn test_invalid_section_is_an_error() {
        let config = Config::from_yaml_str("webradio:\n  default_channels: 0\n").unwrap();
        assert!(config.get_webradio_settings().is_err());

        let config = Config::from_yaml_str("webradio:\n  header_buffer_size: lots\n").unwrap();
        assert!(config.get_webradio_settings().is_err());
    }
}
