//! YAML configuration for the client and CLI.

use std::fs;
use std::io;

use serde::Deserialize;
use serde::Serialize;
use talka_core::Identity;

use crate::error::Error;
use crate::error::Result;
use crate::processor::ProcessorConfig;
use crate::util::ensure_parent_dir;
use crate::util::expand_home;

pub const DEFAULT_CONFIG_PATH: &str = "~/.talka/config.yaml";
pub const DEFAULT_ENDPOINT_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_ICE_SERVERS: &str = "stun://stun.l.google.com:19302";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Base URL of the chat backend.
    pub endpoint_url: String,
    /// `;`-separated stun:// and turn:// urls.
    pub ice_servers: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ip: Option<String>,
    /// Opaque user id, generated on `init` and stable afterwards.
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Bearer token from a previous login, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        let identity = Identity::generate();
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            ice_servers: DEFAULT_ICE_SERVERS.to_string(),
            external_ip: None,
            user_id: identity.user_id,
            user_name: None,
            token: None,
        }
    }

    /// The identity persisted in this config.
    pub fn identity(&self) -> Identity {
        let mut identity = Identity::from_user_id(&self.user_id);
        if let Some(ref name) = self.user_name {
            identity.set_user_name(name);
        }
        identity
    }

    pub fn write_fs<P>(&self, path: P) -> Result<String>
    where P: AsRef<std::path::Path> {
        let path = expand_home(path)?;
        ensure_parent_dir(&path)?;
        let f =
            fs::File::create(path.as_path()).map_err(|e| Error::CreateFileError(e.to_string()))?;
        let f_writer = io::BufWriter::new(f);
        serde_yaml::to_writer(f_writer, self)?;
        Ok(path.to_string_lossy().into_owned())
    }

    pub fn read_fs<P>(path: P) -> Result<Config>
    where P: AsRef<std::path::Path> {
        let path = expand_home(path)?;
        tracing::debug!("Read config from: {:?}", path);
        let f = fs::File::open(path).map_err(|e| Error::OpenFileError(e.to_string()))?;
        let f_rdr = io::BufReader::new(f);
        Ok(serde_yaml::from_reader(f_rdr)?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<Config> for ProcessorConfig {
    type Error = Error;
    fn try_from(config: Config) -> Result<Self> {
        let mut cfg = ProcessorConfig::new(
            config.endpoint_url.clone(),
            config.ice_servers.clone(),
            config.identity(),
        );

        cfg = if let Some(ext_ip) = config.external_ip {
            cfg.external_address(ext_ip)
        } else {
            cfg
        };

        cfg = if let Some(token) = config.token {
            cfg.token(token)
        } else {
            cfg
        };

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialization_with_missed_fields() {
        let yaml = r#"
endpoint_url: http://127.0.0.1:8000
ice_servers: stun://stun.l.google.com:19302
user_id: 9f1b2c3d-0000-0000-0000-000000000000
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.user_name, None);
        assert_eq!(cfg.token, None);
        assert_eq!(cfg.external_ip, None);
    }

    #[test]
    fn test_round_trip() {
        let mut cfg = Config::new();
        cfg.user_name = Some("ada".to_string());
        let dumped = serde_yaml::to_string(&cfg).unwrap();
        let back: Config = serde_yaml::from_str(&dumped).unwrap();
        assert_eq!(back.user_id, cfg.user_id);
        assert_eq!(back.user_name.as_deref(), Some("ada"));
    }

    #[test]
    fn test_identity_uses_guest_name_when_unset() {
        let cfg = Config::new();
        let identity = cfg.identity();
        assert!(identity.display_name().starts_with("Guest-"));
    }
}
