use std::path::PathBuf;

use serde::Deserialize;

use metric_registry_core::{MetricsError, Result};

use crate::server::{self, ServerOption};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            version: 1,
            server: ServerSection::default(),
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(MetricsError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.server.validate()
    }

    /// `None` means attach mode. Validates first, so a hand-built config
    /// with incomplete TLS settings is an error rather than attach mode.
    pub fn server_option(&self) -> Result<Option<ServerOption>> {
        self.validate()?;
        let s = &self.server;
        let option = match s.mode {
            ServerMode::Plain => Some(server::server(s.port)),
            ServerMode::Public => Some(server::public_server(s.port)),
            ServerMode::Tls => {
                let (Some(cert), Some(key), Some(ca)) = (&s.cert_file, &s.key_file, &s.ca_file)
                else {
                    return Err(MetricsError::Config(
                        "server.mode tls requires cert_file, key_file and ca_file".into(),
                    ));
                };
                Some(server::tls_server(s.port, cert, key, ca))
            }
            ServerMode::Attach => None,
        };
        Ok(option)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    #[default]
    Plain,
    Tls,
    Public,
    Attach,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default)]
    pub mode: ServerMode,

    /// 0 lets the OS pick a port.
    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        let tls_files = [&self.cert_file, &self.key_file, &self.ca_file];
        match self.mode {
            ServerMode::Tls => {
                if tls_files.iter().any(|f| f.is_none()) {
                    return Err(MetricsError::Config(
                        "server.mode tls requires cert_file, key_file and ca_file".into(),
                    ));
                }
            }
            _ => {
                if tls_files.iter().any(|f| f.is_some()) {
                    return Err(MetricsError::Config(
                        "server.cert_file/key_file/ca_file are only valid with mode tls".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_plain_ephemeral() {
        let cfg = RegistryConfig::default();
        assert_eq!(cfg.server_option().unwrap(), Some(server::server(0)));
    }

    #[test]
    fn attach_has_no_server_option() {
        let section = ServerSection {
            mode: ServerMode::Attach,
            ..ServerSection::default()
        };
        assert!(section.validate().is_ok());
        let cfg = RegistryConfig {
            version: 1,
            server: section,
        };
        assert_eq!(cfg.server_option().unwrap(), None);
    }

    #[test]
    fn incomplete_tls_is_an_error_not_attach() {
        let cfg = RegistryConfig {
            version: 1,
            server: ServerSection {
                mode: ServerMode::Tls,
                cert_file: Some("server.crt".into()),
                ..ServerSection::default()
            },
        };
        let err = cfg.server_option().unwrap_err();
        assert_eq!(err.kind().as_str(), "CONFIG");
    }

    #[test]
    fn unchecked_version_is_rejected() {
        let cfg = RegistryConfig {
            version: 2,
            server: ServerSection::default(),
        };
        assert!(cfg.server_option().is_err());
    }
}
