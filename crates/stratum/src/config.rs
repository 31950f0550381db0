//! Database configuration loading and validation.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, StratumError};

fn default_port() -> u16 {
    1433
}

fn default_encrypt() -> String {
    "true".to_string()
}

fn default_max_connections() -> u32 {
    8
}

/// Connection and deployment options for the active database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseOptions {
    /// Server host name or address.
    pub host: String,

    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Login user.
    pub user: String,

    /// Login password.
    pub password: String,

    /// Encryption setting ("true"/"false").
    #[serde(default = "default_encrypt")]
    pub encrypt: String,

    /// Trust the server certificate (for self-signed dev servers).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Physical table-name prefix substituted for the prefix token. Empty
    /// collapses to no prefix, letting one database host several logically
    /// prefixed deployments.
    #[serde(default)]
    pub prefix: String,

    /// Default schema for derived table names.
    #[serde(default)]
    pub schema: Option<String>,

    /// Connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseOptions {
    /// Load options from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse options from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let options: DatabaseOptions = serde_yaml::from_str(yaml)?;
        options.validate()?;
        Ok(options)
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(StratumError::Config("host must not be empty".to_string()));
        }
        if self.database.is_empty() {
            return Err(StratumError::Config(
                "database must not be empty".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(StratumError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Build a tiberius connection configuration.
    pub fn tiberius_config(&self) -> tiberius::Config {
        let mut config = tiberius::Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.database(&self.database);
        config.authentication(tiberius::AuthMethod::sql_server(&self.user, &self.password));

        match self.encrypt.to_lowercase().as_str() {
            "false" | "no" | "0" | "disable" => {
                config.encryption(tiberius::EncryptionLevel::NotSupported);
            }
            _ => {
                if self.trust_server_cert {
                    config.trust_cert();
                }
                config.encryption(tiberius::EncryptionLevel::Required);
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
host: localhost
database: app
user: sa
password: secret
prefix: moz
"#;

    #[test]
    fn test_from_yaml_defaults() {
        let options = DatabaseOptions::from_yaml(YAML).unwrap();
        assert_eq!(options.port, 1433);
        assert_eq!(options.prefix, "moz");
        assert_eq!(options.max_connections, 8);
        assert_eq!(options.schema, None);
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        let yaml = YAML.replace("localhost", "\"\"");
        let err = DatabaseOptions::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, StratumError::Config(_)));
    }
}
