//! # Connection Config
//!
//! Turns the channel secret and config map into a transport-agnostic
//! connection descriptor.
//!
//! Secret keys: `user` + `accessToken` (basic auth), `sshKey` + `passphrase`
//! (SSH), `clientCert` + `clientKey` (mTLS). Config map key: `caCerts`.
//! A missing secret or config map yields anonymous access.

use crate::constants::{
    CONFIG_MAP_KEY_CA_CERTS, SECRET_KEY_ACCESS_TOKEN, SECRET_KEY_CLIENT_CERT,
    SECRET_KEY_CLIENT_KEY, SECRET_KEY_PASSPHRASE, SECRET_KEY_SSH_KEY, SECRET_KEY_USER,
};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("secret key '{0}' is not valid UTF-8")]
    InvalidEncoding(&'static str),
    #[error("channel secret provides '{present}' without '{missing}'")]
    IncompletePair {
        present: &'static str,
        missing: &'static str,
    },
    #[error("channel secret must provide 'user' and 'accessToken', 'sshKey', or a client certificate pair")]
    NoUsableCredentials,
}

/// Normalized connection settings for one channel
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub user: String,
    pub token: String,
    pub ssh_key: String,
    pub passphrase: String,
    pub client_cert: String,
    pub client_key: String,
    pub ca_certs: String,
    pub insecure_skip_verify: bool,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn redact(value: &str) -> &'static str {
            if value.is_empty() {
                ""
            } else {
                "***"
            }
        }
        f.debug_struct("ConnectionConfig")
            .field("user", &self.user)
            .field("token", &redact(&self.token))
            .field("ssh_key", &redact(&self.ssh_key))
            .field("passphrase", &redact(&self.passphrase))
            .field("client_cert", &redact(&self.client_cert))
            .field("client_key", &redact(&self.client_key))
            .field("ca_certs", &!self.ca_certs.is_empty())
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn with_insecure_skip_verify(mut self, insecure_skip_verify: bool) -> Self {
        self.insecure_skip_verify = insecure_skip_verify;
        self
    }

    #[must_use]
    pub fn has_basic_auth(&self) -> bool {
        !self.user.is_empty() && !self.token.is_empty()
    }

    #[must_use]
    pub fn has_client_cert(&self) -> bool {
        !self.client_cert.is_empty() && !self.client_key.is_empty()
    }
}

/// Build the connection descriptor for a channel
pub fn resolve_connection(
    secret: Option<&Secret>,
    config_map: Option<&ConfigMap>,
) -> Result<ConnectionConfig, ConnectionError> {
    let mut config = ConnectionConfig::default();

    if let Some(secret) = secret {
        config.user = secret_value(secret, SECRET_KEY_USER)?;
        config.token = secret_value(secret, SECRET_KEY_ACCESS_TOKEN)?;
        config.ssh_key = secret_value(secret, SECRET_KEY_SSH_KEY)?;
        config.passphrase = secret_value(secret, SECRET_KEY_PASSPHRASE)?;
        config.client_cert = secret_value(secret, SECRET_KEY_CLIENT_CERT)?;
        config.client_key = secret_value(secret, SECRET_KEY_CLIENT_KEY)?;
        validate_secret_fields(&config)?;
    }

    if let Some(data) = config_map.and_then(|cm| cm.data.as_ref()) {
        if let Some(ca_certs) = data.get(CONFIG_MAP_KEY_CA_CERTS) {
            config.ca_certs = ca_certs.trim().to_string();
        }
    }

    Ok(config)
}

fn validate_secret_fields(config: &ConnectionConfig) -> Result<(), ConnectionError> {
    check_pair(
        (SECRET_KEY_CLIENT_CERT, &config.client_cert),
        (SECRET_KEY_CLIENT_KEY, &config.client_key),
    )?;

    if !config.ssh_key.is_empty() || config.has_client_cert() {
        return Ok(());
    }

    check_pair(
        (SECRET_KEY_USER, &config.user),
        (SECRET_KEY_ACCESS_TOKEN, &config.token),
    )?;

    if config.has_basic_auth() {
        Ok(())
    } else {
        Err(ConnectionError::NoUsableCredentials)
    }
}

fn check_pair(
    (first_key, first): (&'static str, &str),
    (second_key, second): (&'static str, &str),
) -> Result<(), ConnectionError> {
    match (first.is_empty(), second.is_empty()) {
        (false, true) => Err(ConnectionError::IncompletePair {
            present: first_key,
            missing: second_key,
        }),
        (true, false) => Err(ConnectionError::IncompletePair {
            present: second_key,
            missing: first_key,
        }),
        _ => Ok(()),
    }
}

/// Read a key from `data`, falling back to `stringData`
fn secret_value(secret: &Secret, key: &'static str) -> Result<String, ConnectionError> {
    if let Some(bytes) = secret.data.as_ref().and_then(|data| data.get(key)) {
        return std::str::from_utf8(&bytes.0)
            .ok()
            .map(|value| value.trim().to_string())
            .ok_or(ConnectionError::InvalidEncoding(key));
    }
    Ok(secret
        .string_data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|value| value.trim().to_string())
        .unwrap_or_default())
}
