//! Client-secret sourcing for the secured endpoint.
//!
//! When security is enabled the master is handed a base64-encoded
//! shared secret through the environment. There is no fallback: a
//! missing or malformed secret fails bootstrap.

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use jobmaster_common::ids::ApplicationAttemptId;

type HmacSha256 = Hmac<Sha256>;

/// Well-known environment variable carrying the base64 client secret.
pub const CLIENT_SECRET_ENV: &str = "JOBMASTER_CLIENT_SECRET";

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("{CLIENT_SECRET_ENV} is not set but security is enabled")]
    Missing,
    #[error("client secret is not valid base64: {0}")]
    Malformed(#[from] base64::DecodeError),
}

/// Source of the master client secret. Injected so tests can supply a
/// secret without touching the process environment.
pub trait SecretProvider: Send + Sync {
    fn client_secret(&self) -> Result<Vec<u8>, SecretError>;
}

/// Production provider: reads `JOBMASTER_CLIENT_SECRET`.
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn client_secret(&self) -> Result<Vec<u8>, SecretError> {
        let raw = std::env::var(CLIENT_SECRET_ENV).map_err(|_| SecretError::Missing)?;
        Ok(general_purpose::STANDARD.decode(raw.trim().as_bytes())?)
    }
}

/// Fixed secret for tests and local development.
pub struct StaticSecretProvider(pub Vec<u8>);

impl SecretProvider for StaticSecretProvider {
    fn client_secret(&self) -> Result<Vec<u8>, SecretError> {
        Ok(self.0.clone())
    }
}

/// Bind the master secret to the owning application attempt. The
/// derived key is what both ends use to sign protocol envelopes, so a
/// secret leaked from one attempt is useless against another.
pub fn derive_connection_key(master: &[u8], attempt: &ApplicationAttemptId) -> String {
    let mut mac = HmacSha256::new_from_slice(master).expect("HMAC accepts any key length");
    mac.update(attempt.to_string().as_bytes());
    general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmaster_common::ids::ApplicationId;

    fn attempt() -> ApplicationAttemptId {
        ApplicationAttemptId::new(ApplicationId::new(10, 1), 1)
    }

    #[test]
    fn env_provider_requires_well_formed_base64() {
        // One test mutates the process environment to avoid races
        // between parallel test threads.
        std::env::remove_var(CLIENT_SECRET_ENV);
        assert!(matches!(
            EnvSecretProvider.client_secret(),
            Err(SecretError::Missing)
        ));

        std::env::set_var(CLIENT_SECRET_ENV, "%%% not base64 %%%");
        assert!(matches!(
            EnvSecretProvider.client_secret(),
            Err(SecretError::Malformed(_))
        ));

        std::env::set_var(
            CLIENT_SECRET_ENV,
            general_purpose::STANDARD.encode(b"master-secret"),
        );
        assert_eq!(
            EnvSecretProvider.client_secret().unwrap(),
            b"master-secret".to_vec()
        );
        std::env::remove_var(CLIENT_SECRET_ENV);
    }

    #[test]
    fn derived_key_is_scoped_to_the_attempt() {
        let key_a = derive_connection_key(b"master", &attempt());
        let key_b = derive_connection_key(
            b"master",
            &ApplicationAttemptId::new(ApplicationId::new(10, 1), 2),
        );
        assert_ne!(key_a, key_b);
        assert_eq!(key_a, derive_connection_key(b"master", &attempt()));
    }
}
