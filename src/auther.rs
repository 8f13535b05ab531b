//! Signing and verification of gateway-originated forwarded calls.
//!
//! The token carried on the request is `"{type} {accessId}:{base64(digest)}"`
//! where the digest is `SHA-256(service ++ noise ++ internalAccessKey)`. The
//! signer is always this gateway's own internal credential.
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::credential::CredentialStore;
use crate::error::{AuthError, Result};
use crate::settings::InternalCredential;

pub const HEADER_SERVICE: &str = "x-gw-service";
pub const HEADER_NOISE: &str = "x-gw-noise";
pub const HEADER_AUTH: &str = "x-gw-auth";

/// Per-request authentication context; `generate` fills it in place.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestHeader {
    pub service: String,
    #[serde(default)]
    pub noise: String,
    #[serde(default)]
    pub gateway_auth: String,
}

impl RequestHeader {
    pub fn for_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
            ..Self::default()
        }
    }
}

/// Mixed timestamp/random 64-bit value, hex encoded
pub fn generate_noise() -> String {
    let millis = Utc::now().timestamp_millis() as u64;
    let mixed = (millis << 20) ^ rand::random::<u64>();
    format!("{:016x}", mixed)
}

fn digest(service: &str, noise: &str, key: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(service.as_bytes());
    hasher.update(noise.as_bytes());
    hasher.update(key);
    hasher.finalize().into()
}

struct ParsedAuth<'a> {
    access_id: &'a str,
    signature: &'a str,
}

fn parse_auth(token: &str) -> std::result::Result<ParsedAuth<'_>, AuthError> {
    let (auth_type, credential) = token
        .split_once(' ')
        .ok_or_else(|| AuthError::Malformed("missing type separator".to_string()))?;
    if auth_type.is_empty() {
        return Err(AuthError::Malformed("empty auth type".to_string()));
    }
    let (access_id, signature) = credential
        .split_once(':')
        .ok_or_else(|| AuthError::Malformed("missing signature separator".to_string()))?;
    if access_id.is_empty() || signature.is_empty() {
        return Err(AuthError::Malformed("empty access id or signature".to_string()));
    }
    Ok(ParsedAuth {
        access_id,
        signature,
    })
}

#[derive(Clone)]
pub struct GatewayAuther {
    credentials: CredentialStore,
    internal: Option<InternalCredential>,
}

impl std::fmt::Debug for GatewayAuther {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayAuther")
            .field("internal", &self.internal)
            .finish()
    }
}

impl GatewayAuther {
    pub fn new(credentials: CredentialStore, internal: Option<InternalCredential>) -> Self {
        Self {
            credentials,
            internal,
        }
    }

    pub fn has_internal_credential(&self) -> bool {
        self.internal.is_some()
    }

    /// Sign `header`, generating its noise first when absent
    pub fn generate(&self, auth_type: &str, header: &mut RequestHeader) -> Result<()> {
        let internal = self
            .internal
            .as_ref()
            .ok_or(AuthError::NoInternalCredential)?;
        if auth_type.is_empty() || auth_type.contains(' ') {
            return Err(AuthError::Digest(format!("bad auth type {:?}", auth_type)).into());
        }
        if header.noise.is_empty() {
            header.noise = generate_noise();
        }
        let signature = digest(&header.service, &header.noise, &internal.access_key);
        header.gateway_auth = format!(
            "{} {}:{}",
            auth_type,
            internal.access_id,
            BASE64.encode(signature)
        );
        Ok(())
    }

    pub fn verify(&self, header: &RequestHeader) -> Result<()> {
        if header.gateway_auth.is_empty() {
            return Err(AuthError::Missing.into());
        }
        let parsed = parse_auth(&header.gateway_auth)?;
        self.check_named_access(parsed.access_id)?;

        let internal = self
            .internal
            .as_ref()
            .ok_or(AuthError::NoInternalCredential)?;
        let presented = BASE64
            .decode(parsed.signature)
            .map_err(|_| AuthError::Malformed("signature is not base64".to_string()))?;
        let expected = digest(&header.service, &header.noise, &internal.access_key);
        if presented.len() != expected.len() || !bool::from(presented.ct_eq(&expected)) {
            warn!(
                "Gateway auth mismatch for service {} from {}",
                header.service, parsed.access_id
            );
            return Err(AuthError::AuthFail.into());
        }
        debug!("Gateway auth ok for service {}", header.service);
        Ok(())
    }

    /// The named credential must be known and valid. Our own configured
    /// credential counts as known before it has been replicated here.
    fn check_named_access(&self, access_id: &str) -> Result<()> {
        match self.credentials.get_access(access_id)? {
            Some(access) if access.is_valid() => Ok(()),
            Some(_) => Err(AuthError::UnknownCredential(access_id.to_string()).into()),
            None => match &self.internal {
                Some(internal) if internal.access_id == access_id => Ok(()),
                _ => Err(AuthError::UnknownCredential(access_id.to_string()).into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::storage::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn credentials() -> CredentialStore {
        CredentialStore::new(
            "gw-test",
            Arc::new(MemoryStore::new("master_key")),
            Arc::new(MemoryStore::new("service_access")),
            64,
            Duration::from_secs(30),
        )
    }

    fn auther_with_issued() -> (GatewayAuther, CredentialStore, String) {
        let store = credentials();
        let access = store.create_access("gateway").unwrap();
        let key = store.access_key(&access).unwrap();
        let internal = InternalCredential {
            access_id: access.id().to_string(),
            access_key: key.to_vec(),
        };
        (
            GatewayAuther::new(store.clone(), Some(internal)),
            store,
            access.id().to_string(),
        )
    }

    fn assert_auth_err(result: Result<()>) -> AuthError {
        match result {
            Err(GatewayError::Auth(err)) => err,
            other => panic!("expected auth error, got {:?}", other),
        }
    }

    #[test]
    fn test_generate_then_verify() {
        let (auther, _, access_id) = auther_with_issued();
        let mut header = RequestHeader::for_service("orders");
        auther.generate("GW", &mut header).unwrap();

        assert_eq!(header.noise.len(), 16);
        assert!(header
            .gateway_auth
            .starts_with(&format!("GW {}:", access_id)));
        auther.verify(&header).unwrap();
    }

    #[test]
    fn test_existing_noise_is_kept() {
        let (auther, _, _) = auther_with_issued();
        let mut header = RequestHeader::for_service("orders");
        header.noise = "00000000deadbeef".to_string();
        auther.generate("GW", &mut header).unwrap();
        assert_eq!(header.noise, "00000000deadbeef");
        auther.verify(&header).unwrap();
    }

    #[test]
    fn test_tampering_fails() {
        let (auther, _, _) = auther_with_issued();
        let mut header = RequestHeader::for_service("orders");
        auther.generate("GW", &mut header).unwrap();

        let mut service = header.clone();
        service.service = "billing".to_string();
        assert_eq!(assert_auth_err(auther.verify(&service)), AuthError::AuthFail);

        let mut noise = header.clone();
        noise.noise = "0000000000000000".to_string();
        assert_eq!(assert_auth_err(auther.verify(&noise)), AuthError::AuthFail);

        let mut signature = header.clone();
        let (prefix, sig) = signature.gateway_auth.rsplit_once(':').unwrap();
        let flipped = if sig.starts_with('A') { "B" } else { "A" };
        signature.gateway_auth = format!("{}:{}{}", prefix, flipped, &sig[1..]);
        assert_eq!(assert_auth_err(auther.verify(&signature)), AuthError::AuthFail);
    }

    #[test]
    fn test_malformed_tokens() {
        let (auther, _, access_id) = auther_with_issued();
        let mut header = RequestHeader::for_service("orders");
        header.noise = "0000000000000001".to_string();

        header.gateway_auth = String::new();
        assert_eq!(assert_auth_err(auther.verify(&header)), AuthError::Missing);

        for token in [
            "GW".to_string(),
            format!("GW {}", access_id),
            "GW :c2ln".to_string(),
            format!("GW {}:", access_id),
            format!(" {}:c2ln", access_id),
        ] {
            header.gateway_auth = token.clone();
            assert!(
                matches!(assert_auth_err(auther.verify(&header)), AuthError::Malformed(_)),
                "token {:?}",
                token
            );
        }
    }

    #[test]
    fn test_unknown_or_invalid_access() {
        let (auther, store, access_id) = auther_with_issued();
        let mut header = RequestHeader::for_service("orders");
        auther.generate("GW", &mut header).unwrap();

        let mut unknown = header.clone();
        unknown.gateway_auth = unknown.gateway_auth.replacen(&access_id, "ak.mk0.00001", 1);
        assert!(matches!(
            assert_auth_err(auther.verify(&unknown)),
            AuthError::UnknownCredential(_)
        ));

        store.set_access_state(&access_id, false).unwrap();
        assert!(matches!(
            assert_auth_err(auther.verify(&header)),
            AuthError::UnknownCredential(_)
        ));
    }

    #[test]
    fn test_internal_credential_known_before_replication() {
        // a sibling that has not received the credential yet still accepts it
        let internal = InternalCredential {
            access_id: "ak.mk1.abcd12".to_string(),
            access_key: vec![5u8; 32],
        };
        let auther = GatewayAuther::new(credentials(), Some(internal));
        let mut header = RequestHeader::for_service("mesh.sync");
        auther.generate("MESH", &mut header).unwrap();
        auther.verify(&header).unwrap();
    }

    #[test]
    fn test_generate_without_internal_credential() {
        let auther = GatewayAuther::new(credentials(), None);
        let mut header = RequestHeader::for_service("orders");
        assert_eq!(
            assert_auth_err(auther.generate("GW", &mut header)),
            AuthError::NoInternalCredential
        );
    }
}
