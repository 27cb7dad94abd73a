// src/signing.rs
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::codec::{decode_base64url, encode_base64url};
use crate::error::{HandshakeError, SigningStringError, VerifyError};

pub const SIGNING_VERSION_V1: &str = "v1";
pub const SIGNING_VERSION_V2: &str = "v2";

const DELIMITER: char = '|';

/// Inputs to the canonical signing string, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningFields<'a> {
    pub version: &'a str,
    pub device_id: &'a str,
    pub client_id: &'a str,
    pub client_mode: &'a str,
    pub role: &'a str,
    pub scopes: &'a [String],
    pub signed_at_ms: i64,
    pub token: Option<&'a str>,
    pub nonce: Option<&'a str>,
}

/// Builds `version|deviceId|clientId|clientMode|role|scopesCSV|signedAtMs|token`,
/// with `|nonce` appended for v2 when a nonce is present. The server verifies
/// over this exact byte string.
pub fn build_signing_string(f: &SigningFields<'_>) -> Result<String, SigningStringError> {
    let token = f.token.unwrap_or_default();
    let nonce = f.nonce.unwrap_or_default();

    for (field, value) in [
        ("version", f.version),
        ("deviceId", f.device_id),
        ("clientId", f.client_id),
        ("clientMode", f.client_mode),
        ("role", f.role),
        ("token", token),
        ("nonce", nonce),
    ] {
        reject(field, value, DELIMITER)?;
    }
    for scope in f.scopes {
        reject("scopes", scope, DELIMITER)?;
        reject("scopes", scope, ',')?;
    }

    let mut parts = vec![
        f.version.to_string(),
        f.device_id.to_string(),
        f.client_id.to_string(),
        f.client_mode.to_string(),
        f.role.to_string(),
        f.scopes.join(","),
        f.signed_at_ms.to_string(),
        token.to_string(),
    ];
    if f.version == SIGNING_VERSION_V2 && !nonce.is_empty() {
        parts.push(nonce.to_string());
    }
    Ok(parts.join("|"))
}

fn reject(field: &'static str, value: &str, delimiter: char) -> Result<(), SigningStringError> {
    if value.contains(delimiter) {
        return Err(SigningStringError::Delimiter { field, delimiter });
    }
    Ok(())
}

/// Ed25519 signature over the UTF-8 bytes of `message`, as base64url.
pub fn sign(message: &str, private_key: &[u8]) -> Result<String, HandshakeError> {
    let seed: &[u8; 32] = private_key.try_into().map_err(|_| {
        HandshakeError::Signing(format!(
            "private key must be 32 bytes, got {}",
            private_key.len()
        ))
    })?;
    let sk = SigningKey::from_bytes(seed);
    let sig = sk.sign(message.as_bytes());
    Ok(encode_base64url(&sig.to_bytes()))
}

pub fn verify(message: &str, signature_b64: &str, pubkey_b64: &str) -> Result<(), VerifyError> {
    let sig_bytes = decode_base64url(signature_b64)?;
    let sig = Signature::from_slice(&sig_bytes)
        .map_err(|e| VerifyError::MalformedSignature(e.to_string()))?;
    let vk_bytes = decode_base64url(pubkey_b64)?;
    let vk = VerifyingKey::try_from(&vk_bytes[..])
        .map_err(|e| VerifyError::MalformedPublicKey(e.to_string()))?;
    vk.verify(message.as_bytes(), &sig)
        .map_err(|_| VerifyError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use proptest::prelude::*;

    fn scopes() -> Vec<String> {
        vec![
            "operator.admin".into(),
            "operator.approvals".into(),
            "operator.pairing".into(),
        ]
    }

    fn fields<'a>(scopes: &'a [String]) -> SigningFields<'a> {
        SigningFields {
            version: SIGNING_VERSION_V2,
            device_id: "dev",
            client_id: "moltbot-probe",
            client_mode: "webchat",
            role: "operator",
            scopes,
            signed_at_ms: 1_700_000_000_000,
            token: Some("tok"),
            nonce: Some("abc123"),
        }
    }

    #[test]
    fn v2_field_order() {
        let s = scopes();
        assert_eq!(
            build_signing_string(&fields(&s)).unwrap(),
            "v2|dev|moltbot-probe|webchat|operator|operator.admin,operator.approvals,operator.pairing|1700000000000|tok|abc123"
        );
    }

    #[test]
    fn v1_omits_nonce() {
        let s = scopes();
        let f = SigningFields { version: SIGNING_VERSION_V1, ..fields(&s) };
        let out = build_signing_string(&f).unwrap();
        assert!(out.ends_with("|1700000000000|tok"));
        assert_eq!(out.split('|').count(), 8);
    }

    #[test]
    fn missing_token_and_empty_scopes_are_empty_fields() {
        let f = SigningFields { token: None, ..fields(&[]) };
        assert_eq!(
            build_signing_string(&f).unwrap(),
            "v2|dev|moltbot-probe|webchat|operator||1700000000000||abc123"
        );
    }

    #[test]
    fn v2_without_nonce_has_eight_fields() {
        let s = scopes();
        for nonce in [None, Some("")] {
            let f = SigningFields { nonce, ..fields(&s) };
            assert_eq!(build_signing_string(&f).unwrap().split('|').count(), 8);
        }
    }

    #[test]
    fn delimiter_in_field_is_rejected() {
        let s = scopes();
        let f = SigningFields { token: Some("a|b"), ..fields(&s) };
        assert_eq!(
            build_signing_string(&f).unwrap_err(),
            SigningStringError::Delimiter { field: "token", delimiter: '|' }
        );
        let bad = vec!["a,b".to_string()];
        assert!(build_signing_string(&fields(&bad)).is_err());
    }

    #[test]
    fn sign_then_verify() {
        let id = Identity::from_seed([3u8; 32]);
        let msg = "v2|dev|moltbot-probe|webchat|operator||1|tok|abc123";
        let sig = sign(msg, id.private_key()).unwrap();
        assert!(!sig.contains('='));
        verify(msg, &sig, &id.public_key_base64url()).unwrap();

        let tampered = msg.replace("abc123", "abc124");
        assert_eq!(
            verify(&tampered, &sig, &id.public_key_base64url()).unwrap_err(),
            VerifyError::BadSignature
        );
    }

    #[test]
    fn verify_rejects_other_key() {
        let a = Identity::from_seed([1u8; 32]);
        let b = Identity::from_seed([2u8; 32]);
        let sig = sign("hello", a.private_key()).unwrap();
        assert!(verify("hello", &sig, &b.public_key_base64url()).is_err());
    }

    #[test]
    fn structurally_invalid_key_is_signing_error() {
        let err = sign("hello", &[0u8; 16]).unwrap_err();
        assert!(matches!(err, HandshakeError::Signing(_)));
    }

    proptest! {
        #[test]
        fn prop_signing_string_is_stable(
            device in "[0-9a-f]{64}",
            nonce in "[A-Za-z0-9_-]{1,32}",
            signed_at in 0i64..=i64::MAX,
        ) {
            let s = scopes();
            let f = SigningFields {
                device_id: &device,
                nonce: Some(&nonce),
                signed_at_ms: signed_at,
                ..fields(&s)
            };
            let a = build_signing_string(&f).unwrap();
            let b = build_signing_string(&f).unwrap();
            prop_assert_eq!(&a, &b);
            let parts: Vec<&str> = a.split('|').collect();
            prop_assert_eq!(parts.len(), 9);
            prop_assert_eq!(parts[1], device.as_str());
            let signed_at_text = signed_at.to_string();
            prop_assert_eq!(parts[6], signed_at_text.as_str());
            prop_assert_eq!(parts[8], nonce.as_str());
        }
    }
}
