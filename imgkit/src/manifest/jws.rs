//! Detached "pretty" JWS envelope of signed schema 1 manifests
//!
//! The signatures are appended into the manifest JSON itself. Each protected header
//! records `formatLength` and `formatTail`, from which the signed payload is rebuilt as
//! `raw[..formatLength] ++ formatTail`.

use crate::error::*;
use ring::signature::{self, RsaPublicKeyComponents, UnparsedPublicKey};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct Envelope {
    signatures: Option<Vec<JwsSignature>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(super) struct JwsSignature {
    header: JwsHeader,
    signature: String,
    protected: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct JwsHeader {
    jwk: Option<Jwk>,
    alg: String,
    x5c: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kty")]
enum Jwk {
    #[serde(rename = "EC")]
    Ec { crv: String, x: String, y: String },
    #[serde(rename = "RSA")]
    Rsa { n: String, e: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Protected {
    format_length: usize,
    format_tail: String,
}

/// Payload recovered from a signed manifest, with the signatures covering it
#[derive(Debug, Clone, PartialEq)]
pub(super) struct SignedPayload {
    pub payload: Vec<u8>,
    signatures: Vec<JwsSignature>,
}

fn decode_b64url(input: &str) -> Result<Vec<u8>> {
    base64::decode_config(input.trim_end_matches('='), base64::URL_SAFE_NO_PAD)
        .map_err(|e| Error::InvalidSignature(format!("invalid base64url: {}", e)))
}

fn encode_b64url(input: &[u8]) -> String {
    base64::encode_config(input, base64::URL_SAFE_NO_PAD)
}

/// Rebuild the signed payload, or `None` when the manifest carries no signature
pub(super) fn parse_pretty_signature(raw: &[u8]) -> Result<Option<SignedPayload>> {
    let envelope: Envelope = serde_json::from_slice(raw)?;
    let signatures = match envelope.signatures {
        Some(signatures) if !signatures.is_empty() => signatures,
        _ => return Ok(None),
    };

    let mut payload: Option<Vec<u8>> = None;
    for signature in &signatures {
        let protected: Protected = serde_json::from_slice(&decode_b64url(&signature.protected)?)
            .map_err(|e| Error::InvalidSignature(format!("invalid protected header: {}", e)))?;
        if protected.format_length > raw.len() {
            return Err(Error::InvalidSignature(format!(
                "formatLength {} exceeds manifest length {}",
                protected.format_length,
                raw.len()
            )));
        }
        let mut rebuilt = raw[..protected.format_length].to_vec();
        rebuilt.extend(decode_b64url(&protected.format_tail)?);
        match &payload {
            None => payload = Some(rebuilt),
            Some(first) if *first == rebuilt => {}
            Some(_) => {
                return Err(Error::InvalidSignature(
                    "signatures cover different payloads".to_string(),
                ))
            }
        }
    }
    Ok(payload.map(|payload| SignedPayload {
        payload,
        signatures,
    }))
}

impl SignedPayload {
    /// Verify every signature against the key embedded in its header
    pub fn verify(&self) -> Result<()> {
        let encoded_payload = encode_b64url(&self.payload);
        for signature in &self.signatures {
            let input = format!("{}.{}", signature.protected, encoded_payload);
            let sig = decode_b64url(&signature.signature)?;
            signature.header.verify(input.as_bytes(), &sig)?;
        }
        Ok(())
    }
}

impl JwsHeader {
    fn verify(&self, input: &[u8], sig: &[u8]) -> Result<()> {
        let jwk = match (&self.jwk, &self.x5c) {
            (Some(jwk), _) => jwk,
            (None, Some(_)) => {
                return Err(Error::Unsupported(
                    "schema 1 signature with x5c certificate chain".to_string(),
                ))
            }
            (None, None) => {
                return Err(Error::InvalidSignature(
                    "signature header has no key".to_string(),
                ))
            }
        };
        let verified = match (self.alg.as_str(), jwk) {
            ("ES256", Jwk::Ec { crv, x, y }) if crv == "P-256" => {
                let key = ec_point(x, y)?;
                UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_FIXED, key).verify(input, sig)
            }
            ("ES384", Jwk::Ec { crv, x, y }) if crv == "P-384" => {
                let key = ec_point(x, y)?;
                UnparsedPublicKey::new(&signature::ECDSA_P384_SHA384_FIXED, key).verify(input, sig)
            }
            (alg @ ("RS256" | "RS384" | "RS512"), Jwk::Rsa { n, e }) => {
                let params = match alg {
                    "RS256" => &signature::RSA_PKCS1_2048_8192_SHA256,
                    "RS384" => &signature::RSA_PKCS1_2048_8192_SHA384,
                    _ => &signature::RSA_PKCS1_2048_8192_SHA512,
                };
                let key = RsaPublicKeyComponents {
                    n: decode_b64url(n)?,
                    e: decode_b64url(e)?,
                };
                key.verify(params, input, sig)
            }
            (alg, _) => {
                return Err(Error::Unsupported(format!(
                    "schema 1 signature algorithm {}",
                    alg
                )))
            }
        };
        verified.map_err(|_| Error::InvalidSignature("signature does not match".to_string()))
    }
}

/// Uncompressed SEC1 point `0x04 || x || y`
fn ec_point(x: &str, y: &str) -> Result<Vec<u8>> {
    let mut point = vec![0x04];
    point.extend(decode_b64url(x)?);
    point.extend(decode_b64url(y)?);
    Ok(point)
}

/// Sign manifests in tests the way registries did
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use ring::{
        rand::SystemRandom,
        signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING},
    };

    /// Append an ES256 signature block to a pretty-printed JSON object
    pub fn sign(payload: &str) -> String {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
        let key =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .unwrap();
        let public = key.public_key().as_ref();
        let (x, y) = public[1..].split_at(32);

        let format_length = payload.rfind("\n}").unwrap();
        let protected = encode_b64url(
            serde_json::json!({
                "formatLength": format_length,
                "formatTail": encode_b64url(&payload.as_bytes()[format_length..]),
                "time": "2016-01-01T00:00:00Z",
            })
            .to_string()
            .as_bytes(),
        );
        let input = format!("{}.{}", protected, encode_b64url(payload.as_bytes()));
        let sig = key.sign(&rng, input.as_bytes()).unwrap();

        let signatures = serde_json::json!([{
            "header": {
                "jwk": {
                    "crv": "P-256",
                    "kid": "TEST:KEY",
                    "kty": "EC",
                    "x": encode_b64url(x),
                    "y": encode_b64url(y),
                },
                "alg": "ES256",
            },
            "signature": encode_b64url(sig.as_ref()),
            "protected": protected,
        }]);
        format!(
            "{},\n  \"signatures\": {}\n}}",
            &payload[..format_length],
            serde_json::to_string_pretty(&signatures).unwrap()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = "{\n  \"schemaVersion\": 1,\n  \"name\": \"library/app\"\n}";

    #[test]
    fn unsigned() -> Result<()> {
        assert_eq!(parse_pretty_signature(PAYLOAD.as_bytes())?, None);
        Ok(())
    }

    #[test]
    fn signed_payload_is_recovered_and_verified() -> Result<()> {
        let signed = testing::sign(PAYLOAD);
        assert_ne!(signed, PAYLOAD);
        let parsed = parse_pretty_signature(signed.as_bytes())?.unwrap();
        assert_eq!(parsed.payload, PAYLOAD.as_bytes());
        parsed.verify()?;
        Ok(())
    }

    #[test]
    fn tampered_payload_is_rejected() -> Result<()> {
        let signed = testing::sign(PAYLOAD).replace("library/app", "library/evil");
        let parsed = parse_pretty_signature(signed.as_bytes())?.unwrap();
        assert!(matches!(parsed.verify(), Err(Error::InvalidSignature(_))));
        Ok(())
    }
}
