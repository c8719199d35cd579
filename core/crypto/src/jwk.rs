//! JWK (RFC 7517) import and export for key objects.
//!
//! Octet key pairs use the `OKP` key type, elliptic curve keys use `EC`
//! with uncompressed coordinates, and symmetric keys use `oct`. Thumbprints
//! follow RFC 7638.

use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use keyfort_common::{Error, Result};

use crate::alg::KeyAlg;
use crate::key::LocalKey;

/// A parsed JSON Web Key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
    // Algorithm id for `oct` keys, where kty alone is ambiguous
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

impl Jwk {
    /// Parse a JWK from its JSON encoding.
    pub fn from_str(jwk: &str) -> Result<Self> {
        serde_json::from_str(jwk).map_err(|e| Error::Input(format!("Invalid JWK: {}", e)))
    }

    /// Serialize to JSON.
    pub fn to_string(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Unexpected(format!("JWK serialization failed: {}", e)))
    }

    /// Compute the RFC 7638 thumbprint: SHA-256 over the canonical JSON
    /// containing only the required members in lexicographic order.
    pub fn thumbprint(&self) -> Result<String> {
        let canonical = match self.kty.as_str() {
            "EC" => format!(
                r#"{{"crv":"{}","kty":"EC","x":"{}","y":"{}"}}"#,
                self.require(&self.crv, "crv")?,
                self.require(&self.x, "x")?,
                self.require(&self.y, "y")?
            ),
            "OKP" => format!(
                r#"{{"crv":"{}","kty":"OKP","x":"{}"}}"#,
                self.require(&self.crv, "crv")?,
                self.require(&self.x, "x")?
            ),
            "oct" => format!(r#"{{"k":"{}","kty":"oct"}}"#, self.require(&self.k, "k")?),
            other => {
                return Err(Error::Unsupported(format!(
                    "Unsupported JWK key type: {}",
                    other
                )))
            }
        };
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(digest))
    }

    fn require<'a>(&self, field: &'a Option<String>, name: &str) -> Result<&'a str> {
        field
            .as_deref()
            .ok_or_else(|| Error::Input(format!("JWK is missing required member '{}'", name)))
    }
}

/// (kty, crv) pair for an algorithm, or `None` for symmetric keys.
fn jwk_curve(alg: KeyAlg) -> Option<(&'static str, &'static str)> {
    match alg {
        KeyAlg::Ed25519 => Some(("OKP", "Ed25519")),
        KeyAlg::X25519 => Some(("OKP", "X25519")),
        KeyAlg::Bls12381G1 => Some(("OKP", "Bls12381G1")),
        KeyAlg::Bls12381G2 => Some(("OKP", "Bls12381G2")),
        KeyAlg::EcSecp256r1 => Some(("EC", "P-256")),
        KeyAlg::EcSecp384r1 => Some(("EC", "P-384")),
        KeyAlg::EcSecp256k1 => Some(("EC", "secp256k1")),
        _ => None,
    }
}

fn alg_for_curve(kty: &str, crv: &str) -> Result<KeyAlg> {
    match (kty, crv) {
        ("OKP", "Ed25519") => Ok(KeyAlg::Ed25519),
        ("OKP", "X25519") => Ok(KeyAlg::X25519),
        ("OKP", "Bls12381G1") => Ok(KeyAlg::Bls12381G1),
        ("OKP", "Bls12381G2") => Ok(KeyAlg::Bls12381G2),
        ("EC", "P-256") => Ok(KeyAlg::EcSecp256r1),
        ("EC", "P-384") => Ok(KeyAlg::EcSecp384r1),
        ("EC", "secp256k1") => Ok(KeyAlg::EcSecp256k1),
        _ => Err(Error::Unsupported(format!(
            "Unsupported JWK key type: {}/{}",
            kty, crv
        ))),
    }
}

/// Uncompressed x and y coordinates of an EC public key.
fn ec_coordinates(alg: KeyAlg, public: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let uncompressed = match alg {
        KeyAlg::EcSecp256r1 => {
            use p256::elliptic_curve::sec1::ToEncodedPoint;
            let pk = p256::PublicKey::from_sec1_bytes(public)
                .map_err(|_| Error::Input("Invalid P-256 public key".to_string()))?;
            pk.to_encoded_point(false).as_bytes().to_vec()
        }
        KeyAlg::EcSecp384r1 => {
            use p384::elliptic_curve::sec1::ToEncodedPoint;
            let pk = p384::PublicKey::from_sec1_bytes(public)
                .map_err(|_| Error::Input("Invalid P-384 public key".to_string()))?;
            pk.to_encoded_point(false).as_bytes().to_vec()
        }
        KeyAlg::EcSecp256k1 => {
            use k256::elliptic_curve::sec1::ToEncodedPoint;
            let pk = k256::PublicKey::from_sec1_bytes(public)
                .map_err(|_| Error::Input("Invalid secp256k1 public key".to_string()))?;
            pk.to_encoded_point(false).as_bytes().to_vec()
        }
        _ => return Err(Error::Unexpected("Not an EC key".to_string())),
    };
    // SEC1 uncompressed form: 0x04 || x || y
    let coord_len = (uncompressed.len() - 1) / 2;
    Ok((
        uncompressed[1..1 + coord_len].to_vec(),
        uncompressed[1 + coord_len..].to_vec(),
    ))
}

impl LocalKey {
    /// Export the public key as a JWK.
    ///
    /// With an algorithm given, the key is converted first (for example
    /// exporting an Ed25519 key as its X25519 equivalent).
    ///
    /// # Errors
    /// - `Unsupported` for symmetric keys, which have no public form
    pub fn to_jwk_public(&self, alg: Option<KeyAlg>) -> Result<String> {
        if let Some(target) = alg {
            if target != self.algorithm() {
                return self.convert_key(target)?.to_jwk_public(None);
            }
        }
        let (kty, crv) = jwk_curve(self.algorithm()).ok_or_else(|| {
            Error::Unsupported(format!(
                "Key algorithm '{}' has no public JWK representation",
                self.algorithm()
            ))
        })?;
        let public = self.to_public_bytes()?;
        let mut jwk = Jwk {
            kty: kty.to_string(),
            crv: Some(crv.to_string()),
            ..Default::default()
        };
        if kty == "EC" {
            let (x, y) = ec_coordinates(self.algorithm(), &public)?;
            jwk.x = Some(URL_SAFE_NO_PAD.encode(x));
            jwk.y = Some(URL_SAFE_NO_PAD.encode(y));
        } else {
            jwk.x = Some(URL_SAFE_NO_PAD.encode(&public));
        }
        jwk.to_string()
    }

    /// Export the full key, including secret material, as a JWK.
    ///
    /// # Errors
    /// - `Input` if the key holds no secret material
    pub fn to_jwk_secret(&self) -> Result<String> {
        let secret = self.to_secret_bytes()?;
        match jwk_curve(self.algorithm()) {
            Some((kty, crv)) => {
                let public = self.to_public_bytes()?;
                let mut jwk = Jwk {
                    kty: kty.to_string(),
                    crv: Some(crv.to_string()),
                    d: Some(URL_SAFE_NO_PAD.encode(secret.as_bytes())),
                    ..Default::default()
                };
                if kty == "EC" {
                    let (x, y) = ec_coordinates(self.algorithm(), &public)?;
                    jwk.x = Some(URL_SAFE_NO_PAD.encode(x));
                    jwk.y = Some(URL_SAFE_NO_PAD.encode(y));
                } else {
                    jwk.x = Some(URL_SAFE_NO_PAD.encode(&public));
                }
                jwk.to_string()
            }
            None => {
                let jwk = Jwk {
                    kty: "oct".to_string(),
                    k: Some(URL_SAFE_NO_PAD.encode(secret.as_bytes())),
                    alg: Some(self.algorithm().to_string()),
                    ..Default::default()
                };
                jwk.to_string()
            }
        }
    }

    /// Import a key from its JWK encoding.
    ///
    /// A `d` member yields a full keypair; otherwise a public-only key.
    ///
    /// # Errors
    /// - `Input` on malformed JSON or key data
    /// - `Unsupported` for unknown key types or curves
    pub fn from_jwk(jwk: &str) -> Result<LocalKey> {
        let jwk = Jwk::from_str(jwk)?;
        match jwk.kty.as_str() {
            "oct" => {
                let k = jwk
                    .k
                    .as_deref()
                    .ok_or_else(|| Error::Input("JWK is missing required member 'k'".to_string()))?;
                let secret = URL_SAFE_NO_PAD
                    .decode(k)
                    .map_err(|_| Error::Input("Invalid JWK 'k' encoding".to_string()))?;
                // The `alg` member disambiguates symmetric key types of the
                // same length; without it, pick a default by length
                let alg = match jwk.alg.as_deref() {
                    Some(id) => KeyAlg::from_str(id)?,
                    None => match secret.len() {
                        16 => KeyAlg::Aes128Gcm,
                        32 => KeyAlg::Chacha20Xc20P,
                        _ => {
                            return Err(Error::Unsupported(
                                "Cannot infer algorithm for symmetric JWK".to_string(),
                            ))
                        }
                    },
                };
                LocalKey::from_secret_bytes(alg, &secret)
            }
            kty @ ("OKP" | "EC") => {
                let crv = jwk
                    .crv
                    .as_deref()
                    .ok_or_else(|| Error::Input("JWK is missing required member 'crv'".to_string()))?;
                let alg = alg_for_curve(kty, crv)?;
                if let Some(d) = jwk.d.as_deref() {
                    let secret = URL_SAFE_NO_PAD
                        .decode(d)
                        .map_err(|_| Error::Input("Invalid JWK 'd' encoding".to_string()))?;
                    return LocalKey::from_secret_bytes(alg, &secret);
                }
                let x = jwk
                    .x
                    .as_deref()
                    .ok_or_else(|| Error::Input("JWK is missing required member 'x'".to_string()))?;
                let x = URL_SAFE_NO_PAD
                    .decode(x)
                    .map_err(|_| Error::Input("Invalid JWK 'x' encoding".to_string()))?;
                if kty == "EC" {
                    let y = jwk.y.as_deref().ok_or_else(|| {
                        Error::Input("JWK is missing required member 'y'".to_string())
                    })?;
                    let y = URL_SAFE_NO_PAD
                        .decode(y)
                        .map_err(|_| Error::Input("Invalid JWK 'y' encoding".to_string()))?;
                    let mut sec1 = Vec::with_capacity(1 + x.len() + y.len());
                    sec1.push(0x04);
                    sec1.extend_from_slice(&x);
                    sec1.extend_from_slice(&y);
                    LocalKey::from_public_bytes(alg, &sec1)
                } else {
                    LocalKey::from_public_bytes(alg, &x)
                }
            }
            other => Err(Error::Unsupported(format!(
                "Unsupported JWK key type: {}",
                other
            ))),
        }
    }

    /// RFC 7638 thumbprint of the public JWK.
    pub fn to_jwk_thumbprint(&self, alg: Option<KeyAlg>) -> Result<String> {
        let jwk = self.to_jwk_public(alg)?;
        Jwk::from_str(&jwk)?.thumbprint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_jwk_roundtrip() {
        for alg in [
            KeyAlg::Ed25519,
            KeyAlg::X25519,
            KeyAlg::EcSecp256r1,
            KeyAlg::EcSecp256k1,
            KeyAlg::EcSecp384r1,
            KeyAlg::Bls12381G1,
            KeyAlg::Bls12381G2,
        ] {
            let key = LocalKey::generate(alg, false).unwrap();
            let jwk = key.to_jwk_public(None).unwrap();
            let restored = LocalKey::from_jwk(&jwk).unwrap();
            assert_eq!(restored.algorithm(), alg);
            assert!(!restored.has_secret());
            assert_eq!(
                restored.to_public_bytes().unwrap(),
                key.to_public_bytes().unwrap(),
                "{}",
                alg
            );
        }
    }

    #[test]
    fn test_secret_jwk_roundtrip() {
        for alg in [KeyAlg::Ed25519, KeyAlg::EcSecp256r1] {
            let key = LocalKey::generate(alg, false).unwrap();
            let jwk = key.to_jwk_secret().unwrap();
            let restored = LocalKey::from_jwk(&jwk).unwrap();
            assert!(restored.has_secret());
            assert_eq!(
                restored.to_secret_bytes().unwrap(),
                key.to_secret_bytes().unwrap()
            );
        }
    }

    #[test]
    fn test_symmetric_secret_jwk_preserves_algorithm() {
        for alg in [
            KeyAlg::Aes128Gcm,
            KeyAlg::Aes256Gcm,
            KeyAlg::Aes128Kw,
            KeyAlg::Aes256Kw,
            KeyAlg::Chacha20C20P,
            KeyAlg::Chacha20Xc20P,
        ] {
            let key = LocalKey::generate(alg, false).unwrap();
            let jwk = key.to_jwk_secret().unwrap();
            let restored = LocalKey::from_jwk(&jwk).unwrap();
            assert_eq!(restored.algorithm(), alg, "{}", alg);
            assert_eq!(
                restored.to_secret_bytes().unwrap(),
                key.to_secret_bytes().unwrap()
            );
        }
    }

    #[test]
    fn test_oct_jwk_without_alg_member_falls_back_on_length() {
        let key = LocalKey::generate(KeyAlg::Chacha20Xc20P, false).unwrap();
        let k = URL_SAFE_NO_PAD.encode(key.to_secret_bytes().unwrap().as_bytes());
        let jwk = format!(r#"{{"kty":"oct","k":"{}"}}"#, k);
        let restored = LocalKey::from_jwk(&jwk).unwrap();
        assert_eq!(restored.algorithm(), KeyAlg::Chacha20Xc20P);
    }

    #[test]
    fn test_symmetric_key_has_no_public_jwk() {
        let key = LocalKey::generate(KeyAlg::Aes256Gcm, false).unwrap();
        assert!(matches!(
            key.to_jwk_public(None),
            Err(Error::Unsupported(_))
        ));
        // Secret export uses the oct form
        let jwk = key.to_jwk_secret().unwrap();
        assert!(jwk.contains(r#""kty":"oct""#));
    }

    #[test]
    fn test_thumbprint_rfc7638_vector() {
        // Example key from RFC 8037 appendix A.3
        let jwk = r#"{"kty":"OKP","crv":"Ed25519","x":"11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"}"#;
        let key = LocalKey::from_jwk(jwk).unwrap();
        assert_eq!(
            key.to_jwk_thumbprint(None).unwrap(),
            "kPrK_qmxVWaYVA9wwBF6Iuo3vVzz7TxHCTwXBygrS4k"
        );
    }

    #[test]
    fn test_thumbprint_stable_across_exports() {
        let key = LocalKey::generate(KeyAlg::EcSecp256r1, false).unwrap();
        let public =
            LocalKey::from_public_bytes(KeyAlg::EcSecp256r1, &key.to_public_bytes().unwrap())
                .unwrap();
        assert_eq!(
            key.to_jwk_thumbprint(None).unwrap(),
            public.to_jwk_thumbprint(None).unwrap()
        );
    }

    #[test]
    fn test_converted_export() {
        let ed = LocalKey::generate(KeyAlg::Ed25519, false).unwrap();
        let jwk = ed.to_jwk_public(Some(KeyAlg::X25519)).unwrap();
        assert!(jwk.contains(r#""crv":"X25519""#));
    }

    #[test]
    fn test_malformed_jwk_rejected() {
        assert!(LocalKey::from_jwk("not json").is_err());
        assert!(LocalKey::from_jwk(r#"{"kty":"RSA"}"#).is_err());
        assert!(LocalKey::from_jwk(r#"{"kty":"OKP","crv":"Ed448","x":"AA"}"#).is_err());
    }
}
