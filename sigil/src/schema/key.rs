// SPDX-License-Identifier: MIT OR Apache-2.0

//! Public keys as they appear in notary trust data and in validator
//! configuration, and signature verification over canonical JSON.

use crate::error::{self, Result};
use crate::schema::decoded::{Base64, Decoded};
use aws_lc_rs::signature::{self, UnparsedPublicKey};
use pkcs8::der::Decode as _;
use pkcs8::{ObjectIdentifier, SubjectPublicKeyInfoRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::OptionExt;
use std::fmt;

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");
const OID_RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// A public key, tagged with the algorithm family notary records in the
/// `keytype` field. The key material itself is a base64-encoded DER
/// `SubjectPublicKeyInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "keytype")]
pub enum Key {
    /// An ECDSA key on the NIST P-256 curve.
    #[serde(rename = "ecdsa")]
    Ecdsa {
        /// The public key.
        keyval: KeyValue,
    },
    /// An Ed25519 key.
    #[serde(rename = "ed25519")]
    Ed25519 {
        /// The public key.
        keyval: KeyValue,
    },
    /// An RSA key used with the RSASSA-PSS scheme.
    #[serde(rename = "rsa")]
    Rsa {
        /// The public key.
        keyval: KeyValue,
    },
}

/// The key material carried by a [`Key`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeyValue {
    /// Base64-encoded DER `SubjectPublicKeyInfo`.
    pub public: Decoded<Base64>,
}

/// The signing method named by a signature in trust data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureMethod {
    /// ECDSA over P-256 with SHA-256, fixed-width `r || s` signatures.
    Ecdsa,
    /// Ed25519.
    Ed25519,
    /// RSASSA-PSS with SHA-256.
    RsaPss,
    /// A method this implementation does not know. Signatures using it never
    /// verify, but their presence is not a schema error.
    Unknown(String),
}

impl SignatureMethod {
    fn as_str(&self) -> &str {
        match self {
            SignatureMethod::Ecdsa => "ecdsa",
            SignatureMethod::Ed25519 => "ed25519",
            SignatureMethod::RsaPss => "rsapss",
            SignatureMethod::Unknown(other) => other,
        }
    }
}

impl fmt::Display for SignatureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SignatureMethod {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "ecdsa" => SignatureMethod::Ecdsa,
            "ed25519" => SignatureMethod::Ed25519,
            "rsapss" => SignatureMethod::RsaPss,
            _ => SignatureMethod::Unknown(s),
        })
    }
}

impl Serialize for SignatureMethod {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl Key {
    /// Builds a `Key` from DER-encoded `SubjectPublicKeyInfo` bytes, inferring
    /// the algorithm family from the SPKI algorithm identifier.
    pub fn from_spki_der(der: &[u8]) -> Result<Self> {
        let spki = SubjectPublicKeyInfoRef::from_der(der).map_err(|err| {
            error::UnsupportedKeySnafu {
                reason: err.to_string(),
            }
            .build()
        })?;
        let keyval = KeyValue {
            public: Decoded::from(der.to_vec()),
        };
        let oid = spki.algorithm.oid;
        if oid == OID_EC_PUBLIC_KEY {
            Ok(Key::Ecdsa { keyval })
        } else if oid == OID_ED25519 {
            Ok(Key::Ed25519 { keyval })
        } else if oid == OID_RSA_ENCRYPTION {
            Ok(Key::Rsa { keyval })
        } else {
            error::UnsupportedKeySnafu {
                reason: format!("unrecognized key algorithm {oid}"),
            }
            .fail()
        }
    }

    /// Builds a `Key` from a configuration string: either a PEM `PUBLIC KEY`
    /// block or bare base64 DER with whitespace allowed anywhere.
    pub fn from_config(value: &str) -> Result<Self> {
        let der = if value.contains("-----BEGIN") {
            let block = pem::parse(value).map_err(|err| {
                error::UnsupportedKeySnafu {
                    reason: err.to_string(),
                }
                .build()
            })?;
            block.contents().to_vec()
        } else {
            let compact: String = value.split_whitespace().collect();
            Decoded::<Base64>::parse(&compact)
                .map_err(|reason| error::UnsupportedKeySnafu { reason }.build())?
                .bytes()
                .to_vec()
        };
        Self::from_spki_der(&der)
    }

    /// The DER `SubjectPublicKeyInfo` bytes.
    pub fn spki_der(&self) -> &[u8] {
        match self {
            Key::Ecdsa { keyval } | Key::Ed25519 { keyval } | Key::Rsa { keyval } => {
                keyval.public.bytes()
            }
        }
    }

    /// The key rendered as a PEM `PUBLIC KEY` block (the form the cosign
    /// subprocess expects on stdin).
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new("PUBLIC KEY", self.spki_der().to_vec()))
    }

    /// Extracts the raw `subjectPublicKey` bit string from the SPKI wrapper.
    /// For EC keys this is the uncompressed curve point, for Ed25519 the raw
    /// 32-byte key, and for RSA the PKCS#1 `RSAPublicKey` structure.
    fn raw_public_key(&self) -> Result<&[u8]> {
        let spki = SubjectPublicKeyInfoRef::from_der(self.spki_der()).map_err(|err| {
            error::UnsupportedKeySnafu {
                reason: err.to_string(),
            }
            .build()
        })?;
        spki.subject_public_key
            .as_bytes()
            .context(error::UnsupportedKeySnafu {
                reason: "public key bit string has unused bits".to_string(),
            })
    }

    /// Verifies `sig` over `msg` with this key, using the named method.
    ///
    /// Returns `false` for a bad signature, for a method that does not match
    /// the key's algorithm family, and for key material that cannot be
    /// decoded; the threshold check treats all three the same.
    pub fn verify(&self, method: &SignatureMethod, msg: &[u8], sig: &[u8]) -> bool {
        let Ok(raw) = self.raw_public_key() else {
            return false;
        };
        let algorithm: &'static dyn signature::VerificationAlgorithm = match (self, method) {
            (Key::Ecdsa { .. }, SignatureMethod::Ecdsa) => &signature::ECDSA_P256_SHA256_FIXED,
            (Key::Ed25519 { .. }, SignatureMethod::Ed25519) => &signature::ED25519,
            (Key::Rsa { .. }, SignatureMethod::RsaPss) => &signature::RSA_PSS_2048_8192_SHA256,
            _ => return false,
        };
        UnparsedPublicKey::new(algorithm, raw).verify(msg, sig).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_lc_rs::rand::SystemRandom;
    use aws_lc_rs::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};

    /// DER prefix for a P-256 `SubjectPublicKeyInfo` wrapping a 65-byte
    /// uncompressed point.
    const P256_SPKI_PREFIX: &[u8] = &hex_literal::hex!(
        "3059301306072a8648ce3d020106082a8648ce3d030107034200"
    );

    fn generated_key() -> (EcdsaKeyPair, Key) {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .expect("generate key");
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, document.as_ref())
            .expect("load key");
        let mut spki = P256_SPKI_PREFIX.to_vec();
        spki.extend_from_slice(pair.public_key().as_ref());
        let key = Key::from_spki_der(&spki).expect("spki");
        (pair, key)
    }

    #[test]
    fn spki_algorithm_detection() {
        let (_, key) = generated_key();
        assert!(matches!(key, Key::Ecdsa { .. }));
    }

    #[test]
    fn verifies_own_signature() {
        let (pair, key) = generated_key();
        let rng = SystemRandom::new();
        let msg = b"canonical bytes";
        let sig = pair.sign(&rng, msg).expect("sign");
        assert!(key.verify(&SignatureMethod::Ecdsa, msg, sig.as_ref()));
        assert!(!key.verify(&SignatureMethod::Ecdsa, b"other bytes", sig.as_ref()));
        assert!(!key.verify(&SignatureMethod::Ed25519, msg, sig.as_ref()));
    }

    #[test]
    fn config_key_accepts_pem_and_bare_base64() {
        let (_, key) = generated_key();
        let pem_form = key.to_pem();
        assert_eq!(Key::from_config(&pem_form).unwrap(), key);

        let bare = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            key.spki_der(),
        );
        // Configuration files routinely wrap long keys across lines.
        let wrapped = format!("{}\n{}", &bare[..20], &bare[20..]);
        assert_eq!(Key::from_config(&wrapped).unwrap(), key);
    }

    #[test]
    fn unknown_method_is_preserved() {
        let method: SignatureMethod = serde_json::from_str("\"sm2\"").unwrap();
        assert_eq!(method, SignatureMethod::Unknown("sm2".to_string()));
        assert_eq!(serde_json::to_string(&method).unwrap(), "\"sm2\"");
    }
}
