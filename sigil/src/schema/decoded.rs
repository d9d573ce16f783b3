// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides [`Decoded`], a wrapper around `Vec<u8>` that remembers the string
//! encoding it was deserialized from. Notary trust data mixes hex (key and
//! signature IDs) with base64 (public keys, signatures, hashes); keeping the
//! original string around means re-serialization is byte-faithful.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;

/// A string encoding scheme for byte data.
pub trait Encode {
    /// Encode bytes into a string.
    fn encode(b: &[u8]) -> String;
}

/// A string decoding scheme for byte data.
pub trait Decode {
    /// Decode a string into bytes.
    fn decode(s: &str) -> Result<Vec<u8>, String>;
}

/// Lowercase hexadecimal encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hex;

impl Encode for Hex {
    fn encode(b: &[u8]) -> String {
        hex::encode(b)
    }
}

impl Decode for Hex {
    fn decode(s: &str) -> Result<Vec<u8>, String> {
        hex::decode(s).map_err(|err| err.to_string())
    }
}

/// Standard base64 encoding with padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Base64;

impl Encode for Base64 {
    fn encode(b: &[u8]) -> String {
        STANDARD.encode(b)
    }
}

impl Decode for Base64 {
    fn decode(s: &str) -> Result<Vec<u8>, String> {
        STANDARD.decode(s).map_err(|err| err.to_string())
    }
}

/// Byte data that was deserialized from a string with encoding `E`.
///
/// Equality, ordering and hashing are all defined over the decoded bytes, so
/// two `Decoded` values compare equal regardless of, say, base64 padding
/// differences in their source strings.
pub struct Decoded<E> {
    bytes: Vec<u8>,
    original: String,
    spooky: PhantomData<E>,
}

impl<E: Encode> From<Vec<u8>> for Decoded<E> {
    fn from(bytes: Vec<u8>) -> Self {
        let original = E::encode(&bytes);
        Self {
            bytes,
            original,
            spooky: PhantomData,
        }
    }
}

impl<E: Decode> Decoded<E> {
    /// Decode a string into a `Decoded` value.
    pub fn parse(original: &str) -> Result<Self, String> {
        Ok(Self {
            bytes: E::decode(original)?,
            original: original.to_owned(),
            spooky: PhantomData,
        })
    }
}

impl<E> Decoded<E> {
    /// The decoded bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The string this value was decoded from.
    pub fn original(&self) -> &str {
        &self.original
    }
}

impl<E> Clone for Decoded<E> {
    fn clone(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
            original: self.original.clone(),
            spooky: PhantomData,
        }
    }
}

impl<E> fmt::Debug for Decoded<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.original, f)
    }
}

impl<E> fmt::Display for Decoded<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.original, f)
    }
}

impl<E> Deref for Decoded<E> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<E> AsRef<[u8]> for Decoded<E> {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<E> PartialEq for Decoded<E> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl<E> Eq for Decoded<E> {}

impl<E> PartialOrd for Decoded<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Decoded<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl<E> Hash for Decoded<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl<'de, E: Decode> Deserialize<'de> for Decoded<E> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let original = String::deserialize(deserializer)?;
        Ok(Self {
            bytes: E::decode(&original).map_err(serde::de::Error::custom)?,
            original,
            spooky: PhantomData,
        })
    }
}

impl<E> Serialize for Decoded<E> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.original)
    }
}
