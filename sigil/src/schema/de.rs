// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::key::Key;
use serde::{de::Error as _, Deserializer};
use std::collections::HashMap;
use std::fmt;

/// Deserializes a key map, failing on duplicate key IDs.
///
/// `serde` silently keeps the last entry when a JSON object repeats a key; in
/// trust data a repeated key ID is an attack surface, not a formatting quirk.
pub(super) fn deserialize_keys<'de, D>(
    deserializer: D,
) -> Result<HashMap<Decoded<Hex>, Key>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;

    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = HashMap<Decoded<Hex>, Key>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a map of key IDs to keys")
        }

        fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
        where
            M: serde::de::MapAccess<'de>,
        {
            let mut map = HashMap::new();
            while let Some((keyid, key)) = access.next_entry::<Decoded<Hex>, Key>()? {
                let keyid_hex = hex::encode(&keyid);
                if map.insert(keyid, key).is_some() {
                    return Err(M::Error::custom(format!("duplicate key ID {keyid_hex}")));
                }
            }
            Ok(map)
        }
    }

    deserializer.deserialize_map(Visitor)
}
