use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond epoch timestamp
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A 64-char lowercase hex string (account address or hash)
pub fn is_hex_64(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Serde adapter: `BigUint` as a decimal string. Balances, amounts and gas
/// may exceed 2^53 and must survive JSON round-trips bit-exactly.
pub mod dec_str {
    use num_bigint::BigUint;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(|_| de::Error::custom(format!("not a decimal integer: {raw}")))
    }
}

/// Serde adapter: optional `BigUint` as a decimal string
pub mod dec_str_opt {
    use num_bigint::BigUint;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<BigUint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_str_radix(10)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<BigUint>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| de::Error::custom(format!("not a decimal integer: {raw}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wei {
        #[serde(with = "dec_str")]
        value: BigUint,
    }

    #[test]
    fn biguint_serializes_as_decimal_string() {
        let wei = Wei {
            value: "123456789012345678901234567890".parse().unwrap(),
        };
        let json = serde_json::to_string(&wei).unwrap();
        assert_eq!(json, r#"{"value":"123456789012345678901234567890"}"#);

        let back: Wei = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, wei.value);
    }

    #[test]
    fn hex_64_predicate() {
        assert!(is_hex_64(&"a".repeat(64)));
        assert!(!is_hex_64(&"A".repeat(64)));
        assert!(!is_hex_64("abc"));
        assert!(!is_hex_64(&"g".repeat(64)));
    }
}
