use std::fmt;
use std::str::FromStr;

/// A 20-byte BLAKE3 digest, the cache's fundamental content/key identity.
///
/// Canonical textual form is lowercase base16 of length 40. Subdirectory
/// sharding in the local store and in remote key encoding both use the
/// first two hex digits of this representation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; Digest::SIZE]);

impl Digest {
    pub const SIZE: usize = 20;

    pub const fn from_bytes(bytes: [u8; Digest::SIZE]) -> Self {
        Digest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Digest::SIZE] {
        &self.0
    }

    /// First two hex digits, used as the level-1 shard name.
    pub fn shard_prefix(&self) -> (char, char) {
        let hex = self.to_hex();
        let mut chars = hex.chars();
        (chars.next().unwrap(), chars.next().unwrap())
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(Self::SIZE * 2);
        for b in &self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DigestParseError {
    #[error("digest must be exactly 40 hex characters, got {0}")]
    WrongLength(usize),
    #[error("digest contains non-hex characters")]
    NotHex,
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::SIZE * 2 {
            return Err(DigestParseError::WrongLength(s.len()));
        }
        let mut bytes = [0u8; Self::SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let hi = s.as_bytes()[i * 2];
            let lo = s.as_bytes()[i * 2 + 1];
            let hi = (hi as char).to_digit(16).ok_or(DigestParseError::NotHex)?;
            let lo = (lo as char).to_digit(16).ok_or(DigestParseError::NotHex)?;
            *byte = ((hi << 4) | lo) as u8;
        }
        Ok(Digest(bytes))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;
        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = Digest;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} raw digest bytes", Digest::SIZE)
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Digest, E> {
                let bytes: [u8; Digest::SIZE] = v
                    .try_into()
                    .map_err(|_| E::invalid_length(v.len(), &self))?;
                Ok(Digest::from_bytes(bytes))
            }
        }
        deserializer.deserialize_bytes(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        let d = Digest::from_bytes([0xabu8; 20]);
        let hex = d.to_hex();
        assert_eq!(hex.len(), 40);
        let parsed: Digest = hex.parse().unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn shard_prefix_is_first_two_hex_chars() {
        let mut bytes = [0u8; 20];
        bytes[0] = 0x0f;
        let d = Digest::from_bytes(bytes);
        assert_eq!(d.shard_prefix(), ('0', 'f'));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            "abc".parse::<Digest>(),
            Err(DigestParseError::WrongLength(3))
        ));
    }

    #[test]
    fn rejects_non_hex() {
        let bad = "z".repeat(40);
        assert!(matches!(bad.parse::<Digest>(), Err(DigestParseError::NotHex)));
    }
}
