use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use rand::RngCore;
use serde::{Deserialize, Serialize};

static ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generate a 24-hex-char identity token: 4-byte unix timestamp, 5 random
/// bytes, 3-byte rolling counter. Lexicographic order roughly follows
/// creation time within one process.
fn generate_hex24() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;

    let mut tail = [0u8; 5];
    rand::thread_rng().fill_bytes(&mut tail);
    let count = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

    format!(
        "{secs:08x}{:02x}{:02x}{:02x}{:02x}{:02x}{count:06x}",
        tail[0], tail[1], tail[2], tail[3], tail[4]
    )
}

/// True if `s` is a well-formed identity token (24 hex chars).
pub fn valid_hex24(s: &str) -> bool {
    s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

macro_rules! branded_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(generate_hex24())
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Format check for externally supplied tokens.
            pub fn is_valid(s: &str) -> bool {
                valid_hex24(s)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(UserId);
branded_id!(MessageId);
branded_id!(NotificationId);
branded_id!(TodoId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_24_hex_chars() {
        let id = UserId::new();
        assert_eq!(id.as_str().len(), 24, "got: {id}");
        assert!(id.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_validate() {
        let id = MessageId::new();
        assert!(MessageId::is_valid(id.as_str()));
    }

    #[test]
    fn ids_are_unique() {
        let a = UserId::new();
        let b = UserId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn invalid_formats_rejected() {
        assert!(!UserId::is_valid("not-an-id"));
        assert!(!UserId::is_valid(""));
        assert!(!UserId::is_valid("aaaaaaaaaaaaaaaaaaaaaaa")); // 23 chars
        assert!(!UserId::is_valid("aaaaaaaaaaaaaaaaaaaaaaaaa")); // 25 chars
        assert!(!UserId::is_valid("zzzzzzzzzzzzzzzzzzzzzzzz")); // not hex
    }

    #[test]
    fn uppercase_hex_accepted() {
        assert!(UserId::is_valid("AAAAAAAAAAAAAAAAAAAAAAAA"));
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = NotificationId::new();
        let s = id.to_string();
        let parsed: NotificationId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serde_roundtrip_is_transparent() {
        let id = TodoId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: TodoId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = UserId::from_raw("aaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(id.as_str(), "aaaaaaaaaaaaaaaaaaaaaaaa");
    }
}
