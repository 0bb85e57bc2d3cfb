//! Key identity
//!
//! [`KeyCode`] is the engine's opaque key identifier: a Linux input key code.
//! Physical (source) keys and the keypad keys they are turned into (targets)
//! share the type. Names are only used at the edges (config, control socket).

use std::fmt;

use evdev::Key;
use keypad_mapper_config::keys::{self, KEY_MAX};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyCode(u16);

impl KeyCode {
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    pub const fn code(self) -> u16 {
        self.0
    }

    /// `KEY_RESERVED` (0) and anything above `KEY_MAX` are not keys.
    pub fn is_valid(self) -> bool {
        self.0 != 0 && self.0 <= KEY_MAX
    }

    /// Reject malformed identities before they reach the mapping table.
    pub fn validate(self) -> Result<Self, EngineError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(EngineError::InvalidKey(self.0))
        }
    }

    /// Resolve a key by name (`Q`, `KP1`, `Escape`, `KEY_KPENTER`).
    pub fn parse(name: &str) -> Result<Self, EngineError> {
        keys::parse_key(name)
            .map(Self::from)
            .ok_or_else(|| EngineError::UnknownKeyName(name.to_string()))
    }

    /// Canonical name; parses back with [`KeyCode::parse`].
    pub fn name(self) -> String {
        keys::key_name(self.into())
    }
}

impl From<Key> for KeyCode {
    fn from(key: Key) -> Self {
        Self(key.code())
    }
}

impl From<KeyCode> for Key {
    fn from(code: KeyCode) -> Self {
        Key::new(code.0)
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl fmt::Debug for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyCode({}:{})", self.0, self.name())
    }
}

impl Serialize for KeyCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for KeyCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        KeyCode::parse(&name).map_err(serde::de::Error::custom)
    }
}

/// Normalized modifier key.
///
/// Left and right variants are combined; capture mode ignores both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modifier {
    Ctrl,
    Shift,
    Alt,
    Super,
}

impl Modifier {
    /// Check if a key is a modifier and return its normalized form.
    pub fn from_key(key: KeyCode) -> Option<Self> {
        match Key::from(key) {
            Key::KEY_LEFTCTRL | Key::KEY_RIGHTCTRL => Some(Modifier::Ctrl),
            Key::KEY_LEFTSHIFT | Key::KEY_RIGHTSHIFT => Some(Modifier::Shift),
            Key::KEY_LEFTALT | Key::KEY_RIGHTALT => Some(Modifier::Alt),
            Key::KEY_LEFTMETA | Key::KEY_RIGHTMETA => Some(Modifier::Super),
            _ => None,
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modifier::Ctrl => write!(f, "Ctrl"),
            Modifier::Shift => write!(f, "Shift"),
            Modifier::Alt => write!(f, "Alt"),
            Modifier::Super => write!(f, "Super"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_name() {
        let kp1 = KeyCode::parse("Numpad1").unwrap();
        assert_eq!(kp1, KeyCode::from(Key::KEY_KP1));
        assert_eq!(kp1.name(), "KP1");
        assert_eq!(kp1.to_string(), "KP1");
    }

    #[test]
    fn test_parse_unknown_name() {
        match KeyCode::parse("NoSuchKey") {
            Err(EngineError::UnknownKeyName(name)) => assert_eq!(name, "NoSuchKey"),
            other => panic!("Expected UnknownKeyName, got: {:?}", other),
        }
    }

    #[test]
    fn test_validity() {
        assert!(KeyCode::from(Key::KEY_Q).is_valid());
        assert!(!KeyCode::new(0).is_valid());
        assert!(!KeyCode::new(KEY_MAX + 1).is_valid());
        assert!(matches!(
            KeyCode::new(0).validate(),
            Err(EngineError::InvalidKey(0))
        ));
    }

    #[test]
    fn test_ordering_follows_code() {
        assert!(KeyCode::new(16) < KeyCode::new(17));
    }

    #[test]
    fn test_serde_uses_names() {
        let json = serde_json::to_string(&KeyCode::from(Key::KEY_SPACE)).unwrap();
        assert_eq!(json, r#""SPACE""#);

        let parsed: KeyCode = serde_json::from_str(r#""kp9""#).unwrap();
        assert_eq!(parsed, KeyCode::from(Key::KEY_KP9));

        assert!(serde_json::from_str::<KeyCode>(r#""Bogus""#).is_err());
    }

    #[test]
    fn test_modifier_from_key() {
        assert_eq!(
            Modifier::from_key(Key::KEY_RIGHTCTRL.into()),
            Some(Modifier::Ctrl)
        );
        assert_eq!(
            Modifier::from_key(Key::KEY_LEFTSHIFT.into()),
            Some(Modifier::Shift)
        );
        assert_eq!(
            Modifier::from_key(Key::KEY_RIGHTALT.into()),
            Some(Modifier::Alt)
        );
        assert_eq!(
            Modifier::from_key(Key::KEY_LEFTMETA.into()),
            Some(Modifier::Super)
        );
        assert_eq!(Modifier::from_key(Key::KEY_Q.into()), None);
    }
}
