//! Key name resolution
//!
//! Config files and the control socket refer to keys by name. Friendly aliases
//! (`Escape`, `Numpad1`, `;`) are resolved first; anything else falls back to
//! the kernel names evdev knows (`KEY_KP1`, `KP1`, `BTN_LEFT`). Codes evdev has
//! no name for are written `code:<n>`.

use std::str::FromStr;

use evdev::Key;

/// Highest valid key code (`KEY_MAX` in linux/input-event-codes.h)
pub const KEY_MAX: u16 = 0x2ff;

const ALIASES: &[(&str, Key)] = &[
    ("CAPSLOCK", Key::KEY_CAPSLOCK),
    ("CAPS_LOCK", Key::KEY_CAPSLOCK),
    ("CAPS", Key::KEY_CAPSLOCK),
    ("ESCAPE", Key::KEY_ESC),
    ("ESC", Key::KEY_ESC),
    ("ENTER", Key::KEY_ENTER),
    ("RETURN", Key::KEY_ENTER),
    ("TAB", Key::KEY_TAB),
    ("SPACE", Key::KEY_SPACE),
    ("BACKSPACE", Key::KEY_BACKSPACE),
    // Modifiers
    ("LCTRL", Key::KEY_LEFTCTRL),
    ("CTRL", Key::KEY_LEFTCTRL),
    ("RCTRL", Key::KEY_RIGHTCTRL),
    ("LSHIFT", Key::KEY_LEFTSHIFT),
    ("SHIFT", Key::KEY_LEFTSHIFT),
    ("RSHIFT", Key::KEY_RIGHTSHIFT),
    ("LALT", Key::KEY_LEFTALT),
    ("ALT", Key::KEY_LEFTALT),
    ("RALT", Key::KEY_RIGHTALT),
    ("LMETA", Key::KEY_LEFTMETA),
    ("SUPER", Key::KEY_LEFTMETA),
    ("META", Key::KEY_LEFTMETA),
    ("RMETA", Key::KEY_RIGHTMETA),
    // Symbols
    ("-", Key::KEY_MINUS),
    ("EQUALS", Key::KEY_EQUAL),
    ("=", Key::KEY_EQUAL),
    ("LBRACE", Key::KEY_LEFTBRACE),
    ("[", Key::KEY_LEFTBRACE),
    ("RBRACE", Key::KEY_RIGHTBRACE),
    ("]", Key::KEY_RIGHTBRACE),
    (";", Key::KEY_SEMICOLON),
    ("'", Key::KEY_APOSTROPHE),
    ("`", Key::KEY_GRAVE),
    ("\\", Key::KEY_BACKSLASH),
    (",", Key::KEY_COMMA),
    ("PERIOD", Key::KEY_DOT),
    (".", Key::KEY_DOT),
    ("/", Key::KEY_SLASH),
    // Arrows and navigation
    ("UPARROW", Key::KEY_UP),
    ("DOWNARROW", Key::KEY_DOWN),
    ("LEFTARROW", Key::KEY_LEFT),
    ("RIGHTARROW", Key::KEY_RIGHT),
    ("PGUP", Key::KEY_PAGEUP),
    ("PGDN", Key::KEY_PAGEDOWN),
    ("PGDOWN", Key::KEY_PAGEDOWN),
    ("INS", Key::KEY_INSERT),
    ("DEL", Key::KEY_DELETE),
    // Keypad
    ("NUMPAD0", Key::KEY_KP0),
    ("NUMPAD1", Key::KEY_KP1),
    ("NUMPAD2", Key::KEY_KP2),
    ("NUMPAD3", Key::KEY_KP3),
    ("NUMPAD4", Key::KEY_KP4),
    ("NUMPAD5", Key::KEY_KP5),
    ("NUMPAD6", Key::KEY_KP6),
    ("NUMPAD7", Key::KEY_KP7),
    ("NUMPAD8", Key::KEY_KP8),
    ("NUMPAD9", Key::KEY_KP9),
    ("KPDECIMAL", Key::KEY_KPDOT),
    ("NUMPAD_DOT", Key::KEY_KPDOT),
    ("NUMPAD_ENTER", Key::KEY_KPENTER),
    ("KPADD", Key::KEY_KPPLUS),
    ("NUMPAD_PLUS", Key::KEY_KPPLUS),
    ("KPSUBTRACT", Key::KEY_KPMINUS),
    ("NUMPAD_MINUS", Key::KEY_KPMINUS),
    ("KPMULTIPLY", Key::KEY_KPASTERISK),
    ("NUMPAD_MULTIPLY", Key::KEY_KPASTERISK),
    ("KPSTAR", Key::KEY_KPASTERISK),
    ("KPDIVIDE", Key::KEY_KPSLASH),
    ("NUMPAD_DIVIDE", Key::KEY_KPSLASH),
    ("NUM_LOCK", Key::KEY_NUMLOCK),
    // Phone keys
    ("CALL", Key::KEY_SEND),
    ("HANGUP", Key::KEY_END),
];

/// Resolve a key name (case-insensitive) to an evdev key.
pub fn parse_key(name: &str) -> Option<Key> {
    let upper = name.trim().to_uppercase();
    if upper.is_empty() {
        return None;
    }

    if let Some((_, key)) = ALIASES.iter().find(|(alias, _)| *alias == upper) {
        return Some(*key);
    }

    if let Some(code) = upper.strip_prefix("CODE:") {
        return code
            .parse::<u16>()
            .ok()
            .filter(|c| *c != 0 && *c <= KEY_MAX)
            .map(Key::new);
    }

    if upper.starts_with("KEY_") || upper.starts_with("BTN_") {
        return Key::from_str(&upper).ok();
    }

    Key::from_str(&format!("KEY_{}", upper)).ok()
}

/// Whether `name` resolves to a key
pub fn is_valid_key(name: &str) -> bool {
    parse_key(name).is_some()
}

/// Canonical name of a key: the kernel name without its `KEY_` prefix.
///
/// The result always parses back to the same key with [`parse_key`].
pub fn key_name(key: Key) -> String {
    let debug = format!("{:?}", key);
    if let Some(stripped) = debug.strip_prefix("KEY_") {
        stripped.to_string()
    } else if debug.starts_with("BTN_") {
        debug
    } else {
        format!("code:{}", key.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_basic() {
        assert_eq!(parse_key("CapsLock"), Some(Key::KEY_CAPSLOCK));
        assert_eq!(parse_key("Escape"), Some(Key::KEY_ESC));
        assert_eq!(parse_key("q"), Some(Key::KEY_Q));
        assert_eq!(parse_key("Space"), Some(Key::KEY_SPACE));
    }

    #[test]
    fn test_parse_key_keypad() {
        assert_eq!(parse_key("KP1"), Some(Key::KEY_KP1));
        assert_eq!(parse_key("Numpad0"), Some(Key::KEY_KP0));
        assert_eq!(parse_key("KPMultiply"), Some(Key::KEY_KPASTERISK));
        assert_eq!(parse_key("KPPLUS"), Some(Key::KEY_KPPLUS));
    }

    #[test]
    fn test_parse_key_symbols() {
        assert_eq!(parse_key(";"), Some(Key::KEY_SEMICOLON));
        assert_eq!(parse_key("\\"), Some(Key::KEY_BACKSLASH));
        assert_eq!(parse_key("minus"), Some(Key::KEY_MINUS));
    }

    #[test]
    fn test_parse_key_raw_evdev_format() {
        assert_eq!(parse_key("KEY_KP5"), Some(Key::KEY_KP5));
        assert_eq!(parse_key("key_up"), Some(Key::KEY_UP));
        assert_eq!(parse_key("BTN_LEFT"), Some(Key::BTN_LEFT));
    }

    #[test]
    fn test_parse_key_numeric_code() {
        assert_eq!(parse_key("code:79"), Some(Key::KEY_KP1));
        assert_eq!(parse_key("code:0"), None);
        assert_eq!(parse_key("code:4096"), None);
        assert_eq!(parse_key("code:abc"), None);
    }

    #[test]
    fn test_parse_key_unknown() {
        assert_eq!(parse_key(""), None);
        assert_eq!(parse_key("NotAKey"), None);
        assert_eq!(parse_key("KEY_NOTAKEY123"), None);
        assert!(!is_valid_key("Hyper7"));
    }

    #[test]
    fn test_key_name_strips_prefix() {
        assert_eq!(key_name(Key::KEY_KP1), "KP1");
        assert_eq!(key_name(Key::KEY_BACKSPACE), "BACKSPACE");
        assert_eq!(key_name(Key::BTN_LEFT), "BTN_LEFT");
    }

    #[test]
    fn test_key_name_parses_back() {
        for key in [
            Key::KEY_Q,
            Key::KEY_1,
            Key::KEY_KPASTERISK,
            Key::KEY_SEMICOLON,
            Key::KEY_102ND,
            Key::BTN_LEFT,
        ] {
            assert_eq!(parse_key(&key_name(key)), Some(key), "{:?}", key);
        }
    }
}
