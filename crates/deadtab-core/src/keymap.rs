use serde::{Deserialize, Serialize};

/// Opaque identifier for a physical key (an evdev scan code). Compared for
/// equality only; never interpreted beyond display-name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(pub u16);

pub const KEY_SPACE: KeyId = KeyId(57);
pub const KEY_ENTER: KeyId = KeyId(28);

/// (scan code, parse name, display name). Scan codes assume a QWERTY
/// physical layout, same caveat as any evdev-level tool.
const KEYS: &[(u16, &str, &str)] = &[
    (57, "space", "Space"),
    (28, "enter", "Enter"),
    (15, "tab", "Tab"),
    (1, "esc", "Escape"),
    (14, "backspace", "Backspace"),
    (111, "delete", "Delete"),
    (42, "left-shift", "Left Shift"),
    (54, "right-shift", "Right Shift"),
    (29, "left-ctrl", "Left Ctrl"),
    (97, "right-ctrl", "Right Ctrl"),
    (56, "left-alt", "Left Alt"),
    (100, "right-alt", "Right Alt"),
    (103, "up", "Arrow Up"),
    (108, "down", "Arrow Down"),
    (105, "left", "Arrow Left"),
    (106, "right", "Arrow Right"),
    (30, "a", "A"),
    (48, "b", "B"),
    (46, "c", "C"),
    (32, "d", "D"),
    (18, "e", "E"),
    (33, "f", "F"),
    (34, "g", "G"),
    (35, "h", "H"),
    (23, "i", "I"),
    (36, "j", "J"),
    (37, "k", "K"),
    (38, "l", "L"),
    (50, "m", "M"),
    (49, "n", "N"),
    (24, "o", "O"),
    (25, "p", "P"),
    (16, "q", "Q"),
    (19, "r", "R"),
    (31, "s", "S"),
    (20, "t", "T"),
    (22, "u", "U"),
    (47, "v", "V"),
    (17, "w", "W"),
    (45, "x", "X"),
    (21, "y", "Y"),
    (44, "z", "Z"),
];

/// Human-readable label for a key. Unknown codes fall back to the raw
/// identifier so the UI never shows nothing.
pub fn display_name(key: KeyId) -> String {
    KEYS.iter()
        .find(|(code, _, _)| *code == key.0)
        .map(|(_, _, display)| display.to_string())
        .unwrap_or_else(|| format!("key {}", key.0))
}

/// Parse a key name as typed on the command line. Case-insensitive.
pub fn parse_name(name: &str) -> Option<KeyId> {
    let lower = name.to_lowercase();
    KEYS.iter()
        .find(|(_, parse, _)| *parse == lower)
        .map(|(code, _, _)| KeyId(*code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keys_have_display_names() {
        assert_eq!(display_name(KEY_SPACE), "Space");
        assert_eq!(display_name(KEY_ENTER), "Enter");
        assert_eq!(display_name(KeyId(42)), "Left Shift");
        assert_eq!(display_name(KeyId(30)), "A");
    }

    #[test]
    fn unknown_key_falls_back_to_raw_code() {
        assert_eq!(display_name(KeyId(999)), "key 999");
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(parse_name("Space"), Some(KEY_SPACE));
        assert_eq!(parse_name("SPACE"), Some(KEY_SPACE));
        assert_eq!(parse_name("left-shift"), Some(KeyId(42)));
    }

    #[test]
    fn parse_rejects_unknown_names() {
        assert!(parse_name("hyperdrive").is_none());
    }

    #[test]
    fn parse_inverts_display_for_letters() {
        for letter in ["a", "m", "z"] {
            let key = parse_name(letter).unwrap();
            assert_eq!(display_name(key), letter.to_uppercase());
        }
    }

    #[test]
    fn key_id_serializes_as_bare_number() {
        let json = serde_json::to_string(&KEY_SPACE).unwrap();
        assert_eq!(json, "57");
        let back: KeyId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, KEY_SPACE);
    }
}
