use serde::{Deserialize, Serialize};

use crate::status::StatusCode;

/// One decoded line of the status channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub code: StatusCode,
    /// Keyword exactly as it appeared on the wire (kept for unknown codes).
    pub keyword: String,
    /// Rest of the line after the keyword, still percent-escaped.
    pub payload: String,
    /// The whole line without its terminator.
    pub raw: String,
}

impl StatusEvent {
    /// True when this event must be answered on the command channel
    /// before the status stream advances.
    pub fn needs_response(&self) -> bool {
        self.code.is_interactive()
    }
}

/// Decoded `USERID_HINT <keyid> <userid>` payload; gpg sends it ahead of
/// passphrase requests so a prompt can say which key it is for.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserIdHint {
    pub key_id: String,
    pub user_id: String,
}

impl UserIdHint {
    pub fn parse(payload: &str) -> Option<Self> {
        let payload = payload.trim();
        let mut parts = payload.splitn(2, ' ');
        let key_id = parts.next().filter(|s| !s.is_empty())?;
        let user_id = parts.next().unwrap_or("").trim();
        Some(UserIdHint {
            key_id: key_id.to_string(),
            user_id: unescape(user_id),
        })
    }
}

/// Decoded `NEED_PASSPHRASE <mainkeyid> <keyid> [keytype] [keylength]`.
/// The trailing algorithm/length fields are optional on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NeedPassphrase {
    pub main_key_id: String,
    pub key_id: String,
    pub key_type: Option<u32>,
    pub key_length: Option<u32>,
}

impl NeedPassphrase {
    pub fn parse(payload: &str) -> Option<Self> {
        let mut parts = payload.split_whitespace();
        let main_key_id = parts.next()?.to_string();
        let key_id = parts.next().unwrap_or(&main_key_id).to_string();
        let key_type = parts.next().and_then(|s| s.parse().ok());
        let key_length = parts.next().and_then(|s| s.parse().ok());
        Some(NeedPassphrase {
            main_key_id,
            key_id,
            key_type,
            key_length,
        })
    }
}

/// Extracts the gpg error code from an `ERROR`/`FAILURE` payload
/// (`<location> <code>`), masked to the code part per libgpg-error.
pub fn error_code_from_payload(payload: &str) -> Option<u32> {
    let raw: u32 = payload.split_whitespace().last()?.parse().ok()?;
    Some(raw & 0xffff)
}

/// Undoes gpg's `%XX` escaping of status payloads. Malformed escapes are
/// passed through untouched.
pub fn unescape(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(hex) = bytes.get(i + 1..i + 3)
            && let Ok(s) = std::str::from_utf8(hex)
            && let Ok(v) = u8::from_str_radix(s, 16)
        {
            out.push(v);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Escapes a command-channel reply so it stays a single protocol line:
/// `%`, CR and LF become `%25`, `%0D`, `%0A`.
pub fn escape_reply(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        match b {
            b'%' => out.extend_from_slice(b"%25"),
            b'\n' => out.extend_from_slice(b"%0A"),
            b'\r' => out.extend_from_slice(b"%0D"),
            _ => out.push(b),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn userid_hint_payload() {
        let hint = UserIdHint::parse("6C7EE1B8621CC013 Werner Koch <wk@example.org>").unwrap();
        assert_eq!(hint.key_id, "6C7EE1B8621CC013");
        assert_eq!(hint.user_id, "Werner Koch <wk@example.org>");
    }

    #[test]
    fn userid_hint_unescapes() {
        let hint = UserIdHint::parse("ABCD 100%25 organic").unwrap();
        assert_eq!(hint.user_id, "100% organic");
    }

    #[test]
    fn userid_hint_empty_is_none() {
        assert!(UserIdHint::parse("   ").is_none());
    }

    #[test]
    fn need_passphrase_full() {
        let np = NeedPassphrase::parse("6C7EE1B8621CC013 AE17C6C9A2B9E1D5 1 2048").unwrap();
        assert_eq!(np.main_key_id, "6C7EE1B8621CC013");
        assert_eq!(np.key_id, "AE17C6C9A2B9E1D5");
        assert_eq!(np.key_type, Some(1));
        assert_eq!(np.key_length, Some(2048));
    }

    #[test]
    fn need_passphrase_short() {
        let np = NeedPassphrase::parse("1 2 3").unwrap();
        assert_eq!(np.main_key_id, "1");
        assert_eq!(np.key_id, "2");
        assert_eq!(np.key_type, Some(3));
        assert_eq!(np.key_length, None);
    }

    #[test]
    fn error_code_extraction() {
        assert_eq!(error_code_from_payload("decrypt 152"), Some(152));
        assert_eq!(error_code_from_payload("gpg-exit 33554531"), Some(99));
        assert_eq!(error_code_from_payload("no-numbers-here"), None);
    }

    #[test]
    fn unescape_roundtrips_escape() {
        let original = b"pass%word\nwith\rterminators";
        let escaped = escape_reply(original);
        assert!(!escaped.contains(&b'\n'));
        assert!(!escaped.contains(&b'\r'));
        let back = unescape(std::str::from_utf8(&escaped).unwrap());
        assert_eq!(back.as_bytes(), original);
    }

    #[test]
    fn unescape_leaves_malformed_escapes() {
        assert_eq!(unescape("50%"), "50%");
        assert_eq!(unescape("50%ZZ"), "50%ZZ");
    }
}
