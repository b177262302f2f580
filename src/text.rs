//! Text decoding for names, keys and log messages.

use std::borrow::Cow;
use std::str::Utf8Error;

/// How invalid UTF-8 in the file is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextDecoding {
    /// Fail the record containing the bad text.
    Strict,
    /// Substitute U+FFFD for invalid sequences.
    #[default]
    Lenient,
}

impl TextDecoding {
    pub fn decode(self, bytes: &[u8]) -> Result<String, Utf8Error> {
        match self {
            TextDecoding::Strict  => std::str::from_utf8(bytes).map(str::to_owned),
            TextDecoding::Lenient => Ok(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

/// Remove ANSI SGR color sequences (`ESC [ <digits and ;> m`).
/// An escape that is not a complete SGR sequence is left untouched.
pub fn strip_ansi_colors(text: &str) -> Cow<'_, str> {
    if !text.contains('\u{1b}') {
        return Cow::Borrowed(text);
    }

    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'[') {
            let mut j = i + 2;
            while j < bytes.len() && (bytes[j].is_ascii_digit() || bytes[j] == b';') {
                j += 1;
            }
            if bytes.get(j) == Some(&b'm') {
                out.push_str(&text[copied..i]);
                i = j + 1;
                copied = i;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&text[copied..]);
    Cow::Owned(out)
}
