// Text decoding with an ordered encoding fallback list.

use std::borrow::Cow;

use crate::error::IoError;

/// Encodings tried for text files, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Windows1252,
    Latin1,
}

impl TextEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf16Le => "UTF-16LE",
            Self::Utf16Be => "UTF-16BE",
            Self::Windows1252 => "windows-1252",
            Self::Latin1 => "ISO-8859-1",
        }
    }
}

const FALLBACK_ORDER: [TextEncoding; 3] = [
    TextEncoding::Utf8,
    TextEncoding::Windows1252,
    TextEncoding::Latin1,
];

/// Decode a text file. UTF-16 is only considered when a BOM says so; after
/// that UTF-8, windows-1252 and ISO-8859-1 are tried in order. A candidate is
/// rejected when it fails to decode or yields C0 control characters (binary
/// content). ISO-8859-1 maps every byte, so it also accepts the C1 range that
/// windows-1252 leaves undefined (0x81, 0x8D, 0x8F, 0x90, 0x9D).
pub fn decode_text(bytes: &[u8]) -> Result<(String, TextEncoding), IoError> {
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, TextEncoding::Utf16Le);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, TextEncoding::Utf16Be);
    }

    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);

    for encoding in FALLBACK_ORDER {
        let decoded: Option<Cow<'_, str>> = match encoding {
            TextEncoding::Utf8 => std::str::from_utf8(bytes).ok().map(Cow::Borrowed),
            TextEncoding::Windows1252 => encoding_rs::WINDOWS_1252
                .decode_without_bom_handling_and_without_replacement(bytes),
            TextEncoding::Latin1 => Some(Cow::Owned(bytes.iter().map(|&b| b as char).collect())),
            TextEncoding::Utf16Le | TextEncoding::Utf16Be => None,
        };

        match decoded {
            Some(text) if is_plain_text(&text, encoding == TextEncoding::Latin1) => {
                log::debug!("decoded {} bytes as {}", bytes.len(), encoding.name());
                return Ok((text.into_owned(), encoding));
            }
            _ => log::debug!("{} rejected", encoding.name()),
        }
    }

    Err(IoError::Undecodable {
        tried: FALLBACK_ORDER
            .iter()
            .map(|e| e.name())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn decode_utf16(bytes: &[u8], encoding: TextEncoding) -> Result<(String, TextEncoding), IoError> {
    let codec = match encoding {
        TextEncoding::Utf16Le => encoding_rs::UTF_16LE,
        _ => encoding_rs::UTF_16BE,
    };
    match codec.decode_without_bom_handling_and_without_replacement(bytes) {
        Some(text) if is_plain_text(&text, false) => Ok((text.into_owned(), encoding)),
        _ => Err(IoError::Undecodable {
            tried: encoding.name().to_string(),
        }),
    }
}

fn is_plain_text(text: &str, allow_c1: bool) -> bool {
    !text.chars().any(|c| {
        c.is_control()
            && !matches!(c, '\t' | '\n' | '\r' | '\u{0c}' | '\u{1a}')
            && !(allow_c1 && ('\u{80}'..='\u{9f}').contains(&c))
    })
}
