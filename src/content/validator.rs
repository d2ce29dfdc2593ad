//! Declared-type verification against magic bytes.
//!
//! An upload's declared media type is only trusted when there is nothing
//! registered for it. For every registered type the bytes must carry the
//! matching evidence, which stops an executable being stored as an image.

use super::structure;

/// Reason a payload was rejected for its declared type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("file is empty")]
    EmptyContent,

    #[error("content does not match declared type {declared}: {reason}")]
    TypeMismatch { declared: String, reason: String },

    #[error("malformed {format} content: {reason}")]
    MalformedStructure { format: &'static str, reason: String },
}

/// Fallback classification for bytes nothing else recognises.
pub const OCTET_STREAM: &str = "application/octet-stream";

const RIFF: &[u8] = b"RIFF";

/// How a registered media type is checked.
enum Rule {
    /// Bytes at `offset` must equal one of the listed prefixes.
    Prefix {
        offset: usize,
        any_of: &'static [&'static [u8]],
    },
    /// RIFF container whose format tag at offset 8 must equal `tag`.
    Riff { tag: &'static [u8; 4] },
    /// UTF-8 text without NUL bytes.
    Text,
    Json,
    Xml,
}

struct Signature {
    media_type: &'static str,
    rule: Rule,
}

const fn prefix(media_type: &'static str, any_of: &'static [&'static [u8]]) -> Signature {
    Signature {
        media_type,
        rule: Rule::Prefix { offset: 0, any_of },
    }
}

const fn riff(media_type: &'static str, tag: &'static [u8; 4]) -> Signature {
    Signature {
        media_type,
        rule: Rule::Riff { tag },
    }
}

const fn text(media_type: &'static str, rule: Rule) -> Signature {
    Signature { media_type, rule }
}

// Ordered by detection priority: longer, more specific markers first.
static SIGNATURES: &[Signature] = &[
    prefix("image/png", &[b"\x89PNG\r\n\x1a\n"]),
    prefix("image/jpeg", &[b"\xFF\xD8\xFF"]),
    prefix("image/gif", &[b"GIF87a", b"GIF89a"]),
    riff("image/webp", b"WEBP"),
    riff("audio/wav", b"WAVE"),
    riff("audio/x-wav", b"WAVE"),
    riff("audio/wave", b"WAVE"),
    riff("video/avi", b"AVI "),
    riff("video/x-msvideo", b"AVI "),
    prefix("image/tiff", &[b"II*\x00", b"MM\x00*"]),
    prefix("image/x-icon", &[b"\x00\x00\x01\x00"]),
    prefix("image/vnd.microsoft.icon", &[b"\x00\x00\x01\x00"]),
    prefix("application/pdf", &[b"%PDF-"]),
    prefix("application/x-7z-compressed", &[b"7z\xBC\xAF\x27\x1C"]),
    prefix("application/vnd.rar", &[b"Rar!\x1A\x07"]),
    prefix("application/x-rar-compressed", &[b"Rar!\x1A\x07"]),
    prefix("application/zip", &[b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"]),
    prefix("application/gzip", &[b"\x1F\x8B"]),
    prefix("application/wasm", &[b"\x00asm"]),
    prefix("application/x-elf", &[b"\x7FELF"]),
    prefix("application/x-executable", &[b"\x7FELF"]),
    prefix("audio/ogg", &[b"OggS"]),
    prefix("video/ogg", &[b"OggS"]),
    prefix("audio/flac", &[b"fLaC"]),
    prefix("video/webm", &[b"\x1A\x45\xDF\xA3"]),
    prefix("video/x-matroska", &[b"\x1A\x45\xDF\xA3"]),
    Signature {
        media_type: "video/mp4",
        rule: Rule::Prefix {
            offset: 4,
            any_of: &[b"ftyp"],
        },
    },
    prefix("audio/mpeg", &[b"ID3", b"\xFF\xFB", b"\xFF\xF3", b"\xFF\xF2"]),
    prefix("application/x-msdownload", &[b"MZ"]),
    prefix("application/vnd.microsoft.portable-executable", &[b"MZ"]),
    prefix("image/bmp", &[b"BM"]),
    text("application/json", Rule::Json),
    text("application/xml", Rule::Xml),
    text("text/xml", Rule::Xml),
    text("image/svg+xml", Rule::Xml),
    text("text/plain", Rule::Text),
    text("text/csv", Rule::Text),
    text("text/markdown", Rule::Text),
];

/// Strip parameters and case from a media type: `Text/Plain; charset=utf-8`
/// becomes `text/plain`.
pub fn normalize_media_type(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn lookup(media_type: &str) -> Option<&'static Signature> {
    SIGNATURES.iter().find(|s| s.media_type == media_type)
}

fn mismatch(declared: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::TypeMismatch {
        declared: declared.to_string(),
        reason: reason.into(),
    }
}

fn riff_tag(data: &[u8]) -> Option<&[u8]> {
    if data.len() >= 12 && data.starts_with(RIFF) {
        Some(&data[8..12])
    } else {
        None
    }
}

fn check_text(data: &[u8]) -> Result<(), String> {
    if data.contains(&0) {
        return Err("binary content (NUL byte)".to_string());
    }
    std::str::from_utf8(data)
        .map(|_| ())
        .map_err(|e| format!("invalid UTF-8 at byte {}", e.valid_up_to()))
}

fn matches_prefix(data: &[u8], offset: usize, any_of: &[&[u8]]) -> bool {
    data.len() >= offset && any_of.iter().any(|p| data[offset..].starts_with(p))
}

/// Verify `data` against its declared media type.
///
/// Types without a registered signature pass unchecked.
pub fn validate(data: &[u8], declared: &str) -> Result<(), ValidationError> {
    if data.is_empty() {
        return Err(ValidationError::EmptyContent);
    }

    let declared = normalize_media_type(declared);
    let Some(signature) = lookup(&declared) else {
        tracing::debug!(media_type = %declared, "No signature registered, accepting declared type");
        return Ok(());
    };

    match &signature.rule {
        Rule::Riff { tag } => match riff_tag(data) {
            Some(found) if found == tag.as_slice() => Ok(()),
            Some(found) => Err(mismatch(
                &declared,
                format!("RIFF format tag is {:?}", String::from_utf8_lossy(found)),
            )),
            None => Err(mismatch(&declared, "missing RIFF header")),
        },
        Rule::Text => check_text(data).map_err(|reason| mismatch(&declared, reason)),
        Rule::Json => structure::check_json(data).map_err(|reason| {
            ValidationError::MalformedStructure {
                format: "JSON",
                reason,
            }
        }),
        Rule::Xml => structure::check_xml(data).map_err(|reason| {
            ValidationError::MalformedStructure {
                format: "XML",
                reason,
            }
        }),
        Rule::Prefix { offset, any_of } => {
            if matches_prefix(data, *offset, any_of) {
                Ok(())
            } else {
                Err(mismatch(&declared, "file signature does not match"))
            }
        }
    }
}

/// Short printable markers such as `MZ` also open ordinary text
fn is_weak(rule: &Rule) -> bool {
    matches!(rule, Rule::Prefix { any_of, .. }
        if any_of.iter().all(|p| p.len() <= 2 && p.iter().all(u8::is_ascii_graphic)))
}

/// Classify bytes when no media type was declared.
///
/// Signatures are tried in priority order, then the plain-text heuristic,
/// then the generic binary type. A weak signature only wins over text
/// when the bytes fail the text check.
pub fn detect_media_type(data: &[u8]) -> &'static str {
    let mut weak_hit = None;
    for signature in SIGNATURES {
        let hit = match &signature.rule {
            Rule::Prefix { offset, any_of } => matches_prefix(data, *offset, any_of),
            Rule::Riff { tag } => riff_tag(data) == Some(tag.as_slice()),
            // Text formats carry no magic bytes; handled below.
            Rule::Text | Rule::Json | Rule::Xml => false,
        };
        if !hit {
            continue;
        }
        if !is_weak(&signature.rule) {
            return signature.media_type;
        }
        weak_hit.get_or_insert(signature.media_type);
    }

    if !data.is_empty() && check_text(data).is_ok() {
        return "text/plain";
    }
    weak_hit.unwrap_or(OCTET_STREAM)
}
