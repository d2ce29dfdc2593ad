//! Lightweight structural checks for text formats.
//!
//! These are balance checks, not parsers: they catch truncated or
//! mislabelled uploads cheaply without building a document tree.

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(UTF8_BOM).unwrap_or(data)
}

fn trim_ascii_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let end = data
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &data[start..end]
}

/// Check that a JSON document opens with an object or array and that its
/// braces and brackets balance outside of string literals.
pub fn check_json(data: &[u8]) -> Result<(), String> {
    let body = trim_ascii_whitespace(strip_bom(data));

    match body.first() {
        Some(b'{') | Some(b'[') => {}
        Some(_) => return Err("document must start with '{' or '['".to_string()),
        None => return Err("document is blank".to_string()),
    }

    let mut braces: i64 = 0;
    let mut brackets: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for &byte in body {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => braces += 1,
            b'}' => braces -= 1,
            b'[' => brackets += 1,
            b']' => brackets -= 1,
            _ => {}
        }

        if braces < 0 || brackets < 0 {
            return Err("closing delimiter without matching opener".to_string());
        }
    }

    if in_string {
        return Err("unterminated string literal".to_string());
    }
    if braces != 0 || brackets != 0 {
        return Err(format!(
            "unbalanced delimiters ({} braces, {} brackets left open)",
            braces, brackets
        ));
    }

    Ok(())
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Index just past the `>` closing the tag that starts at `start`, honouring
/// quoted attribute values.
fn tag_end(data: &[u8], start: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (offset, &byte) in data[start..].iter().enumerate() {
        match quote {
            Some(q) if byte == q => quote = None,
            Some(_) => {}
            None if byte == b'"' || byte == b'\'' => quote = Some(byte),
            None if byte == b'>' => return Some(start + offset + 1),
            None => {}
        }
    }
    None
}

/// Index just past a `<!...>` declaration, allowing one level of internal
/// subset brackets as used by DOCTYPE.
fn declaration_end(data: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, &byte) in data[start..].iter().enumerate() {
        match byte {
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            b'>' if depth == 0 => return Some(start + offset + 1),
            _ => {}
        }
    }
    None
}

fn is_name_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_' || byte == b':' || byte >= 0x80
}

/// Check that an XML document starts with a prolog or an element and that
/// its elements balance. Comments, CDATA sections, processing instructions
/// and declarations are skipped so markup inside them is not counted.
pub fn check_xml(data: &[u8]) -> Result<(), String> {
    let body = trim_ascii_whitespace(strip_bom(data));

    let starts_ok = body.starts_with(b"<?xml")
        || (body.len() > 1 && body[0] == b'<' && is_name_start(body[1]));
    if !starts_ok {
        return Err("document must start with an XML prolog or an element".to_string());
    }

    let mut depth: i64 = 0;
    let mut elements = 0usize;
    let mut i = 0usize;

    while i < body.len() {
        if body[i] != b'<' {
            i += 1;
            continue;
        }

        let rest = &body[i..];
        if rest.starts_with(b"<!--") {
            let end = find(body, i + 4, b"-->").ok_or("unterminated comment")?;
            i = end + 3;
        } else if rest.starts_with(b"<![CDATA[") {
            let end = find(body, i + 9, b"]]>").ok_or("unterminated CDATA section")?;
            i = end + 3;
        } else if rest.starts_with(b"<?") {
            let end = find(body, i + 2, b"?>").ok_or("unterminated processing instruction")?;
            i = end + 2;
        } else if rest.starts_with(b"<!") {
            i = declaration_end(body, i).ok_or("unterminated declaration")?;
        } else if rest.starts_with(b"</") {
            depth -= 1;
            if depth < 0 {
                return Err("closing tag without matching opening tag".to_string());
            }
            i = tag_end(body, i).ok_or("unterminated closing tag")?;
        } else {
            let end = tag_end(body, i).ok_or("unterminated tag")?;
            elements += 1;
            if body[end - 2] != b'/' {
                depth += 1;
            }
            i = end;
        }
    }

    if elements == 0 {
        return Err("document has no elements".to_string());
    }
    if depth != 0 {
        return Err(format!("{} element(s) left open", depth));
    }

    Ok(())
}
