//! Lexical helpers for cutting code out of minified player script

/// Keywords after which a `/` starts a regex literal rather than a division
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "instanceof", "new", "throw", "void",
    "delete",
];

/// Find the byte index of the bracket closing the one at `open`.
///
/// `open` must point at `{`, `[` or `(`. String, template and regex literals
/// as well as comments are skipped, so brackets inside them do not count.
/// Regex literals are recognised heuristically from the preceding token.
pub fn find_matching_bracket(src: &str, open: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let (opening, closing) = match bytes.get(open)? {
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        b'(' => (b'(', b')'),
        _ => return None,
    };

    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'"' | b'\'' => i = skip_quoted(bytes, i, c)?,
            b'`' => i = skip_template(bytes, i)?,
            b'/' => match bytes.get(i + 1) {
                Some(b'/') => i = skip_line_comment(bytes, i),
                Some(b'*') => i = skip_block_comment(bytes, i)?,
                _ if starts_regex(bytes, i) => i = skip_regex(bytes, i)?,
                _ => {}
            },
            _ if c == opening => depth += 1,
            _ if c == closing => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Slice from the bracket at `open` through its matching close, inclusive
pub fn balanced_slice(src: &str, open: usize) -> Option<&str> {
    let close = find_matching_bracket(src, open)?;
    src.get(open..=close)
}

/// Byte index of the quote closing the string literal starting at `start`
pub fn string_literal_end(src: &str, start: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    match *bytes.get(start)? {
        quote @ (b'"' | b'\'') => skip_quoted(bytes, start, quote),
        b'`' => skip_template(bytes, start),
        _ => None,
    }
}

/// Quote `value` as a JavaScript string literal
pub fn quote_string(value: &str) -> String {
    // JSON string syntax is a subset of JS string syntax, apart from U+2028/9
    serde_json::Value::String(value.to_string())
        .to_string()
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

/// First `max` characters of `src` for error messages
pub fn snippet(src: &str, max: usize) -> String {
    match src.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &src[..idx]),
        None => src.to_string(),
    }
}

fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            c if c == quote => return Some(i),
            b'\n' => return None,
            _ => i += 1,
        }
    }
    None
}

fn skip_template(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => return Some(i),
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                let src = std::str::from_utf8(bytes).ok()?;
                i = find_matching_bracket(src, i + 1)? + 1;
            }
            _ => i += 1,
        }
    }
    None
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| start + p)
        .unwrap_or(bytes.len())
}

fn skip_block_comment(bytes: &[u8], start: usize) -> Option<usize> {
    bytes[start + 2..]
        .windows(2)
        .position(|w| w == b"*/")
        .map(|p| start + 2 + p + 1)
}

fn skip_regex(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'[' => {
                in_class = true;
                i += 1;
            }
            b']' => {
                in_class = false;
                i += 1;
            }
            b'/' if !in_class => return Some(i),
            b'\n' => return None,
            _ => i += 1,
        }
    }
    None
}

fn starts_regex(bytes: &[u8], slash: usize) -> bool {
    let mut j = slash;
    while j > 0 && bytes[j - 1].is_ascii_whitespace() {
        j -= 1;
    }
    if j == 0 {
        return true;
    }
    let prev = bytes[j - 1];
    if b"(,=:[!&|?{};+-*%<>~^".contains(&prev) {
        return true;
    }
    if prev.is_ascii_alphabetic() {
        let end = j;
        let mut k = j;
        while k > 0 && (bytes[k - 1].is_ascii_alphanumeric() || bytes[k - 1] == b'$' || bytes[k - 1] == b'_') {
            k -= 1;
        }
        if let Ok(word) = std::str::from_utf8(&bytes[k..end]) {
            return REGEX_PREFIX_KEYWORDS.contains(&word);
        }
    }
    false
}
