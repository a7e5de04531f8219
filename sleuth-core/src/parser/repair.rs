//! Textual repair passes for almost-JSON generator output.
//!
//! Every pass tracks double-quoted string literals and only rewrites text
//! outside them, so values containing quotes, commas, or braces survive.

use serde_json::Value;

/// Apply every pass in order.
pub fn repair(text: &str) -> String {
    let text = normalize_quotes(text);
    let text = quote_bare_keys(&text);
    let text = quote_bare_values(&text);
    let text = remove_trailing_commas(&text);
    strip_control_chars(&text)
}

/// Convert typographic quotes and single-quoted strings to double quotes.
pub fn normalize_quotes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '"' {
            let end = string_end(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
        } else if is_smart_double(c) {
            // A string opened with a typographic quote closes with one too.
            out.push('"');
            i += 1;
            while i < chars.len() && !is_smart_double(chars[i]) {
                match chars[i] {
                    '"' => out.push_str("\\\""),
                    '\\' if i + 1 < chars.len() => {
                        out.push('\\');
                        out.push(chars[i + 1]);
                        i += 1;
                    }
                    other => out.push(other),
                }
                i += 1;
            }
            if i < chars.len() {
                out.push('"');
                i += 1;
            }
        } else if is_single(c) && starts_value(&out) {
            match single_quoted_end(&chars, i) {
                Some(end) => {
                    out.push('"');
                    push_single_quoted_content(&mut out, &chars[i + 1..end]);
                    out.push('"');
                    i = end + 1;
                }
                None => {
                    out.push('\'');
                    i += 1;
                }
            }
        } else {
            out.push(if is_single(c) { '\'' } else { c });
            i += 1;
        }
    }
    out
}

/// `{key: 1}` becomes `{"key": 1}`.
pub fn quote_bare_keys(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '"' {
            let end = string_end(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }
        if is_ident_start(c) && matches!(last_significant(&out), Some('{' | ',')) {
            let mut end = i;
            while end < chars.len() && is_ident_char(chars[end]) {
                end += 1;
            }
            let mut next = end;
            while next < chars.len() && chars[next].is_whitespace() {
                next += 1;
            }
            if chars.get(next) == Some(&':') {
                out.push('"');
                out.extend(&chars[i..end]);
                out.push('"');
                i = end;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// `{"a": some words}` becomes `{"a": "some words"}`. Numbers and
/// `true`/`false`/`null` are left alone.
pub fn quote_bare_values(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut containers: Vec<char> = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                let end = string_end(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
            }
            '{' | '[' => {
                containers.push(c);
                out.push(c);
                i += 1;
            }
            '}' | ']' => {
                containers.pop();
                out.push(c);
                i += 1;
            }
            _ if c.is_whitespace() || c == ',' || c == ':' => {
                out.push(c);
                i += 1;
            }
            _ if expects_value(&out, containers.last().copied()) => {
                let mut end = i;
                while end < chars.len() && !matches!(chars[end], ',' | '}' | ']' | '\n' | '\r') {
                    end += 1;
                }
                let raw: String = chars[i..end].iter().collect();
                let token = raw.trim_end();
                if is_json_literal(token) {
                    out.push_str(token);
                } else {
                    out.push_str(&Value::String(token.to_string()).to_string());
                }
                out.push_str(&raw[token.len()..]);
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Drop a comma that directly precedes `}` or `]`.
pub fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '"' {
            let end = string_end(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }
        if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Escape raw line breaks and tabs inside strings; drop other control characters.
pub fn strip_control_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
                if !c.is_control() {
                    out.push(c);
                } else {
                    // A backslash before a raw control char; keep the escape valid.
                    out.push('\\');
                }
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => {}
                c => out.push(c),
            }
        } else {
            match c {
                '"' => {
                    in_string = true;
                    out.push(c);
                }
                '\n' | '\r' | '\t' => out.push(c),
                c if (c as u32) < 0x20 => {}
                c => out.push(c),
            }
        }
    }
    out
}

/// Index just past the closing quote of the string starting at `start`,
/// or the end of input if it never closes.
fn string_end(chars: &[char], start: usize) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '"' => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Closing quote of a single-quoted string at `start`: the first unescaped
/// single quote followed by structural punctuation or the end of input.
fn single_quoted_end(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if is_single(c) => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if matches!(next, None | Some(':' | ',' | '}' | ']')) {
                    return Some(i);
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

fn push_single_quoted_content(out: &mut String, content: &[char]) {
    let mut i = 0;
    while i < content.len() {
        match content[i] {
            '\\' if content.get(i + 1).copied().is_some_and(is_single) => {
                out.push('\'');
                i += 1;
            }
            '\\' if i + 1 < content.len() => {
                out.push('\\');
                out.push(content[i + 1]);
                i += 1;
            }
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
        i += 1;
    }
}

fn last_significant(out: &str) -> Option<char> {
    out.trim_end().chars().next_back()
}

fn starts_value(out: &str) -> bool {
    matches!(last_significant(out), None | Some('{' | '[' | ',' | ':'))
}

fn expects_value(out: &str, container: Option<char>) -> bool {
    match (last_significant(out), container) {
        (Some(':'), Some('{')) => true,
        (Some('[' | ','), Some('[')) => true,
        _ => false,
    }
}

pub(crate) fn is_json_literal(token: &str) -> bool {
    matches!(token, "true" | "false" | "null")
        || serde_json::from_str::<serde_json::Number>(token).is_ok()
}

fn is_smart_double(c: char) -> bool {
    matches!(c, '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}')
}

fn is_single(c: char) -> bool {
    matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201B}')
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '$')
}
