//! Bidirectional name normalization.
//!
//! Upstream identifiers arrive in kebab-case, snake_case, or camel/Pascal.
//! Scripts address tools as camelCase methods; reverse lookup walks the
//! candidate forms so every convention maps onto the one stored identifier.

/// camelCase: lowercase first letter, `[-_ ]x` becomes `X`.
pub fn camel(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper_next = false;
    for (i, ch) in s.chars().enumerate() {
        if ch == '-' || ch == '_' || ch == ' ' {
            upper_next = true;
            continue;
        }
        if i == 0 {
            out.push(ch.to_ascii_lowercase());
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// PascalCase: as [`camel`] but with the first letter uppercased.
pub fn pascal(s: &str) -> String {
    let camel = camel(s);
    let mut chars = camel.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => camel,
    }
}

fn separated(s: &str, sep: char) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_was_sep = true;
    for ch in s.chars() {
        if ch == '-' || ch == '_' || ch == ' ' {
            if !prev_was_sep {
                out.push(sep);
                prev_was_sep = true;
            }
            continue;
        }
        if ch.is_ascii_uppercase() {
            if !prev_was_sep {
                out.push(sep);
            }
            out.push(ch.to_ascii_lowercase());
            prev_was_sep = false;
        } else {
            out.push(ch);
            prev_was_sep = false;
        }
    }
    if out.ends_with(sep) {
        out.pop();
    }
    out
}

/// kebab-case form.
pub fn kebab(s: &str) -> String {
    separated(s, '-')
}

/// snake_case form.
pub fn snake(s: &str) -> String {
    separated(s, '_')
}

/// space separated form.
pub fn spaced(s: &str) -> String {
    separated(s, ' ')
}

/// The candidate set used for reverse lookup: the name itself plus its
/// kebab, snake, and spaced renderings, deduplicated in that order.
pub fn candidates(s: &str) -> Vec<String> {
    let mut out = vec![s.to_string()];
    for candidate in [kebab(s), snake(s), spaced(s)] {
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

/// True when `s` carries no separators, i.e. is already camel/Pascal-shaped.
fn is_camel_shaped(s: &str) -> bool {
    !s.contains(['-', '_', ' '])
}

/// Resolve a requested name against the stored identifiers.
///
/// Order: exact hit; then, for camelCase requests, any candidate form; then
/// any stored name whose snake_case equals the request. Returns the stored
/// identifier so the caller always dispatches on the original name.
pub fn resolve<'a, I>(requested: &str, available: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let available: Vec<&str> = available.into_iter().collect();

    if available.contains(&requested) {
        return Some(requested.to_string());
    }

    if is_camel_shaped(requested) {
        for candidate in candidates(requested) {
            if let Some(hit) = available.iter().find(|name| **name == candidate) {
                return Some(hit.to_string());
            }
        }
    }

    available
        .iter()
        .find(|name| snake(name) == requested)
        .map(|name| name.to_string())
}

/// Whether `s` is usable verbatim as a JS/TS identifier.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
