//! Reduce feed HTML to plain text.

/// Longest entity name worth buffering before treating `&` as a literal.
const MAX_ENTITY_NAME: usize = 8;

/// Decode one of the entities we allow. Anything else stays literal.
fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "#39" | "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => None,
    }
}

/// Strip HTML tags, decode the safe entity set and collapse whitespace.
///
/// Decoded `<` and `>` are emitted as text and never start a tag.
pub fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut entity: Option<String> = None;

    for ch in html.chars() {
        if let Some(name) = entity.as_mut() {
            if ch == ';' {
                match decode_entity(name) {
                    Some(decoded) => result.push(decoded),
                    None => {
                        result.push('&');
                        result.push_str(name);
                        result.push(';');
                    }
                }
                entity = None;
                continue;
            }
            if (ch.is_ascii_alphanumeric() || ch == '#') && name.len() < MAX_ENTITY_NAME {
                name.push(ch);
                continue;
            }
            // Not an entity after all
            result.push('&');
            result.push_str(name);
            entity = None;
        }

        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            '&' if !in_tag => entity = Some(String::new()),
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    if let Some(name) = entity {
        result.push('&');
        result.push_str(&name);
    }

    result.split_whitespace().collect::<Vec<&str>>().join(" ")
}
