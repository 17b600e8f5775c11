use chrono::Utc;

/// URL slug for a title. ASCII letters and digits are lower-cased, Bengali
/// script is kept as is (including vowel signs, which are not alphanumeric),
/// and every other run of characters becomes a single `-`.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars() {
        let keep = c.is_ascii_alphanumeric() || is_bengali(c);
        if keep {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Slug from an explicit value if given, else from the title, else a
/// timestamp so the unique column never receives an empty string.
pub fn resolve_slug(explicit: Option<&str>, title: &str) -> String {
    let from_explicit = explicit.map(slugify).filter(|s| !s.is_empty());
    from_explicit
        .or_else(|| Some(slugify(title)).filter(|s| !s.is_empty()))
        .unwrap_or_else(|| Utc::now().format("%Y%m%d%H%M%S%3f").to_string())
}

fn is_bengali(c: char) -> bool {
    ('\u{0980}'..='\u{09FF}').contains(&c)
}
