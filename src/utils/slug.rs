pub const MAX_SLUG_LENGTH: usize = 63;

/// Lowercase, trim, and collapse separators so "Acme Legal" becomes
/// "acme-legal". Returns `None` when nothing slug-worthy remains.
pub fn normalize_slug(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true;
    for ch in raw.trim().chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() {
            out.push(lower);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() || out.len() > MAX_SLUG_LENGTH {
        None
    } else {
        Some(out)
    }
}

/// Strict check used for slugs supplied verbatim by a client.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= MAX_SLUG_LENGTH
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
}

/// Hostname shape check for custom domains. Deliberately conservative:
/// lowercase labels, at least one dot, no leading/trailing separators.
pub fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 || !host.contains('.') {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_display_names() {
        assert_eq!(normalize_slug("Acme Legal"), Some("acme-legal".into()));
        assert_eq!(normalize_slug("  Privacy & Terms  "), Some("privacy-terms".into()));
        assert_eq!(normalize_slug("---"), None);
        assert_eq!(normalize_slug(""), None);
    }

    #[test]
    fn validates_client_slugs() {
        assert!(is_valid_slug("acme"));
        assert!(is_valid_slug("acme-2"));
        assert!(!is_valid_slug("Acme"));
        assert!(!is_valid_slug("-acme"));
        assert!(!is_valid_slug("acme-"));
        assert!(!is_valid_slug("ac me"));
        assert!(!is_valid_slug(""));
    }

    #[test]
    fn validates_hostnames() {
        assert!(is_valid_hostname("policies.acme.com"));
        assert!(!is_valid_hostname("acme"));
        assert!(!is_valid_hostname(".acme.com"));
        assert!(!is_valid_hostname("acme.com."));
        assert!(!is_valid_hostname("ac me.com"));
    }
}
