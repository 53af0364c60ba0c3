//! URL slugs for pages and reference entries.

/// Lowercase ASCII slug: alphanumerics kept, everything else collapsed into
/// single dashes. Returns `"untitled"` when nothing usable remains.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else if c == '\'' || c == '\u{2019}' {
            // drop apostrophes: "Dr. O'Neil" -> "dr-oneil"
        } else {
            pending_dash = true;
        }
    }

    if slug.len() > 80 {
        slug.truncate(80);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// Whether `slug` is already in canonical form.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty() && slugify(slug) == slug
}

/// `base`, `base-2`, `base-3`, ... for the n-th collision.
pub fn with_suffix(base: &str, n: u32) -> String {
    if n <= 1 {
        base.to_string()
    } else {
        format!("{}-{}", base, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Chest Pain (Adult)"), "chest-pain-adult");
        assert_eq!(slugify("  .SmartPhrase: ROS  "), "smartphrase-ros");
        assert_eq!(slugify("Dr. O'Neil"), "dr-oneil");
        assert_eq!(slugify("!!!"), "untitled");
    }

    #[test]
    fn test_slugify_truncates() {
        let long = "word ".repeat(40);
        let slug = slugify(&long);
        assert!(slug.len() <= 80);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn test_is_valid_slug() {
        assert!(is_valid_slug("abdominal-pain"));
        assert!(!is_valid_slug("Abdominal Pain"));
        assert!(!is_valid_slug("a--b"));
        assert!(!is_valid_slug(""));
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(with_suffix("a", 1), "a");
        assert_eq!(with_suffix("a", 3), "a-3");
    }
}
