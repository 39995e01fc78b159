//! Stable id construction for concepts and sections.
//!
//! One normalization algorithm backs both: trim, lowercase, spaces to `-`,
//! drop anything outside `[a-z0-9-]`, collapse `-` runs, trim `-`.
//! The same input always produces the same slug, and a slug normalizes
//! to itself.

/// Normalize free-form text into a slug.
pub fn normalize_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().to_lowercase().chars() {
        let c = if c == ' ' { '-' } else { c };
        match c {
            'a'..='z' | '0'..='9' => slug.push(c),
            '-' => {
                if !slug.ends_with('-') {
                    slug.push('-');
                }
            }
            _ => {}
        }
    }
    slug.trim_matches('-').to_string()
}

/// Concept id: `concept:<slug-of-name>`. Shared across documents.
pub fn concept_id(name: &str) -> String {
    format!("concept:{}", normalize_slug(name))
}

/// Section id: `<document_id>:<slug-of-title>`.
pub fn section_id(document_id: &str, title: &str) -> String {
    format!("{}:{}", document_id, normalize_slug(title))
}
