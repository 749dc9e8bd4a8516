//! Field normalization shared by both scraper implementations (spec §4.6):
//! post-identifier extraction, author-link canonicalization, post-text
//! cleanup. Grounded on the spec's own "explicit ordered list of field
//! aliases" replacement for the source's runtime field-name probing.

use regex::Regex;
use std::sync::OnceLock;

fn post_key_patterns() -> &'static [Regex] {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| {
        vec![
            Regex::new(r"/posts/([A-Za-z0-9_-]+)").unwrap(),
            Regex::new(r"/permalink/([A-Za-z0-9_-]+)").unwrap(),
            Regex::new(r"story_fbid=([A-Za-z0-9_-]+)").unwrap(),
            Regex::new(r"(pfbid[A-Za-z0-9]+)").unwrap(),
        ]
    })
}

/// Pulls a post key out of a URL or a raw identifier string, trying each
/// recognized pattern in order (spec §4.6).
pub fn extract_post_key(url_or_text: &str) -> Option<String> {
    for pattern in post_key_patterns() {
        if let Some(caps) = pattern.captures(url_or_text) {
            return caps.get(1).map(|m| m.as_str().to_string());
        }
    }
    None
}

/// Normalizes an author link to a canonical profile URL: forces https,
/// collapses the mobile subdomain, and drops tracking query params (but
/// keeps `profile.php?id=` links, whose id *is* the identifier).
pub fn canonicalize_author_link(raw: &str) -> String {
    let mut link = raw.trim().to_string();
    if let Some(rest) = link.strip_prefix("http://") {
        link = format!("https://{rest}");
    } else if !link.starts_with("https://") {
        link = format!("https://{link}");
    }
    link = link.replace("://m.", "://www.");

    if let Some(query_at) = link.find('?') {
        let keeps_query = link[..query_at].ends_with("profile.php");
        if !keeps_query {
            link.truncate(query_at);
        }
    }
    link.trim_end_matches('/').to_string()
}

const TRAILING_ARTEFACTS: &[&str] = &["See more", "…עוד", "عرض المزيد"];

/// Strips trailing "see more"-style truncation artefacts the source forums
/// append to clipped post text (spec §4.6).
pub fn clean_post_text(text: &str) -> String {
    let mut cleaned = text.trim();
    loop {
        let mut stripped_any = false;
        for artefact in TRAILING_ARTEFACTS {
            if let Some(rest) = cleaned.strip_suffix(artefact) {
                cleaned = rest.trim_end();
                stripped_any = true;
            }
        }
        if !stripped_any {
            break;
        }
    }
    cleaned.to_string()
}
