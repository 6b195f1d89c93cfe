use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

/// Extract `[[wikilink]]` targets from markdown content.
///
/// Supports `[[note-title]]` and `[[note-title|display alias]]`; the alias
/// is dropped. Targets are returned in order of appearance, deduplicated.
pub fn extract_wikilinks(content: &str) -> Vec<String> {
    let mut targets = Vec::new();
    let mut seen = HashSet::new();

    let mut rest = content;
    while let Some(open) = rest.find("[[") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("]]") else {
            break;
        };
        let inner = &after_open[..close];

        if !inner.is_empty() && !inner.contains('[') {
            let (target, _alias) = parse_wikilink(inner);
            if !target.is_empty() && seen.insert(target.clone()) {
                targets.push(target);
            }
        }

        rest = &after_open[close + 2..];
    }

    targets
}

/// Split `title` or `title|alias` into target and optional alias.
pub fn parse_wikilink(wikilink: &str) -> (String, Option<String>) {
    match wikilink.split_once('|') {
        Some((target, alias)) => (target.trim().to_owned(), Some(alias.trim().to_owned())),
        None => (wikilink.trim().to_owned(), None),
    }
}

/// Render target titles back into wikilink markers.
pub fn render_wikilinks(targets: &[String]) -> String {
    targets
        .iter()
        .map(|target| format!("[[{target}]]"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract `#hashtags`, lowercased, without the prefix.
pub fn extract_hashtags(content: &str) -> HashSet<String> {
    let mut tags = HashSet::new();

    for (index, _) in content.match_indices('#') {
        let preceded_ok = index == 0
            || content[..index]
                .chars()
                .next_back()
                .is_some_and(char::is_whitespace);
        if !preceded_ok {
            continue;
        }

        let tag: String = content[index + 1..]
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if !tag.is_empty() {
            tags.insert(tag.to_lowercase());
        }
    }

    tags
}

/// URL-friendly slug from a title: accents stripped, lowercased, word runs
/// joined with single hyphens.
pub fn create_slug(title: &str) -> String {
    let ascii: String = title
        .nfkd()
        .filter(|c| c.is_ascii())
        .collect::<String>()
        .to_lowercase();

    let mut slug = String::with_capacity(ascii.len());
    let mut last_hyphen = true;
    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c);
            last_hyphen = false;
        } else if (c.is_whitespace() || c == '-') && !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    slug.trim_matches('-').to_owned()
}
