//! In-place table replacement inside CMS documents.
//!
//! A published table is anchored by `data-rp-table-id` on its `<figure>`.
//! Patching finds that figure in a document body and swaps its outer markup
//! for a freshly rendered fragment. Everything outside the matched region is
//! left byte-for-byte untouched, so the document grows or shrinks by exactly
//! the difference between the old and new fragment.
//!
//! Each anchor must match exactly one figure. Zero matches (the table was
//! removed or never embedded) and multiple matches (the anchor is ambiguous)
//! are both errors, and an error leaves the document unmodified: replacements
//! are applied to a copy that is only written back once every anchor has been
//! replaced.
//!
//! The scanner understands just enough HTML to do this reliably: quoted
//! attribute values (which may contain `>`), comments, raw-text elements
//! (`script`, `style`) and nested figures.

use crate::cms::{CmsError, ContentType, Document, DocumentStore, Identifier};
use crate::render::ANCHOR_ATTR;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<!--.*?-->|<(/?)([A-Za-z][A-Za-z0-9:-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#,
    )
    .expect("valid regex")
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s=/>"']+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("valid regex")
});

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("A table id is required to replace a table")]
    MissingAnchor,
    #[error("Replacement HTML for table \"{0}\" is empty")]
    EmptyReplacement(String),
    #[error("No table found with data-rp-table-id=\"{0}\"")]
    NotFound(String),
    #[error("Multiple tables found with data-rp-table-id=\"{id}\" ({count} matches)")]
    Ambiguous { id: String, count: usize },
    #[error("Table with data-rp-table-id=\"{0}\" is never closed")]
    Unterminated(String),
    #[error("Ghost {content_type} with {identifier} not found")]
    DocumentNotFound {
        content_type: ContentType,
        identifier: Identifier,
    },
    #[error(transparent)]
    Cms(#[from] CmsError),
}

/// Where to patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTarget {
    pub content_type: ContentType,
    pub identifier: Identifier,
}

/// Fetch the target document, replace every anchored table, write it back
/// with the fetched concurrency token.
pub async fn patch_document(
    store: &dyn DocumentStore,
    target: &PatchTarget,
    replacements: &BTreeMap<String, String>,
) -> Result<Document, PatchError> {
    let document = store
        .fetch(target.content_type, &target.identifier)
        .await?
        .ok_or_else(|| PatchError::DocumentNotFound {
            content_type: target.content_type,
            identifier: target.identifier.clone(),
        })?;

    let html = replace_anchors(&document.html, replacements)?;
    let updated = Document { html, ..document };
    Ok(store.write(target.content_type, &updated).await?)
}

/// Replace each anchored figure in `html`, in key order.
pub fn replace_anchors(
    html: &str,
    replacements: &BTreeMap<String, String>,
) -> Result<String, PatchError> {
    let mut current = html.to_string();
    for (id, fragment) in replacements {
        current = replace_anchor(&current, id, fragment)?;
    }
    Ok(current)
}

/// Replace the single figure anchored by `id`.
pub fn replace_anchor(html: &str, id: &str, fragment: &str) -> Result<String, PatchError> {
    if id.is_empty() {
        return Err(PatchError::MissingAnchor);
    }
    if fragment.is_empty() {
        return Err(PatchError::EmptyReplacement(id.to_string()));
    }

    let matches = find_anchored(html, id)?;
    let (start, end) = match matches.as_slice() {
        [] => return Err(PatchError::NotFound(id.to_string())),
        [only] => *only,
        many => {
            return Err(PatchError::Ambiguous {
                id: id.to_string(),
                count: many.len(),
            });
        }
    };

    let mut out = String::with_capacity(html.len() - (end - start) + fragment.len());
    out.push_str(&html[..start]);
    out.push_str(fragment);
    out.push_str(&html[end..]);
    Ok(out)
}

/// Byte ranges of every `<figure>` whose anchor attribute equals `id`.
pub fn find_anchored(html: &str, id: &str) -> Result<Vec<(usize, usize)>, PatchError> {
    let tags = scan_tags(html);
    let mut found = Vec::new();

    for (index, tag) in tags.iter().enumerate() {
        if tag.closing || !tag.name.eq_ignore_ascii_case("figure") {
            continue;
        }
        if anchor_value(tag.attributes) != Some(id) {
            continue;
        }
        let end = closing_figure(&tags[index + 1..])
            .ok_or_else(|| PatchError::Unterminated(id.to_string()))?;
        found.push((tag.start, end));
    }

    Ok(found)
}

#[derive(Debug)]
struct Tag<'a> {
    start: usize,
    end: usize,
    closing: bool,
    name: &'a str,
    attributes: &'a str,
}

/// Opening and closing tags in document order, skipping comments and the
/// contents of raw-text elements.
fn scan_tags(html: &str) -> Vec<Tag<'_>> {
    let mut tags = Vec::new();
    let mut pos = 0;

    while let Some(caps) = TOKEN.captures_at(html, pos) {
        let Some(whole) = caps.get(0) else { break };
        pos = whole.end();
        let Some(name) = caps.get(2) else { continue }; // comment

        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let name = name.as_str();
        tags.push(Tag {
            start: whole.start(),
            end: whole.end(),
            closing,
            name,
            attributes: caps.get(3).map_or("", |m| m.as_str()),
        });

        if !closing
            && (name.eq_ignore_ascii_case("script") || name.eq_ignore_ascii_case("style"))
        {
            pos = raw_text_end(html, pos, name);
        }
    }

    tags
}

/// Position of the closing tag of a raw-text element (or end of input).
fn raw_text_end(html: &str, from: usize, name: &str) -> usize {
    let needle = format!("</{}", name.to_ascii_lowercase());
    html[from..]
        .to_ascii_lowercase()
        .find(&needle)
        .map_or(html.len(), |offset| from + offset)
}

fn anchor_value(attributes: &str) -> Option<&str> {
    ATTRIBUTE.captures_iter(attributes).find_map(|caps| {
        let name = caps.get(1)?.as_str();
        if !name.eq_ignore_ascii_case(ANCHOR_ATTR) {
            return None;
        }
        Some(
            caps.get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str()),
        )
    })
}

/// End offset of the `</figure>` matching an already-consumed opener.
fn closing_figure(rest: &[Tag<'_>]) -> Option<usize> {
    let mut depth = 1usize;
    for tag in rest {
        if !tag.name.eq_ignore_ascii_case("figure") {
            continue;
        }
        if tag.closing {
            depth -= 1;
            if depth == 0 {
                return Some(tag.end);
            }
        } else if !tag.attributes.trim_end().ends_with('/') {
            depth += 1;
        }
    }
    None
}
