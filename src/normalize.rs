//! Repairs extracted story markup into well-formed XHTML.
//!
//! Three repair passes, applied in order: tag/attribute case normalization,
//! void-element closure, orphan-closing-tag removal. Image inlining runs
//! between the first two, and only for section bodies. Each repair pass is
//! idempotent, and so is their composition.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::book::Book;
use crate::error::{Error, Result};
use crate::fetch::Gateway;

static TAG_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<.*?>").unwrap());
static TAG_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<\s*/?\s*(\w+)[\s/>]").unwrap());
static ATTR_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"\w+=""#).unwrap());
static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<img.*?>").unwrap());
static SRC_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#" src="(.*?)""#).unwrap());

/// Elements with no content and no separate closing tag in the source
/// dialect. `<br></br>` pairs do occur in theory but are rare enough to be
/// out of scope.
const VOID_TAGS: &[&str] = &["img", "br"];

/// Lowercases tag and attribute names; attribute values and text content are
/// untouched. The target format mandates lowercase markup while the source
/// mixes case freely.
pub fn lowercase_tags(html: &str) -> String {
    TAG_TOKEN
        .replace_all(html, |caps: &regex::Captures| {
            let tag = &caps[0];
            let tag = TAG_NAME.replace_all(tag, |c: &regex::Captures| c[0].to_ascii_lowercase());
            ATTR_NAME
                .replace_all(&tag, |c: &regex::Captures| c[0].to_ascii_lowercase())
                .into_owned()
        })
        .into_owned()
}

/// Rewrites `<img>` tags so the book can carry their payloads.
///
/// Each `src` is resolved against the story URL, fetched through the
/// gateway, registered with the book, and the attribute repointed at the
/// book-assigned path. With `include_images` off, the whole tag is deleted
/// instead. Only section bodies go through this; the cover never does.
pub fn inline_images(
    html: &str,
    story_url: &Url,
    gateway: &Gateway,
    book: &mut Book,
    include_images: bool,
) -> Result<String> {
    let mut out = String::with_capacity(html.len());
    let mut last = 0;

    for tag in IMG_TAG.find_iter(html) {
        out.push_str(&html[last..tag.start()]);
        last = tag.end();
        if !include_images {
            continue;
        }

        let tag = tag.as_str();
        let src = SRC_ATTR
            .captures(tag)
            .ok_or_else(|| Error::extraction(format!("image tag without src: '{tag}'")))?;
        let resolved = story_url.join(&src[1]).map_err(|err| {
            Error::extraction(format!("cannot resolve image url '{}': {err}", &src[1]))
        })?;
        let (data, mime_type) = gateway.fetch_bytes(&resolved)?;

        let name = resolved.path().rsplit('/').next().unwrap_or_default().to_owned();
        let stored_path = book.add_image(&name, data, &mime_type);
        out.push_str(&SRC_ATTR.replace(tag, regex::NoExpand(&format!(r#" src="{stored_path}""#))));
    }

    out.push_str(&html[last..]);
    Ok(out)
}

/// Rewrites void elements that are not already self-closed to the
/// self-closed form: `<img src="x">` becomes `<img src="x"/>`.
pub fn close_void_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;

    while let Some(rel) = html[cursor..].find('<') {
        let lt = cursor + rel;
        out.push_str(&html[cursor..lt]);

        let Some(gt) = find_tag_end(html, lt) else {
            out.push_str(&html[lt..]);
            return out;
        };
        let raw_tag = &html[lt..=gt];
        cursor = gt + 1;

        if is_markup_directive(raw_tag) || raw_tag.starts_with("</") {
            out.push_str(raw_tag);
            continue;
        }

        let inner = &html[lt + 1..gt];
        let name = leading_tag_name(inner);
        if !VOID_TAGS.contains(&name) || inner.trim_end().ends_with('/') {
            out.push_str(raw_tag);
            continue;
        }

        out.push_str(&html[lt..gt]);
        out.push_str("/>");
    }

    out.push_str(&html[cursor..]);
    out
}

/// Drops closing tags that have no matching, order-respecting opener.
///
/// A per-element count of open instances is kept while streaming through the
/// input; an end tag is only copied through when the count is positive.
/// Character data, entity references, and comments pass through verbatim, so
/// the output is the input minus orphaned closers.
pub fn strip_orphan_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut open_tags: HashMap<String, usize> = HashMap::new();
    let mut cursor = 0;

    while let Some(rel) = html[cursor..].find('<') {
        let lt = cursor + rel;
        out.push_str(&html[cursor..lt]);

        // Comments may contain '>' and tag-like text; copy them whole.
        if html[lt..].starts_with("<!--") {
            let Some(end) = html[lt..].find("-->") else {
                out.push_str(&html[lt..]);
                return out;
            };
            let stop = lt + end + 3;
            out.push_str(&html[lt..stop]);
            cursor = stop;
            continue;
        }

        let Some(gt) = find_tag_end(html, lt) else {
            out.push_str(&html[lt..]);
            return out;
        };
        let raw_tag = &html[lt..=gt];
        cursor = gt + 1;

        if is_markup_directive(raw_tag) {
            out.push_str(raw_tag);
            continue;
        }

        if let Some(inner) = raw_tag.strip_prefix("</") {
            let name = leading_tag_name(inner);
            if name.is_empty() {
                out.push_str(raw_tag);
                continue;
            }
            match open_tags.get_mut(name) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    out.push_str(raw_tag);
                }
                // No matching opener: the tag is dropped.
                _ => {}
            }
            continue;
        }

        let inner = &html[lt + 1..gt];
        let name = leading_tag_name(inner);
        if !name.is_empty() && !inner.trim_end().ends_with('/') {
            *open_tags.entry(name.to_owned()).or_insert(0) += 1;
        }
        out.push_str(raw_tag);
    }

    out.push_str(&html[cursor..]);
    out
}

/// Finds the byte offset of the `>` closing the tag that starts at `lt`,
/// skipping over quoted attribute values.
fn find_tag_end(html: &str, lt: usize) -> Option<usize> {
    let bytes = html.as_bytes();
    let mut in_quote: Option<u8> = None;
    let mut pos = lt + 1;
    while pos < bytes.len() {
        let b = bytes[pos];
        if let Some(q) = in_quote {
            if b == q {
                in_quote = None;
            }
        } else if b == b'"' || b == b'\'' {
            in_quote = Some(b);
        } else if b == b'>' {
            return Some(pos);
        }
        pos += 1;
    }
    None
}

fn is_markup_directive(raw_tag: &str) -> bool {
    matches!(raw_tag.as_bytes().get(1), Some(b'!') | Some(b'?'))
}

/// The element name at the start of a tag's interior, empty when the tag is
/// malformed.
fn leading_tag_name(inner: &str) -> &str {
    let inner = inner.trim_start();
    let end = inner
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(inner.len());
    &inner[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repair(html: &str) -> String {
        strip_orphan_tags(&close_void_tags(&lowercase_tags(html)))
    }

    #[test]
    fn tag_and_attribute_names_are_lowercased() {
        assert_eq!(lowercase_tags(r#"<IMG SRC="a.PNG">"#), r#"<img src="a.PNG">"#);
        assert_eq!(lowercase_tags("<I>Text Stays</I>"), "<i>Text Stays</i>");
    }

    #[test]
    fn void_tags_are_self_closed() {
        assert_eq!(close_void_tags("<img src='x.jpg'>"), "<img src='x.jpg'/>");
        assert_eq!(close_void_tags("<img src='x.jpg'/>"), "<img src='x.jpg'/>");
        assert_eq!(close_void_tags("a<br>b"), "a<br/>b");
        // Non-void tags are left alone.
        assert_eq!(close_void_tags("<i>x</i>"), "<i>x</i>");
    }

    #[test]
    fn orphan_closing_tags_are_dropped() {
        assert_eq!(strip_orphan_tags("a </i>b</i> c<br/>"), "a b c<br/>");
        assert_eq!(strip_orphan_tags("<i>a</i>b</i>"), "<i>a</i>b");
        // A matched pair survives.
        assert_eq!(strip_orphan_tags("<i>a</i>"), "<i>a</i>");
    }

    #[test]
    fn entities_and_comments_pass_through() {
        let input = "&amp; &#8212; <!-- </i> keep me --> done";
        assert_eq!(strip_orphan_tags(input), input);
    }

    #[test]
    fn quoted_angle_brackets_do_not_end_a_tag() {
        let input = r#"<img alt="a > b" src="x.png"/>"#;
        assert_eq!(close_void_tags(input), input);
        assert_eq!(strip_orphan_tags(input), input);
    }

    #[test]
    fn repair_pipeline_is_idempotent() {
        let once = repair(r#"<IMG SRC="a.png">text</i><P>para</P>"#);
        assert_eq!(once, r#"<img src="a.png"/>text<p>para</p>"#);
        assert_eq!(repair(&once), once);
    }
}
