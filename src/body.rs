//! Retrieval of a story's full text across its pagination.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::catalogue::Story;
use crate::error::{Error, Result};
use crate::fetch::Gateway;

static PAGER_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<div class="b-pager-pages">(.*?)</div>"#).unwrap());
static PAGE_OPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<option value=".*?">(\d+)</option>"#).unwrap());
static BODY_CONTAINER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<div class="b-story-body-x.*?">.*?<div>(.*?)</div>"#).unwrap());
static OUTER_PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^<p>(.*)</p>$").unwrap());

/// Fetches every page of `story` and concatenates the extracted fragments
/// into one paragraph-wrapped document.
///
/// The bare story URL is assumed to be page 1; further pages hang off a
/// `?page=N` query. A story whose pager lists no pages is single-page. An
/// empty result is reported as a warning, not an error; the story then gets
/// an empty body.
pub fn fetch_story_text(gateway: &Gateway, story: &Story) -> Result<String> {
    let base = Url::parse(&story.url)
        .map_err(|err| Error::extraction(format!("invalid story url '{}': {err}", story.url)))?;
    let first = gateway.fetch_text(&base)?;

    let pager = PAGER_BLOCK
        .captures(&first)
        .ok_or_else(|| Error::extraction(format!("cannot find pager control for {}", story.url)))?;
    let mut pages: Vec<String> = PAGE_OPTION
        .captures_iter(pager.get(1).map_or("", |m| m.as_str()))
        .map(|caps| caps[1].to_owned())
        .collect();
    if pages.is_empty() {
        pages.push("1".to_owned());
    }

    let mut text = String::new();
    for (index, page) in pages.iter().enumerate() {
        // Page 1 is the bare URL; the gateway's memory cache makes the
        // repeat fetch free.
        let page_url = if page == "1" {
            base.clone()
        } else {
            Url::parse(&format!("{}?page={page}", story.url)).map_err(|err| {
                Error::extraction(format!("invalid page url for '{}': {err}", story.url))
            })?
        };
        let html = gateway.fetch_text(&page_url)?;

        let fragment = BODY_CONTAINER
            .captures(&html)
            .ok_or_else(|| Error::extraction(format!("cannot find story body for {page_url}")))?;
        let fragment = fragment.get(1).map_or("", |m| m.as_str()).trim();
        let fragment = strip_outer_paragraph(fragment);

        if index > 0 {
            text.push_str("\n\n");
        }
        text.push_str(fragment);
    }

    if text.is_empty() {
        tracing::warn!(url = %story.url, "unable to extract any text");
    }
    Ok(format!("<p>{text}</p>"))
}

/// Drops one redundant top-level paragraph wrapper so that concatenated
/// pages do not end up with doubled nesting. Textual match only; nested
/// paragraphs of the same shape are deliberately left alone.
fn strip_outer_paragraph(fragment: &str) -> &str {
    match OUTER_PARAGRAPH.captures(fragment) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => fragment,
    }
}
