//! Metadata extraction from story and member pages.
//!
//! The source markup does not reliably parse as a tree, so the catalogue is
//! reconstructed by interpreting table row classes as a lightweight grammar
//! over regex matches rather than by walking a DOM.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::{Error, Result};

/// A single story, as listed on the author's member page.
#[derive(Debug, Clone)]
pub struct Story {
    pub title: String,
    pub teaser: String,
    pub author: String,
    pub url: String,
    pub rating: String,
    pub hot: bool,
    pub category: String,
    pub date: String,
}

/// A multi-part series; `stories` is in catalogue order, which is reading
/// order.
#[derive(Debug, Clone)]
pub struct Series {
    pub title: String,
    pub author: String,
    pub stories: Vec<Story>,
}

/// Everything found in the submissions table of one member page.
#[derive(Debug)]
pub struct Catalogue {
    pub standalone: Vec<Story>,
    pub series: Vec<Series>,
}

#[derive(Debug)]
pub struct StoryHeader {
    pub title: String,
    pub author: String,
    pub member_page_url: String,
}

static STORY_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<div class="b-story-header">(.*?)</div>"#).unwrap());
static HEADER_FIELDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<h1>(.*?)</h1>.*?<a href="(.*?)">(.*?)</a>"#).unwrap());
static AUTHOR_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<span class="unameClick"><a .*?>(.*?)</a>.*?</span>"#).unwrap());
static SUBMISSIONS_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<table.*?>.*?<col .*?(<tr .*?)</table>").unwrap());
static TABLE_ROW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<tr.*?</tr>").unwrap());
static SERIES_TITLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<strong>(.*?)</strong>").unwrap());
static SERIES_PART_COUNT_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r": \d+ Part Series$").unwrap());
static ROW_CELL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<td.*?>(.*?)</td>").unwrap());
static LINK_AND_RATING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<a .*?href="(.*?)">(.*?)</a>.*?\((.*?)\)"#).unwrap());
static TITLE_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<span>|</span>|<!--.*?-->").unwrap());
static TEASER_TEXT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)^\s*([^<]*)(<|$)").unwrap());
static CATEGORY_SPAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<span>(.*?)</span>").unwrap());

/// Icon the site attaches to listings with a high enough rating.
const HOT_ICON: &str = "ico_h.gif";

/// Parses the header of a story page: title, author, member page link.
///
/// The site double-encodes the one `&` in the member link and emits it
/// protocol-relative; both quirks are normalized here.
pub fn parse_story_header(html: &str) -> Result<StoryHeader> {
    let header = STORY_HEADER
        .captures(html)
        .ok_or_else(|| Error::extraction("cannot find story header in page"))?;
    let fields = HEADER_FIELDS
        .captures(header.get(1).map_or("", |m| m.as_str()))
        .ok_or_else(|| Error::extraction("cannot parse story header"))?;

    let title = fields[1].to_owned();
    let member_page_url = absolutize(&fields[2].replace("&amp;", "&"));
    let author = fields[3].to_owned();

    Ok(StoryHeader {
        title,
        author,
        member_page_url,
    })
}

/// Parses the submissions table of a member page into a [`Catalogue`].
///
/// Rows are scanned in document order as a small state machine: a series
/// title row opens a series context, listing rows land in the open series or
/// in the standalone list depending on their class, header rows are skipped,
/// and anything else aborts the run — an unknown layout means the extraction
/// is unsafe to continue.
pub fn parse_catalogue(html: &str) -> Result<Catalogue> {
    let author = AUTHOR_SPAN
        .captures(html)
        .ok_or_else(|| Error::extraction("cannot determine author on member page"))?[1]
        .to_owned();

    let table = SUBMISSIONS_TABLE
        .captures(html)
        .ok_or_else(|| Error::extraction("cannot find list of submissions on member page"))?;
    let rows_html = table.get(1).map_or("", |m| m.as_str());

    let mut standalone = Vec::new();
    let mut series_list: Vec<Series> = Vec::new();
    let mut in_series = false;

    for row in TABLE_ROW.find_iter(rows_html) {
        let row = row.as_str();
        if row.starts_with(r#"<tr class="ser-ttl">"#) {
            let title = SERIES_TITLE
                .captures(row)
                .ok_or_else(|| Error::extraction(format!("cannot find series title: '{row}'")))?;
            series_list.push(Series {
                title: SERIES_PART_COUNT_SUFFIX.replace(&title[1], "").into_owned(),
                author: author.clone(),
                stories: Vec::new(),
            });
            in_series = true;
        } else if row.starts_with(r#"<tr class="sl">"#) {
            let story = parse_listing_row(row, &author)?;
            let series = in_series
                .then(|| series_list.last_mut())
                .flatten()
                .ok_or_else(|| Error::extraction(format!("series part outside a series: '{row}'")))?;
            series.stories.push(story);
        } else if row.starts_with(r#"<tr class="root-story"#) {
            standalone.push(parse_listing_row(row, &author)?);
            in_series = false;
        } else if row.starts_with(r#"<tr class="st-top">"#) {
            // column headers
        } else {
            return Err(Error::extraction(format!("unknown row type: '{row}'")));
        }
    }

    Ok(Catalogue {
        standalone,
        series: series_list,
    })
}

fn parse_listing_row(row: &str, author: &str) -> Result<Story> {
    let cells: Vec<&str> = ROW_CELL
        .captures_iter(row)
        .map(|caps| caps.get(1).map_or("", |m| m.as_str()))
        .collect();
    if cells.len() != 4 {
        return Err(Error::extraction(format!(
            "expected 4 cells in listing row but found {}: '{row}'",
            cells.len()
        )));
    }

    let link = LINK_AND_RATING
        .captures(cells[0])
        .ok_or_else(|| Error::extraction(format!("cannot match story link cell: '{}'", cells[0])))?;
    let url = absolutize(&link[1]);
    let title = TITLE_NOISE.replace_all(&link[2], "").into_owned();
    let rating = link[3].to_owned();

    let teaser = TEASER_TEXT
        .captures(cells[1])
        .ok_or_else(|| Error::extraction(format!("cannot match teaser cell: '{}'", cells[1])))?[1]
        .trim()
        .to_owned();
    let hot = cells[1].contains(HOT_ICON);

    let category = CATEGORY_SPAN
        .captures(cells[2])
        .ok_or_else(|| Error::extraction(format!("cannot match category cell: '{}'", cells[2])))?[1]
        .to_owned();
    let date = cells[3].trim().to_owned();

    Ok(Story {
        title,
        teaser,
        author: author.to_owned(),
        url,
        rating,
        hot,
        category,
        date,
    })
}

/// Story id: the last path segment of the URL, insensitive to a trailing
/// slash and to any query string.
pub fn extract_id(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|err| Error::extraction(format!("unexpected story url '{url}': {err}")))?;
    let id = parsed
        .path()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    if id.is_empty() {
        return Err(Error::extraction(format!("unexpected story url: '{url}'")));
    }
    Ok(id.to_owned())
}

/// The site emits protocol-relative links (`//host/...`).
fn absolutize(url: &str) -> String {
    match url.strip_prefix("//") {
        Some(rest) => format!("http://{rest}"),
        None => url.to_owned(),
    }
}
