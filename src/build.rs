//! End-to-end run: resolve the requested URLs against the author's
//! catalogue, pull every selected story, and write the archive.

use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::Context as _;
use regex::Regex;
use url::Url;

use crate::body;
use crate::book::Book;
use crate::catalogue::{self, Catalogue, Series, Story};
use crate::cli::Cli;
use crate::epub::{self, WriteOptions, xml_escape};
use crate::error::{Error, Result};
use crate::fetch::Gateway;
use crate::normalize;

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let gateway = Gateway::new(cli.disk_cache_path.clone()).context("set up fetch gateway")?;

    let first_url = Url::parse(&cli.urls[0])
        .with_context(|| format!("parse story url: {}", cli.urls[0]))?;
    let story_html = gateway.fetch_text(&first_url)?;
    let header = catalogue::parse_story_header(&story_html)?;
    tracing::debug!(
        title = %header.title,
        author = %header.author,
        member_page = %header.member_page_url,
        "parsed story header"
    );

    let member_url = Url::parse(&header.member_page_url)
        .with_context(|| format!("parse member page url: {}", header.member_page_url))?;
    let member_html = gateway.fetch_text(&member_url)?;
    let catalogue = catalogue::parse_catalogue(&member_html)?;
    tracing::debug!(
        standalone = catalogue.standalone.len(),
        series = catalogue.series.len(),
        "parsed catalogue"
    );

    let selections = select_targets(&catalogue, &cli.urls, cli.single)?;

    let author = cli.author.clone().unwrap_or(header.author);
    let title = cli
        .title
        .clone()
        .unwrap_or_else(|| selections[0].title().to_owned());

    let mut book = Book::new(title, author);
    let cover = cover_page(&book.title, &book.creator);
    book.set_cover(cover);

    for (n, selection) in selections.iter().enumerate() {
        let n = n + 1;
        match selection {
            Selection::Story(story) => {
                add_story(&gateway, &cli, &mut book, story, format!("content{n:02}.html"))?;
            }
            Selection::Series(series) => {
                for (m, story) in series.stories.iter().enumerate() {
                    add_story(
                        &gateway,
                        &cli,
                        &mut book,
                        story,
                        format!("part{n:02}x{:02}.html", m + 1),
                    )?;
                }
            }
        }
    }

    let out_path = cli
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(default_file_name(&book.title)));
    let options = WriteOptions {
        include_teasers: !cli.no_teaser,
    };
    epub::write_zip(&book, &options, &out_path)
        .with_context(|| format!("write epub: {}", out_path.display()))?;
    tracing::info!(path = %out_path.display(), "finished");

    Ok(())
}

#[derive(Debug)]
enum Selection {
    Story(Story),
    Series(Series),
}

impl Selection {
    fn title(&self) -> &str {
        match self {
            Selection::Story(story) => &story.title,
            Selection::Series(series) => &series.title,
        }
    }
}

/// Matches each requested URL against the catalogue by story id. A hit in a
/// series selects the whole series unless `single` is set; a URL matching
/// nothing on the member page is fatal.
fn select_targets(catalogue: &Catalogue, urls: &[String], single: bool) -> Result<Vec<Selection>> {
    let mut selections = Vec::new();

    'urls: for url in urls {
        let id = catalogue::extract_id(url)?;

        if let Some(story) = catalogue
            .standalone
            .iter()
            .find(|story| catalogue::extract_id(&story.url).ok().as_deref() == Some(id.as_str()))
        {
            selections.push(Selection::Story(story.clone()));
            continue;
        }

        for series in &catalogue.series {
            if let Some(story) = series
                .stories
                .iter()
                .find(|story| catalogue::extract_id(&story.url).ok().as_deref() == Some(id.as_str()))
            {
                selections.push(if single {
                    Selection::Story(story.clone())
                } else {
                    Selection::Series(series.clone())
                });
                continue 'urls;
            }
        }

        return Err(Error::extraction(format!(
            "could not find story on member page: {url}"
        )));
    }

    Ok(selections)
}

fn add_story(
    gateway: &Gateway,
    cli: &Cli,
    book: &mut Book,
    story: &Story,
    filename: String,
) -> anyhow::Result<()> {
    tracing::info!(title = %story.title, url = %story.url, "adding story");

    let text = body::fetch_story_text(gateway, story)?;
    let text = normalize::lowercase_tags(&text);
    let story_url =
        Url::parse(&story.url).with_context(|| format!("parse story url: {}", story.url))?;
    let text = normalize::inline_images(&text, &story_url, gateway, book, !cli.no_images)?;
    let text = normalize::close_void_tags(&text);
    let text = normalize::strip_orphan_tags(&text);

    let content = format!("{}{text}", heading_block(&story.title, &story.author));
    let html = xhtml_document(&xml_escape(&book.title), &content);
    book.add_section(&story.title, &story.teaser, html, filename);
    Ok(())
}

/// XHTML 1.1 shell shared by the cover and every section.
fn xhtml_document(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml">
  <head>
    <title>{title}</title>
  </head>
  <body>
{content}
  </body>
</html>"#
    )
}

fn heading_block(title: &str, author: &str) -> String {
    format!("<h2>{title}</h2>\n<p>by <i>{author}</i></p>\n<hr />\n")
}

fn cover_page(title: &str, author: &str) -> String {
    let content = format!(
        "<h1 style=\"text-align: center\">{}</h1>\n<p style=\"text-align: center\">by <i>{}</i></p>",
        xml_escape(title),
        xml_escape(author)
    );
    xhtml_document("cover", &content)
}

static UNSAFE_FILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_. \-]").unwrap());

/// Default output name: the title with unsafe characters flattened to `_`.
fn default_file_name(title: &str) -> String {
    format!("{}.epub", UNSAFE_FILE_CHARS.replace_all(title, "_"))
}
