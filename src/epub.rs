//! Serialization of a [`Book`] into the EPUB 2.0 container layout.

use std::fs::File;
use std::io::{Seek, Write as _};
use std::path::Path;

use anyhow::Context as _;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::book::Book;

#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Suffix navigation labels with the section teasers.
    pub include_teasers: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            include_teasers: true,
        }
    }
}

/// An ordered, path-addressed byte store: either a zip container or an
/// exploded directory tree.
pub trait Sink {
    /// Stores `payload` at `path`. `uncompressed` is a hard requirement, not
    /// a hint: the EPUB `mimetype` entry must be stored without compression.
    fn store(&mut self, path: &str, payload: &[u8], uncompressed: bool) -> anyhow::Result<()>;
}

pub struct ZipSink<W: std::io::Write + Seek> {
    writer: ZipWriter<W>,
}

impl<W: std::io::Write + Seek> ZipSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: ZipWriter::new(inner),
        }
    }

    pub fn finish(self) -> anyhow::Result<()> {
        self.writer.finish().context("finish epub zip")?;
        Ok(())
    }
}

impl<W: std::io::Write + Seek> Sink for ZipSink<W> {
    fn store(&mut self, path: &str, payload: &[u8], uncompressed: bool) -> anyhow::Result<()> {
        let method = if uncompressed {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        let options = SimpleFileOptions::default()
            .compression_method(method)
            .unix_permissions(0o644);
        self.writer
            .start_file(path, options)
            .with_context(|| format!("start epub entry: {path}"))?;
        self.writer
            .write_all(payload)
            .with_context(|| format!("write epub entry: {path}"))?;
        Ok(())
    }
}

pub struct DirSink {
    root: std::path::PathBuf,
}

impl DirSink {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Sink for DirSink {
    fn store(&mut self, path: &str, payload: &[u8], _uncompressed: bool) -> anyhow::Result<()> {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create directory: {}", parent.display()))?;
        }
        std::fs::write(&full, payload).with_context(|| format!("write file: {}", full.display()))?;
        Ok(())
    }
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>
<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container" version="1.0">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

/// Writes `book` to `sink` in the fixed order EPUB readers expect: the
/// uncompressed `mimetype` first, then content, then the container
/// descriptor, package document, and navigation document. One random
/// identifier is generated per book and shared by the OPF and the NCX.
pub fn write_book(book: &Book, options: &WriteOptions, sink: &mut dyn Sink) -> anyhow::Result<()> {
    let book_id = Uuid::new_v4();

    sink.store("mimetype", b"application/epub+zip", true)?;
    if let Some(cover) = &book.cover {
        sink.store("OEBPS/cover.html", cover.as_bytes(), false)?;
    }
    for section in &book.sections {
        sink.store(&format!("OEBPS/{}", section.filename), section.html.as_bytes(), false)?;
    }
    for image in &book.images {
        sink.store(&format!("OEBPS/{}", image.full_path), &image.data, false)?;
    }
    sink.store("META-INF/container.xml", CONTAINER_XML.as_bytes(), false)?;
    sink.store(
        "OEBPS/content.opf",
        render_content_opf(book, &book_id).as_bytes(),
        false,
    )?;
    sink.store(
        "OEBPS/toc.ncx",
        render_toc_ncx(book, &book_id, options.include_teasers).as_bytes(),
        false,
    )?;
    Ok(())
}

pub fn write_zip(book: &Book, options: &WriteOptions, path: &Path) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("create file: {}", path.display()))?;
    let mut sink = ZipSink::new(file);
    write_book(book, options, &mut sink)?;
    sink.finish()
}

/// Unpacked variant of [`write_zip`], mainly for debugging the output.
pub fn write_directory(book: &Book, options: &WriteOptions, root: &Path) -> anyhow::Result<()> {
    let mut sink = DirSink::new(root);
    write_book(book, options, &mut sink)
}

fn render_content_opf(book: &Book, book_id: &Uuid) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<package xmlns=\"http://www.idpf.org/2007/opf\" xmlns:dc=\"http://purl.org/dc/elements/1.1/\" unique-identifier=\"bookid\" version=\"2.0\">\n");
    out.push_str("  <metadata>\n");
    out.push_str(&format!("    <dc:title>{}</dc:title>\n", xml_escape(&book.title)));
    out.push_str(&format!(
        "    <dc:creator>{}</dc:creator>\n",
        xml_escape(&book.creator)
    ));
    out.push_str(&format!(
        "    <dc:identifier id=\"bookid\">urn:uuid:{book_id}</dc:identifier>\n"
    ));
    out.push_str("    <dc:language>en-US</dc:language>\n");
    if book.cover.is_some() {
        out.push_str("    <meta name=\"cover\" content=\"cover\"/>\n");
    }
    out.push_str("  </metadata>\n");

    out.push_str("  <manifest>\n");
    out.push_str("    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n");
    if book.cover.is_some() {
        out.push_str(
            "    <item id=\"cover\" href=\"cover.html\" media-type=\"application/xhtml+xml\"/>\n",
        );
    }
    for section in &book.sections {
        out.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
            section.id, section.filename
        ));
    }
    for image in &book.images {
        out.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
            image.id, image.full_path, image.mime_type
        ));
    }
    out.push_str("  </manifest>\n");

    out.push_str("  <spine toc=\"ncx\">\n");
    if book.cover.is_some() {
        out.push_str("    <itemref idref=\"cover\" linear=\"no\"/>\n");
    }
    for section in &book.sections {
        out.push_str(&format!("    <itemref idref=\"{}\"/>\n", section.id));
    }
    out.push_str("  </spine>\n");

    if book.cover.is_some() {
        out.push_str("  <guide>\n");
        out.push_str("    <reference href=\"cover.html\" title=\"cover\" type=\"cover\"/>\n");
        out.push_str("  </guide>\n");
    }
    out.push_str("</package>\n");
    out
}

fn render_toc_ncx(book: &Book, book_id: &Uuid, include_teasers: bool) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n");
    out.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n");
    out.push_str("  <head>\n");
    out.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"urn:uuid:{book_id}\"/>\n"
    ));
    out.push_str("    <meta name=\"dtb:depth\" content=\"1\"/>\n");
    out.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\"/>\n");
    out.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\"/>\n");
    out.push_str("  </head>\n");
    out.push_str(&format!(
        "  <docTitle>\n    <text>{}</text>\n  </docTitle>\n",
        book.title
    ));
    out.push_str("  <navMap>\n");
    for (index, section) in book.sections.iter().enumerate() {
        let play_order = index + 1;
        let mut label = section.title.clone();
        if include_teasers && !section.teaser.is_empty() {
            label.push_str(" - ");
            label.push_str(&section.teaser);
        }
        out.push_str(&format!(
            "    <navPoint id=\"{}\" playOrder=\"{play_order}\">\n",
            section.id
        ));
        out.push_str(&format!("      <navLabel>\n        <text>{label}</text>\n      </navLabel>\n"));
        out.push_str(&format!("      <content src=\"{}\"/>\n", section.filename));
        out.push_str("    </navPoint>\n");
    }
    out.push_str("  </navMap>\n");
    out.push_str("</ncx>\n");
    out
}

pub fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
