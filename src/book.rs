//! In-memory model of the book being assembled.

/// One section (chapter) of the book.
#[derive(Debug)]
pub struct Section {
    /// Generated id, used in the package manifest and spine.
    pub id: String,
    pub title: String,
    /// One-line description shown in the table of contents.
    pub teaser: String,
    /// Normalized XHTML document.
    pub html: String,
    /// File name inside the archive, e.g. `content01.html`.
    pub filename: String,
}

/// An image embedded in the book.
#[derive(Debug)]
pub struct Image {
    pub id: String,
    /// Disambiguated file name, without path.
    pub filename: String,
    /// Path inside the content directory, e.g. `images/001map.png`.
    pub full_path: String,
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Sections and images are append-only; their order here is the order they
/// are written into the archive, which fixes the spine and the manifest ids.
#[derive(Debug)]
pub struct Book {
    pub title: String,
    pub creator: String,
    pub sections: Vec<Section>,
    pub images: Vec<Image>,
    pub cover: Option<String>,
}

impl Book {
    pub fn new(title: String, creator: String) -> Self {
        Self {
            title,
            creator,
            sections: Vec::new(),
            images: Vec::new(),
            cover: None,
        }
    }

    pub fn add_section(&mut self, title: &str, teaser: &str, html: String, filename: String) {
        let id = format!("html_{}", self.sections.len() + 1);
        self.sections.push(Section {
            id,
            title: title.to_owned(),
            teaser: teaser.to_owned(),
            html,
            filename,
        });
    }

    /// Registers an image payload and returns the path to reference it by
    /// from section markup. The ordinal prefix keeps images with the same
    /// source name from colliding.
    pub fn add_image(&mut self, filename: &str, data: Vec<u8>, mime_type: &str) -> String {
        let num = format!("{:03}", self.images.len() + 1);
        let filename = format!("{num}{filename}");
        let full_path = format!("images/{filename}");
        self.images.push(Image {
            id: format!("img{num}"),
            filename,
            full_path: full_path.clone(),
            data,
            mime_type: mime_type.to_owned(),
        });
        full_path
    }

    pub fn set_cover(&mut self, html: String) {
        self.cover = Some(html);
    }
}
