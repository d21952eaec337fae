use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// URL of the story, or of one of the stories in the series.
    ///
    /// When several URLs are given, one combined volume is produced.
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Override the author in the epub metadata.
    #[arg(short, long)]
    pub author: Option<String>,

    /// Override the title in the epub metadata and the default file name.
    #[arg(short, long)]
    pub title: Option<String>,

    /// Output file name (defaults to the story title).
    #[arg(short, long, value_name = "FILENAME")]
    pub output: Option<PathBuf>,

    /// Download just this one story, not the entire series it belongs to.
    #[arg(short, long)]
    pub single: bool,

    /// Leave the one-line teasers out of the table of contents.
    #[arg(long)]
    pub no_teaser: bool,

    /// Leave images out (in case of illustrated stories).
    #[arg(long)]
    pub no_images: bool,

    /// Output more information.
    #[arg(short, long)]
    pub verbose: bool,

    /// Output debug information.
    #[arg(short, long)]
    pub debug: bool,

    /// Suppress informational output.
    #[arg(long)]
    pub silent: bool,

    /// Cache downloads in this directory and reuse them on later runs.
    ///
    /// Usually not required; mainly useful for testing, to avoid fetching
    /// the same pages over and over.
    #[arg(long, value_name = "PATH")]
    pub disk_cache_path: Option<PathBuf>,
}

impl Cli {
    /// Default log filter derived from the verbosity flags.
    /// `RUST_LOG` still wins when set.
    pub fn default_log_level(&self) -> &'static str {
        if self.silent {
            "error"
        } else if self.debug {
            "trace"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
