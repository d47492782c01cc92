//! `margin`: manage saved bookmarks and highlights from the command line.
//!
//! Reads `margin.toml` (or the path given with `--config`) layered under
//! `MARGIN__*` environment variables, opens the SQLite-backed annotation
//! store and runs one command against it.
//!
//! # Usage
//!
//! ```text
//! margin bookmark add "How do lifetimes work?" --url https://chat.example/app/1
//! margin bookmarks --search lifetimes
//! margin restore page.html --url https://chat.example/app/1 > restored.html
//! ```

mod commands;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use margin_core::{config::MarginConfig, identity::parse_url, record::Color};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "margin", version, about = "Bookmarks and highlights for chat pages")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "margin.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Add, annotate or remove a bookmarked question.
  #[command(subcommand)]
  Bookmark(BookmarkCommand),

  /// List bookmarks, grouped by page unless filtered.
  Bookmarks {
    /// Only bookmarks on this page (path and query must match).
    #[arg(long, value_parser = page_url)]
    url:    Option<String>,
    /// Case-insensitive search over question text and notes.
    #[arg(long)]
    search: Option<String>,
    /// Only bookmarks with a note.
    #[arg(long)]
    notes:  bool,
  },

  /// Add, recolour or remove a highlight.
  #[command(subcommand)]
  Highlight(HighlightCommand),

  /// List highlights.
  Highlights {
    #[arg(long, value_parser = page_url)]
    url:      Option<String>,
    /// Only highlights attached to this question id.
    #[arg(long)]
    question: Option<String>,
  },

  /// Drop expired records.
  Sweep,

  /// Run forced eviction: keep the newest bookmarks and shorten long notes.
  Evict,

  /// Delete every bookmark and highlight.
  Clear {
    /// Required; there is no undo.
    #[arg(long)]
    yes: bool,
  },

  /// Collapse overlapping question captures into one entry per turn.
  Canonicalize {
    /// JSON array of strings or `{ "text", "priority" }` objects.
    fragments: PathBuf,
    #[arg(long, value_parser = page_url)]
    url:       String,
  },

  /// Re-anchor the page's stored highlights in a document and print it.
  Restore {
    /// Saved page: `.html`, or a JSON node tree.
    document: PathBuf,
    #[arg(long, value_parser = page_url)]
    url:      String,
    /// Print the pass report as JSON instead of the document.
    #[arg(long)]
    report:   bool,
  },
}

#[derive(Subcommand, Debug)]
enum BookmarkCommand {
  Add {
    text: String,
    #[arg(long, value_parser = page_url)]
    url:  String,
    #[arg(long)]
    note: Option<String>,
  },
  /// Set or clear (with an empty string) the note of a bookmark.
  Note {
    id:   String,
    note: String,
    /// Question text used to create the bookmark when it is missing.
    #[arg(long, requires = "url")]
    text: Option<String>,
    #[arg(long, value_parser = page_url)]
    url:  Option<String>,
  },
  Remove {
    id: String,
  },
}

#[derive(Subcommand, Debug)]
enum HighlightCommand {
  Add {
    text:     String,
    #[arg(long, value_parser = page_url)]
    url:      String,
    #[arg(long, value_parser = Color::parse, default_value = "yellow")]
    color:    Color,
    #[arg(long)]
    comment:  Option<String>,
    /// Id of the question the highlighted answer belongs to.
    #[arg(long)]
    question: Option<String>,
  },
  Color {
    id:    String,
    #[arg(value_parser = Color::parse)]
    color: Color,
  },
  Remove {
    id: String,
  },
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let mut config = load_config(&cli.config)?;
  config.store_path = expand_tilde(&config.store_path);

  commands::run(cli.command, &config).await
}

/// Page addresses must be absolute URLs.
fn page_url(raw: &str) -> margin_core::Result<String> {
  parse_url(raw).map(|_| raw.to_owned())
}

/// Optional TOML file under `MARGIN__SECTION__KEY` environment overrides.
fn load_config(path: &Path) -> anyhow::Result<MarginConfig> {
  let settings = config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(
      config::Environment::with_prefix("MARGIN")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .with_context(|| format!("failed to read config file {}", path.display()))?;

  settings
    .try_deserialize()
    .context("failed to deserialise MarginConfig")
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
