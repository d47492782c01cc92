//! Command handlers. Each opens what it needs, does one thing and prints the
//! result to stdout; diagnostics go to stderr through `tracing`.

use std::path::Path;

use anyhow::{Context as _, bail};
use margin_anchor::{Document, RestoreEngine};
use margin_core::{
  canonical::{CandidateFragment, Canonicalizer},
  config::MarginConfig,
  identity::fingerprint,
  record::{Bookmark, NewHighlight},
};
use margin_store::{AnnotationStore, SaveOutcome, SaveStatus};
use margin_store_sqlite::SqliteKv;
use serde::{Deserialize, Serialize};

use crate::{BookmarkCommand, Command, HighlightCommand};

type Store = AnnotationStore<SqliteKv>;

pub async fn run(command: Command, config: &MarginConfig) -> anyhow::Result<()> {
  match command {
    Command::Canonicalize { fragments, url } => canonicalize(&fragments, &url, config),
    command => {
      let mut store = open_store(config).await?;
      dispatch(command, &mut store, config).await
    }
  }
}

async fn open_store(config: &MarginConfig) -> anyhow::Result<Store> {
  let path = &config.store_path;
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }

  let kv = SqliteKv::open(path)
    .await
    .with_context(|| format!("failed to open store at {path:?}"))?
    .with_quota(config.quota_bytes);
  AnnotationStore::open(kv, config.retention.clone())
    .await
    .context("storage self-test failed")
}

async fn dispatch(command: Command, store: &mut Store, config: &MarginConfig) -> anyhow::Result<()> {
  match command {
    Command::Bookmark(BookmarkCommand::Add { text, url, note }) => {
      let result = store.save_bookmark(&text, &url, note).await;
      print_status(result)
    }
    Command::Bookmark(BookmarkCommand::Note { id, note, text, url }) => {
      let fallback = text.as_deref().zip(url.as_deref());
      let result = store.update_note(&id, &note, fallback).await;
      print_status(result)
    }
    Command::Bookmark(BookmarkCommand::Remove { id }) => {
      match store.remove_bookmark(&id).await? {
        Some(_) => tracing::info!(%id, "bookmark removed"),
        None => tracing::warn!(%id, "no such bookmark"),
      }
      Ok(())
    }
    Command::Bookmarks { url, search, notes } => {
      let filtered = search.is_some() || notes;
      let term = search.as_deref().unwrap_or_default();
      match url {
        Some(url) if filtered => {
          let mut found = store.search_bookmarks(term, notes);
          found.retain(|b| b.on_page(&url));
          print_json(&found)
        }
        Some(url) => print_json(&store.bookmarks_for_page(&url)),
        None if filtered => print_json(&store.search_bookmarks(term, notes)),
        None => {
          let groups: Vec<PageGroup> = store
            .bookmarks_by_url()
            .into_iter()
            .map(|(url, bookmarks)| PageGroup { url, bookmarks })
            .collect();
          print_json(&groups)
        }
      }
    }

    Command::Highlight(HighlightCommand::Add {
      text,
      url,
      color,
      comment,
      question,
    }) => {
      let mut new = NewHighlight::new(text, url).with_color(color);
      new.comment = comment;
      new.question_id = question;
      let result = store.add_highlight(new).await;
      if let Ok((highlight, _)) = &result {
        tracing::info!(id = %highlight.id, "highlight added");
      }
      print_status(result.map(|(_, outcome)| outcome))
    }
    Command::Highlight(HighlightCommand::Color { id, color }) => {
      print_status(store.update_color(&id, color).await)
    }
    Command::Highlight(HighlightCommand::Remove { id }) => {
      match store.remove_highlight(&id).await? {
        Some(_) => tracing::info!(%id, "highlight removed"),
        None => tracing::warn!(%id, "no such highlight"),
      }
      Ok(())
    }
    Command::Highlights { url, question } => {
      let found = match (&url, &question) {
        (_, Some(q)) => store.highlights_for_question(q),
        (Some(url), None) => store.highlights_for_page(url),
        (None, None) => store.highlights().cloned().collect(),
      };
      print_json(&found)
    }

    Command::Sweep => {
      let removed = store.sweep_expired().await?;
      tracing::info!(removed, "sweep finished");
      Ok(())
    }
    Command::Evict => {
      let evicted = store.force_evict().await?;
      tracing::info!(evicted, "eviction finished");
      Ok(())
    }
    Command::Clear { yes } => {
      if !yes {
        bail!("refusing to delete everything without --yes");
      }
      store.clear_all().await?;
      tracing::info!("all bookmarks and highlights deleted");
      Ok(())
    }

    Command::Restore {
      document,
      url,
      report,
    } => {
      let mut doc = load_document(&document)?;
      let engine = RestoreEngine::new(&config.anchor).context("invalid anchor configuration")?;
      let highlights = store.highlights_for_page(&url);
      let outcome = engine.restore_all(&mut doc, &highlights, &url);
      if report {
        print_json(&outcome)
      } else {
        println!("{}", doc.to_html());
        Ok(())
      }
    }

    Command::Canonicalize { fragments, url } => canonicalize(&fragments, &url, config),
  }
}

// ─── Canonicalize ────────────────────────────────────────────────────────────

/// One captured fragment in the input file.
#[derive(Deserialize)]
#[serde(untagged)]
enum FragmentInput {
  Text(String),
  Full {
    text:     String,
    #[serde(default)]
    priority: u32,
  },
}

#[derive(Serialize)]
struct CanonicalTurn {
  id:    String,
  /// Position of the fragment in the input file.
  index: usize,
  text:  String,
}

fn canonicalize(path: &Path, url: &str, config: &MarginConfig) -> anyhow::Result<()> {
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading fragments file {}", path.display()))?;
  let inputs: Vec<FragmentInput> =
    serde_json::from_str(&raw).context("parsing fragments file")?;

  let fragments: Vec<CandidateFragment<usize>> = inputs
    .into_iter()
    .enumerate()
    .map(|(index, input)| match input {
      FragmentInput::Text(text) => CandidateFragment::new(index, text, 0),
      FragmentInput::Full { text, priority } => CandidateFragment::new(index, text, priority),
    })
    .collect();

  let turns: Vec<CanonicalTurn> = Canonicalizer::new(&config.canonicalize)
    .canonicalize(&fragments)
    .into_iter()
    .map(|f| CanonicalTurn {
      id:    fingerprint(&f.text, url),
      index: f.handle,
      text:  f.text,
    })
    .collect();
  tracing::info!(input = fragments.len(), output = turns.len(), "canonicalized fragments");
  print_json(&turns)
}

// ─── Output ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct PageGroup {
  url:       String,
  bookmarks: Vec<Bookmark>,
}

fn load_document(path: &Path) -> anyhow::Result<Document> {
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading document {}", path.display()))?;
  let is_html = path
    .extension()
    .is_some_and(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"));
  let doc = if is_html {
    Document::parse_html(&raw)
  } else {
    Document::from_json(&raw)
  };
  doc.with_context(|| format!("parsing document {}", path.display()))
}

fn print_status(result: margin_store::Result<SaveOutcome>) -> anyhow::Result<()> {
  let failed = result.is_err();
  print_json(&SaveStatus::from(result))?;
  if failed {
    bail!("save failed");
  }
  Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
