//! Segment list files and destination naming for the command-line front end.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

const TARGET_WIDTH: usize = 8;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFormat {
    /// One URL per line; blank lines and `#` comments are skipped.
    Plain,
    /// `[{"url": "...", "save_as": "..."}]`
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
    pub url: String,
    pub save_as: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonEntry {
    url: String,
    #[serde(default)]
    save_as: Option<String>,
}

pub fn parse_segment_list(text: &str, fmt: ListFormat) -> Result<Vec<SegmentEntry>> {
    let entries: Vec<SegmentEntry> = match fmt {
        ListFormat::Plain => text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|url| SegmentEntry {
                url: url.to_string(),
                save_as: None,
            })
            .collect(),
        ListFormat::Json => {
            let parsed: Vec<JsonEntry> = serde_json::from_str(text)
                .map_err(|e| Error::InvalidSegmentList(format!("json: {e}")))?;
            parsed
                .into_iter()
                .filter(|e| !e.url.trim().is_empty())
                .map(|e| SegmentEntry {
                    url: e.url.trim().to_string(),
                    save_as: e.save_as.filter(|s| !s.trim().is_empty()),
                })
                .collect()
        }
    };
    if entries.is_empty() {
        return Err(Error::InvalidSegmentList("no segments listed".into()));
    }
    Ok(entries)
}

/// Last URL path segment, percent-decoded and left-padded with zeros to
/// eight characters so the files sort in playlist order (`12.ts` → `00012.ts`).
pub fn default_target_name(url: &str, index: usize) -> String {
    let name = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut it| it.next_back())
                .map(|seg| percent_decode_str(seg).decode_utf8_lossy().into_owned())
        })
        .map(|seg| seg.replace(['/', '\\'], "_"))
        .filter(|seg| !seg.is_empty() && seg != "." && seg != "..")
        .unwrap_or_else(|| format!("{index}.ts"));
    zero_pad(&name, TARGET_WIDTH)
}

fn zero_pad(name: &str, width: usize) -> String {
    let len = name.chars().count();
    if len >= width {
        return name.to_string();
    }
    format!("{}{name}", "0".repeat(width - len))
}

/// Joins a user-supplied relative name onto `dir`, refusing anything that could
/// escape it.
pub fn resolve_save_as(dir: &Path, save_as: &str) -> Result<PathBuf> {
    let p = PathBuf::from(save_as.trim());
    if p.as_os_str().is_empty() {
        return Err(Error::InvalidTarget("save_as is empty".into()));
    }
    for comp in p.components() {
        match comp {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::InvalidTarget(format!(
                    "must not contain '..': {}",
                    p.display()
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidTarget(format!(
                    "must be relative: {}",
                    p.display()
                )))
            }
        }
    }
    Ok(dir.join(p))
}

/// Turns list entries into the `(sources, targets)` lists a session takes.
/// Two entries that land on the same file are rejected.
pub fn build_pairs(entries: Vec<SegmentEntry>, dir: &Path) -> Result<(Vec<String>, Vec<PathBuf>)> {
    let mut sources = Vec::with_capacity(entries.len());
    let mut targets = Vec::with_capacity(entries.len());
    let mut seen = HashSet::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let target = match entry.save_as.as_deref() {
            Some(name) => resolve_save_as(dir, name)?,
            None => dir.join(default_target_name(&entry.url, index)),
        };
        if !seen.insert(target.clone()) {
            return Err(Error::InvalidTarget(format!(
                "two segments write to {}",
                target.display()
            )));
        }
        sources.push(entry.url);
        targets.push(target);
    }
    Ok((sources, targets))
}
