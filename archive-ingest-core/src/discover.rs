//! File discovery in natural (human) order.
//!
//! A [`Discoverer`] walks a source root depth-first. Entries of every directory are
//! sorted with [`natural_cmp`], so `scan2.pdf` comes before `scan10.pdf` and
//! `box2/` is descended into before `box10/`. Anything that is not a regular file,
//! and anything that cannot be read, is skipped with a warning.

use chrono::Utc;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::contract::SourceItem;

/// Walks one source root. Cheap to hold; every call to [`Discoverer::items`] starts a
/// fresh walk.
#[derive(Debug, Clone)]
pub struct Discoverer {
    root: PathBuf,
    follow_links: bool,
}

impl Discoverer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            follow_links: false,
        }
    }

    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    /// Lazily yields every regular file under the root in natural order.
    pub fn items(&self) -> impl Iterator<Item = SourceItem> + '_ {
        WalkDir::new(&self.root)
            .follow_links(self.follow_links)
            .sort_by(|a, b| {
                natural_cmp(&a.file_name().to_string_lossy(), &b.file_name().to_string_lossy())
            })
            .into_iter()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(
                            path = ?e.path(),
                            error = %e,
                            "[DISCOVER] Skipping unreadable entry"
                        );
                        return None;
                    }
                };
                let file_type = entry.file_type();
                if file_type.is_dir() {
                    return None;
                }
                if !file_type.is_file() {
                    warn!(path = %entry.path().display(), "[DISCOVER] Skipping non-file entry");
                    return None;
                }
                let size = match entry.metadata() {
                    Ok(meta) => meta.len(),
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "[DISCOVER] Skipping entry without metadata");
                        return None;
                    }
                };
                let relative_path = entry
                    .path()
                    .strip_prefix(&self.root)
                    .unwrap_or(entry.path())
                    .to_path_buf();
                let sort_key = slash_path(&relative_path);
                Some((entry.into_path(), relative_path, sort_key, size))
            })
            .enumerate()
            .map(|(sequence, (path, relative_path, sort_key, size))| {
                debug!(sequence, path = %path.display(), size, "[DISCOVER] Found file");
                SourceItem {
                    sequence,
                    path,
                    relative_path,
                    sort_key,
                    size,
                    discovered_at: Utc::now(),
                }
            })
    }
}

/// Joins path components with `/` regardless of platform.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Natural ("alphanumeric") ordering of two names.
///
/// Runs of ASCII digits compare by numeric value, everything else compares
/// case-insensitively. Ties fall back to fewer leading zeros, then to a plain
/// byte comparison so the order is total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    let mut zeros_tiebreak = Ordering::Equal;

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => break,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_run = take_digits(&mut left);
                let r_run = take_digits(&mut right);
                let l_trim = l_run.trim_start_matches('0');
                let r_trim = r_run.trim_start_matches('0');
                let ord = l_trim
                    .len()
                    .cmp(&r_trim.len())
                    .then_with(|| l_trim.cmp(r_trim));
                if ord != Ordering::Equal {
                    return ord;
                }
                if zeros_tiebreak == Ordering::Equal {
                    zeros_tiebreak = l_run.len().cmp(&r_run.len());
                }
            }
            (Some(l), Some(r)) => {
                let ord = l.to_lowercase().cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }

    zeros_tiebreak.then_with(|| a.cmp(b))
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        chars.next();
    }
    run
}
