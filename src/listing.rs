//! Parser for `ls -l` output produced by the device shell
//!
//! Each line is dispatched on its leading mode character to a
//! [`ListingKind`]; the kind and the [`Dialect`] together pick a
//! [`FieldLayout`] that says where the size, timestamp and name live.
//! Everything from the name field onwards is taken verbatim, so names
//! containing spaces survive as long as the fixed columns before them
//! are well formed.
//!
//! Lines that cannot be parsed (`total 42`, shell error messages,
//! truncated output) yield `None` and are skipped by callers.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::path;

/// Timestamp format used by both toolbox and toybox `ls -l`
const LISTING_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Separator between a symlink's name and its target
const LINK_ARROW: &str = " -> ";

/// How a modification time ought to be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MtimeType {
    /// Locale of the timestamp is unknown
    #[default]
    Unknown,
    /// Local to the client, granular to at least the minute
    Local,
    /// Local to the device, granular to the minute
    RemoteMinute,
    /// Local to the device, granular to the day
    RemoteDay,
}

/// Which `ls` implementation produced the listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Decide per line: toybox prints a numeric link count in the second column
    #[default]
    Auto,
    /// Legacy Android toolbox: `mode owner group [size] date time name`
    Toolbox,
    /// Modern Android toybox: `mode links owner group size date time name`
    Toybox,
}

impl Dialect {
    fn detect(self, fields: &[&str]) -> Dialect {
        match self {
            Dialect::Auto => {
                let numeric_links = fields
                    .get(1)
                    .is_some_and(|f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()));
                if numeric_links {
                    Dialect::Toybox
                } else {
                    Dialect::Toolbox
                }
            }
            fixed => fixed,
        }
    }
}

/// Listing line variant, keyed on the leading mode character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingKind {
    /// `d`
    Directory,
    /// `-`
    File,
    /// `l`
    Symlink,
    /// `c` or `b`: device nodes carry `major, minor` instead of a size
    Device,
    /// `p` or `s`
    Special,
}

impl ListingKind {
    pub fn from_mode_char(c: char) -> Option<Self> {
        match c {
            'd' => Some(ListingKind::Directory),
            '-' => Some(ListingKind::File),
            'l' => Some(ListingKind::Symlink),
            'c' | 'b' => Some(ListingKind::Device),
            'p' | 's' => Some(ListingKind::Special),
            _ => None,
        }
    }

    /// Field positions for this kind of line in the given dialect
    pub fn layout(self, dialect: Dialect) -> FieldLayout {
        use ListingKind::*;
        match (dialect, self) {
            (Dialect::Toybox, File) => FieldLayout::new(Some(4), 5, 7),
            (Dialect::Toybox, Device) => FieldLayout::new(None, 6, 8),
            (Dialect::Toybox, _) => FieldLayout::new(None, 5, 7),
            (_, File) => FieldLayout::new(Some(3), 4, 6),
            (_, Device) => FieldLayout::new(None, 5, 7),
            (_, Directory | Symlink | Special) => FieldLayout::new(None, 3, 5),
        }
    }

    fn could_be_dir(self) -> bool {
        matches!(self, ListingKind::Directory | ListingKind::Symlink)
    }

    fn could_be_file(self) -> bool {
        !matches!(self, ListingKind::Directory)
    }
}

/// Zero-based whitespace field indices for one line variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    /// Byte size column, if the variant reports one
    pub size: Option<usize>,
    /// Date column; the time is the following column
    pub date: usize,
    /// First column of the name; the rest of the line belongs to it
    pub name: usize,
}

impl FieldLayout {
    const fn new(size: Option<usize>, date: usize, name: usize) -> Self {
        Self { size, date, name }
    }
}

/// One filesystem object as reported by a listing line
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    /// Leaf name
    pub name: String,
    /// The entry might be a directory (directories and unresolved links)
    pub could_be_dir: bool,
    /// The entry might be a retrievable file (everything but directories)
    pub could_be_file: bool,
    /// Size in bytes; 0 for directories and unresolved links
    pub size: u64,
    /// Modification time as printed by the device
    pub mtime: Option<NaiveDateTime>,
    pub mtime_type: MtimeType,
    /// Literal link target, only for symbolic links
    pub target: Option<String>,
    /// The line this entry was parsed from
    pub raw_line: String,
}

impl Entry {
    /// An unresolved symbolic link: both capabilities plus a target
    pub fn is_symlink(&self) -> bool {
        self.could_be_dir && self.could_be_file && self.target.is_some()
    }

    /// Directory as far as the adapter is concerned
    pub fn is_dir(&self) -> bool {
        self.could_be_dir
    }

    /// Plain file: anything that cannot be entered
    pub fn is_file(&self) -> bool {
        !self.could_be_dir && self.could_be_file
    }
}

/// Directory contents keyed by leaf name
pub type Listing = BTreeMap<String, Entry>;

/// Parse one line of `ls -l` output
pub fn parse_line(line: &str, dialect: Dialect) -> Option<Entry> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.split_whitespace().collect();
    let mode = *fields.first()?;
    if !looks_like_mode(mode) {
        return None;
    }
    let kind = ListingKind::from_mode_char(mode.chars().next()?)?;
    let layout = kind.layout(dialect.detect(&fields));

    let size = match layout.size {
        Some(idx) => fields.get(idx)?.parse::<u64>().ok()?,
        None => 0,
    };

    let date = fields.get(layout.date)?;
    let time = fields.get(layout.date + 1)?;
    let mtime =
        NaiveDateTime::parse_from_str(&format!("{} {}", date, time), LISTING_TIME_FORMAT).ok();

    let name_text = skip_fields(line, layout.name)?;
    let (name, target) = if kind == ListingKind::Symlink {
        let (name, target) = name_text.split_once(LINK_ARROW)?;
        (name.to_string(), Some(target.to_string()))
    } else {
        (name_text.to_string(), None)
    };

    if name.is_empty() {
        return None;
    }

    Some(Entry {
        name,
        could_be_dir: kind.could_be_dir(),
        could_be_file: kind.could_be_file(),
        size,
        mtime_type: if mtime.is_some() {
            MtimeType::RemoteMinute
        } else {
            MtimeType::Unknown
        },
        mtime,
        target,
        raw_line: line.to_string(),
    })
}

/// Parse a single-directory listing, skipping unparsable lines and `.`/`..`
pub fn parse_listing<'a, I>(lines: I, dialect: Dialect) -> Listing
where
    I: IntoIterator<Item = &'a str>,
{
    let mut listing = Listing::new();
    for line in lines {
        if let Some(entry) = parse_line(line, dialect) {
            if entry.name != "." && entry.name != ".." {
                listing.insert(entry.name.clone(), entry);
            }
        }
    }
    listing
}

/// Group `ls -l -R <base>` output into per-directory listings.
///
/// A line ending in `:` that is not itself an entry marks the start of a
/// new directory; lines before the first marker belong to `base`.
/// Relative markers (`./sub:`) are resolved against `base`.
pub fn group_recursive<'a, I>(base: &str, lines: I, dialect: Dialect) -> Vec<(String, Listing)>
where
    I: IntoIterator<Item = &'a str>,
{
    let base = path::abspath(base);
    let mut groups: Vec<(String, Listing)> = Vec::new();
    let mut current = (base.clone(), Listing::new());
    let mut seen_any = false;

    for line in lines {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(dir) = directory_marker(line) {
            if seen_any || !current.1.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
            current = (path::pathjoin(&base, dir), Listing::new());
            seen_any = true;
            continue;
        }
        if let Some(entry) = parse_line(line, dialect) {
            if entry.name != "." && entry.name != ".." {
                current.1.insert(entry.name.clone(), entry);
            }
        }
    }

    if seen_any || !current.1.is_empty() {
        groups.push(current);
    }
    groups
}

/// Byte size from `stat` output (`  Size: 1234  Blocks: ...`)
pub fn parse_stat_size<'a, I>(lines: I) -> Option<u64>
where
    I: IntoIterator<Item = &'a str>,
{
    lines.into_iter().find_map(|line| {
        let (_, rest) = line.split_once("Size:")?;
        rest.split_whitespace().next()?.parse::<u64>().ok()
    })
}

/// Directory named by a recursive-listing marker line, if this is one
fn directory_marker(line: &str) -> Option<&str> {
    let dir = line.strip_suffix(':')?;
    if dir.is_empty() {
        return None;
    }
    let first = dir.split_whitespace().next()?;
    if looks_like_mode(first) {
        return None;
    }
    Some(dir)
}

/// `drwxr-xr-x`, `-rw-r--r--`, `lrwxrwxrwx` and friends, optionally
/// followed by an ACL/SELinux marker
fn looks_like_mode(field: &str) -> bool {
    let bytes = field.as_bytes();
    if bytes.len() < 10 || ListingKind::from_mode_char(bytes[0] as char).is_none() {
        return false;
    }
    bytes[1..10]
        .iter()
        .all(|b| matches!(b, b'r' | b'w' | b'x' | b's' | b'S' | b't' | b'T' | b'-'))
}

/// The remainder of `line` after `n` whitespace-delimited fields
fn skip_fields(line: &str, n: usize) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}
