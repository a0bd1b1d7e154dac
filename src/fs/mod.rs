//! Filesystem adapter over a remote device session
//!
//! [`AdbFs`] turns the device's shell into a conventional filesystem.
//! Directory contents come from `ls -l` and are kept in a [`DirCache`];
//! every public call runs under one lock, so calls against one adapter are
//! totally ordered. Remote commands are issued synchronously on a runtime
//! the adapter owns, which means an `AdbFs` must not be driven from inside
//! another tokio runtime.

pub mod file;
mod walk;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Local, TimeZone};
use globset::{Glob, GlobMatcher};
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tracing::{debug, trace, warn};

use crate::cache::{CacheStats, DirCache};
use crate::error::{AdbFsError, Result};
use crate::listing::{self, Dialect, Entry, Listing};
use crate::path::{self, shell_quote};
use crate::session::{RemoteFailure, Reply, Session};

pub use file::{AdbFile, OpenMode};

/// Adapter construction options
#[derive(Debug, Clone)]
pub struct FsOptions {
    /// Keep directory listings between calls
    pub dircache: bool,
    /// Pre-populate the cache for the whole device tree on construction
    pub dircache_all: bool,
    /// Present symlinks as the entries they point at
    pub follow_symlinks: bool,
    /// Links followed before giving up with [`AdbFsError::LinkCycle`]
    pub max_link_hops: usize,
    pub dialect: Dialect,
    /// Where `open` puts local scratch copies; the OS temp dir if unset
    pub scratch_dir: Option<PathBuf>,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            dircache: true,
            dircache_all: false,
            follow_symlinks: false,
            max_link_hops: 32,
            dialect: Dialect::Auto,
            scratch_dir: None,
        }
    }
}

/// Shaping of `listdir` output
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Glob applied to leaf names
    pub wildcard: Option<String>,
    /// Return paths joined onto the listed directory, without the leading `/`
    pub full: bool,
    /// Return absolute paths
    pub absolute: bool,
    pub dirs_only: bool,
    pub files_only: bool,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wildcard(mut self, pattern: impl Into<String>) -> Self {
        self.wildcard = Some(pattern.into());
        self
    }

    pub fn full(mut self) -> Self {
        self.full = true;
        self
    }

    pub fn absolute(mut self) -> Self {
        self.absolute = true;
        self
    }

    pub fn dirs_only(mut self) -> Self {
        self.dirs_only = true;
        self
    }

    pub fn files_only(mut self) -> Self {
        self.files_only = true;
        self
    }

    fn matcher(&self) -> Result<Option<GlobMatcher>> {
        if self.dirs_only && self.files_only {
            return Err(AdbFsError::InvalidArgument(
                "dirs_only and files_only can not both be set".to_string(),
            ));
        }
        match &self.wildcard {
            None => Ok(None),
            Some(pattern) => Glob::new(pattern)
                .map(|glob| Some(glob.compile_matcher()))
                .map_err(|e| {
                    AdbFsError::InvalidArgument(format!("invalid wildcard '{}': {}", pattern, e))
                }),
        }
    }

    fn accepts(&self, matcher: Option<&GlobMatcher>, name: &str, entry: &Entry) -> bool {
        if self.dirs_only && !entry.is_dir() {
            return false;
        }
        if self.files_only && entry.is_dir() {
            return false;
        }
        matcher.map_or(true, |m| m.is_match(name))
    }

    fn render(&self, dir: &str, name: &str) -> String {
        if self.absolute {
            path::pathjoin(dir, name)
        } else if self.full {
            path::pathjoin(dir, name).trim_start_matches(path::SEP).to_string()
        } else {
            name.to_string()
        }
    }
}

/// Metadata for one path: the listing entry plus derived timestamps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Info {
    pub entry: Entry,
    pub modified_time: Option<DateTime<Local>>,
    /// Listings carry no creation time; this mirrors `modified_time`
    pub created_time: Option<DateTime<Local>>,
}

impl Info {
    pub fn from_entry(entry: Entry) -> Self {
        let modified = entry
            .mtime
            .and_then(|t| Local.from_local_datetime(&t).earliest());
        Self {
            entry,
            modified_time: modified,
            created_time: modified,
        }
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn size(&self) -> u64 {
        self.entry.size
    }

    pub fn is_dir(&self) -> bool {
        self.entry.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.entry.is_file()
    }

    pub fn is_symlink(&self) -> bool {
        self.entry.is_symlink()
    }

    pub fn target(&self) -> Option<&str> {
        self.entry.target.as_deref()
    }
}

fn list_command(dir: &str) -> String {
    format!("ls -l {}", shell_quote(&path::forcedir(dir)))
}

fn root_entry() -> Entry {
    Entry {
        could_be_dir: true,
        ..Default::default()
    }
}

struct State {
    cache: DirCache,
    cache_hint: bool,
}

pub(crate) struct Shared {
    session: Arc<dyn Session>,
    options: FsOptions,
    state: Mutex<State>,
    runtime: Runtime,
}

impl Shared {
    /// Run `f` under the adapter lock with the cache marked busy. When
    /// caching is off the cache is emptied again on the way out.
    fn guarded<T>(
        self: &Arc<Self>,
        op: &'static str,
        target: &str,
        f: impl FnOnce(&mut Ctx<'_>) -> Result<T>,
    ) -> Result<T> {
        trace!("{}: {}", op, target);
        let dircache = self.options.dircache;

        let mut state = self.state.lock();
        state.cache.enter();
        let mut state = scopeguard::guard(state, |mut state| {
            state.cache.leave();
            if !(dircache || state.cache_hint) {
                state.cache.clear();
            }
        });

        let mut ctx = Ctx {
            shared: self,
            state: &mut state,
        };
        let result = f(&mut ctx);
        if let Err(e) = &result {
            debug!("{} {} failed: {}", op, target, e);
        }
        result
    }
}

/// Operation context: the adapter with its lock held
struct Ctx<'a> {
    shared: &'a Arc<Shared>,
    state: &'a mut State,
}

impl Ctx<'_> {
    fn options(&self) -> &FsOptions {
        &self.shared.options
    }

    fn session(&self) -> &dyn Session {
        self.shared.session.as_ref()
    }

    fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.shared.runtime.block_on(future)
    }

    fn run(&self, command: String) -> Result<Reply> {
        self.block_on(self.session().run(&command))
    }

    /// Raw listing of `dir`, from cache or from the device
    fn fetch_listing(&mut self, dir: &str) -> Result<Listing> {
        let dir = path::abspath(dir);
        if let Some(listing) = self.state.cache.get(&dir) {
            return Ok(listing.clone());
        }

        let reply = self.run(list_command(&dir))?;
        let listing = self.listing_from_reply(&dir, &reply)?;
        self.state.cache.put(&dir, listing.clone());
        Ok(listing)
    }

    /// Fill the cache for several directories with one batched round trip
    fn prefetch(&mut self, dirs: Vec<String>) -> Result<()> {
        let mut wanted: Vec<String> = dirs
            .into_iter()
            .map(|d| path::abspath(&d))
            .filter(|d| !self.state.cache.is_fresh(d))
            .collect();
        wanted.sort();
        wanted.dedup();
        if wanted.len() < 2 {
            return Ok(());
        }

        debug!("prefetching {} listings", wanted.len());
        let commands: Vec<String> = wanted.iter().map(|d| list_command(d)).collect();
        let replies = self.block_on(self.session().run_batch(&commands))?;
        for (dir, reply) in wanted.iter().zip(&replies) {
            let listing = self.listing_from_reply(dir, reply)?;
            self.state.cache.put(dir, listing);
        }
        Ok(())
    }

    /// `ls` exits non-zero when any child is unreadable, so a failed reply
    /// still yields whatever entries it printed. Only a reply with no
    /// entries at all is classified, and only from its non-entry lines.
    fn listing_from_reply(&self, dir: &str, reply: &Reply) -> Result<Listing> {
        let dialect = self.options().dialect;
        let listing = listing::parse_listing(reply.lines.iter().map(String::as_str), dialect);
        if reply.success() {
            return Ok(listing);
        }

        let diagnostics: Vec<&str> = reply
            .lines
            .iter()
            .map(String::as_str)
            .filter(|line| {
                !line.starts_with("total ") && listing::parse_line(line, dialect).is_none()
            })
            .collect();
        let text = diagnostics.join("\n");
        if !listing.is_empty() {
            debug!("partial listing of {}: {}", dir, text);
            return Ok(listing);
        }

        match RemoteFailure::classify(&text) {
            RemoteFailure::DeviceUnavailable(msg) => Err(AdbFsError::DeviceUnavailable(msg)),
            _ => {
                debug!("no listing for {}: {}", dir, text);
                Ok(Listing::new())
            }
        }
    }

    /// Listing as presented to callers: resolved links in follow mode
    fn readdir(&mut self, dir: &str) -> Result<Listing> {
        let mut listing = self.fetch_listing(dir)?;
        if !self.options().follow_symlinks {
            return Ok(listing);
        }

        let links: Vec<Entry> = listing
            .values()
            .filter(|e| e.is_symlink())
            .cloned()
            .collect();
        let targets = links
            .iter()
            .filter_map(|link| link.target.as_deref())
            .map(|target| path::dirname(&path::pathjoin(dir, target)))
            .collect();
        self.prefetch(targets)?;

        for link in links {
            match self.resolve_entry(dir, &link) {
                Ok(resolved) => {
                    listing.insert(link.name.clone(), resolved);
                }
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => debug!(
                    "leaving {} unresolved: {}",
                    path::pathjoin(dir, &link.name),
                    e
                ),
            }
        }
        Ok(listing)
    }

    /// Follow `link` (found in `dir`) to the entry it finally names.
    /// The result keeps the link's own name and has no target.
    fn resolve_entry(&mut self, dir: &str, link: &Entry) -> Result<Entry> {
        let origin = path::pathjoin(dir, &link.name);
        let mut base = path::abspath(dir);
        let mut current = link.clone();
        let mut hops = 0;

        while current.is_symlink() {
            let Some(target) = current.target.clone() else {
                break;
            };
            if hops >= self.options().max_link_hops {
                return Err(AdbFsError::LinkCycle(origin));
            }
            hops += 1;

            let resolved = path::abspath(&path::pathjoin(&base, &target));
            if path::is_root(&resolved) {
                current = root_entry();
                break;
            }
            let (parent, leaf) = path::pathsplit(&resolved);
            trace!("resolve {}: hop {} -> {}", origin, hops, resolved);
            current = self
                .fetch_listing(&parent)?
                .remove(&leaf)
                .ok_or_else(|| AdbFsError::NotFound(resolved.clone()))?;
            base = parent;
        }

        current.name = link.name.clone();
        current.target = None;
        Ok(current)
    }

    /// Entry for `p` exactly as listed, links unresolved
    fn raw_entry(&mut self, p: &str) -> Result<Option<Entry>> {
        if path::is_root(p) {
            return Ok(Some(root_entry()));
        }
        let (dir, name) = path::pathsplit(p);
        Ok(self.fetch_listing(&dir)?.remove(&name))
    }

    /// Entry for `p` with any symlink followed to its target
    fn target_entry(&mut self, p: &str) -> Result<Option<Entry>> {
        match self.raw_entry(p)? {
            Some(entry) if entry.is_symlink() => {
                let dir = path::dirname(p);
                self.resolve_entry(&dir, &entry).map(Some)
            }
            other => Ok(other),
        }
    }

    /// Entry for `p` as callers see it, which depends on follow mode
    fn entry(&mut self, p: &str) -> Result<Option<Entry>> {
        if self.options().follow_symlinks {
            self.target_entry(p)
        } else {
            self.raw_entry(p)
        }
    }

    /// Entry lookup for the boolean queries: only transport problems are errors
    fn probe(&mut self, p: &str) -> Result<Option<Entry>> {
        match self.entry(p) {
            Ok(entry) => Ok(entry),
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                debug!("{} treated as unresolvable: {}", p, e);
                self.raw_entry(p)
            }
        }
    }

    fn exists(&mut self, p: &str) -> Result<bool> {
        Ok(self.raw_entry(p)?.is_some())
    }

    fn isdir(&mut self, p: &str) -> Result<bool> {
        Ok(self.probe(p)?.is_some_and(|e| e.is_dir()))
    }

    fn isfile(&mut self, p: &str) -> Result<bool> {
        if path::is_root(p) {
            return Ok(false);
        }
        Ok(self.probe(p)?.is_some_and(|e| e.is_file()))
    }

    fn require_dir(&mut self, p: &str) -> Result<()> {
        match self.entry(p)? {
            None => Err(AdbFsError::NotFound(p.to_string())),
            Some(e) if !e.is_dir() => Err(AdbFsError::ResourceInvalid(p.to_string())),
            Some(_) => Ok(()),
        }
    }

    fn listdir(&mut self, p: &str, options: &ListOptions) -> Result<Vec<(String, Entry)>> {
        let matcher = options.matcher()?;
        self.require_dir(p)?;
        let listing = self.readdir(p)?;
        Ok(listing
            .into_iter()
            .filter(|(name, entry)| options.accepts(matcher.as_ref(), name, entry))
            .map(|(name, entry)| (options.render(p, &name), entry))
            .collect())
    }

    fn getinfo(&mut self, p: &str) -> Result<Info> {
        self.entry(p)?
            .map(Info::from_entry)
            .ok_or_else(|| AdbFsError::NotFound(p.to_string()))
    }

    fn getsize(&mut self, p: &str) -> Result<u64> {
        let entry = self
            .entry(p)?
            .ok_or_else(|| AdbFsError::NotFound(p.to_string()))?;
        if !entry.is_dir() && !entry.is_symlink() {
            return Ok(entry.size);
        }

        let reply = self.run(format!("stat -L {}", shell_quote(p)))?;
        match reply.failure() {
            None => {
                if let Some(size) = listing::parse_stat_size(reply.lines.iter().map(String::as_str))
                {
                    return Ok(size);
                }
            }
            Some(RemoteFailure::DeviceUnavailable(msg)) => {
                return Err(AdbFsError::DeviceUnavailable(msg))
            }
            Some(failure) => debug!("stat {} failed: {:?}", p, failure),
        }

        if entry.is_symlink() {
            Err(AdbFsError::OperationFailed {
                op: "getsize",
                path: p.to_string(),
            })
        } else {
            Ok(entry.size)
        }
    }

    fn makedir(&mut self, p: &str, recursive: bool, allow_recreate: bool) -> Result<()> {
        if path::is_root(p) {
            return Ok(());
        }

        if recursive {
            for ancestor in path::recursepath(p).into_iter().skip(1) {
                match self.raw_entry(&ancestor)? {
                    Some(e) if e.is_dir() => {
                        if ancestor == p && !allow_recreate {
                            return Err(AdbFsError::DestinationExists(ancestor));
                        }
                    }
                    Some(_) => return Err(AdbFsError::ResourceInvalid(ancestor)),
                    None => self.mkdir_remote(&ancestor)?,
                }
            }
            return Ok(());
        }

        if !self.exists(&path::dirname(p))? {
            return Err(AdbFsError::ParentMissing(p.to_string()));
        }
        match self.raw_entry(p)? {
            Some(e) if !e.is_dir() => Err(AdbFsError::ResourceInvalid(p.to_string())),
            Some(_) if !allow_recreate => Err(AdbFsError::DestinationExists(p.to_string())),
            Some(_) => Ok(()),
            None => self.mkdir_remote(p),
        }
    }

    fn mkdir_remote(&mut self, p: &str) -> Result<()> {
        self.state.cache.invalidate(&path::dirname(p));
        let reply = self.run(format!("mkdir {}", shell_quote(p)))?;
        match reply.failure() {
            None => Ok(()),
            Some(RemoteFailure::NoSuchFile) => Err(AdbFsError::ParentMissing(p.to_string())),
            Some(failure) => Err(failure.into_error(p)),
        }
    }

    fn remove(&mut self, p: &str) -> Result<()> {
        let entry = self
            .raw_entry(p)?
            .ok_or_else(|| AdbFsError::NotFound(p.to_string()))?;
        if entry.is_dir() && !entry.is_symlink() {
            return Err(AdbFsError::ResourceInvalid(p.to_string()));
        }
        self.state.cache.invalidate(&path::dirname(p));
        self.run(format!("rm {}", shell_quote(p)))?.check(p)?;
        Ok(())
    }

    fn removedir(&mut self, p: &str, recursive: bool, force: bool) -> Result<()> {
        let entry = self
            .raw_entry(p)?
            .ok_or_else(|| AdbFsError::NotFound(p.to_string()))?;
        if !entry.is_dir() || entry.is_symlink() {
            return Err(AdbFsError::ResourceInvalid(p.to_string()));
        }
        if path::is_root(p) {
            return Err(AdbFsError::RemoveRoot(p.to_string()));
        }

        let children = self.fetch_listing(p)?;
        if !force && !children.is_empty() {
            return Err(AdbFsError::DirectoryNotEmpty(p.to_string()));
        }
        if force {
            for (name, child) in children {
                let child_path = path::pathjoin(p, &name);
                let result = if child.is_dir() && !child.is_symlink() {
                    self.removedir(&child_path, false, true)
                } else {
                    self.remove(&child_path)
                };
                if let Err(e) = result {
                    warn!("force removal skipped {}: {}", child_path, e);
                }
            }
        }

        let parent = path::dirname(p);
        self.state.cache.invalidate_prefix(&[parent.as_str(), p]);
        let reply = self.run(format!("rmdir {}", shell_quote(p)))?;
        self.state.cache.invalidate_prefix(&[parent.as_str(), p]);
        match reply.failure() {
            None => {}
            Some(RemoteFailure::NotEmpty) => {
                return Err(AdbFsError::DirectoryNotEmpty(p.to_string()))
            }
            Some(failure) => return Err(failure.into_error(p)),
        }

        if recursive && !path::is_root(&parent) {
            match self.removedir(&parent, true, false) {
                Ok(()) | Err(AdbFsError::DirectoryNotEmpty(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
        self.state.cache.invalidate(&path::dirname(src));
        self.state.cache.invalidate(&path::dirname(dst));

        let reply = self.run(format!("mv {} {}", shell_quote(src), shell_quote(dst)))?;
        match reply.failure() {
            None => {}
            Some(RemoteFailure::NoSuchFile) => {
                let text = reply.text();
                return Err(match (text.contains(src), text.contains(dst)) {
                    (true, false) => AdbFsError::NotFound(src.to_string()),
                    (false, true) => AdbFsError::ParentMissing(dst.to_string()),
                    _ if self.exists(src)? => AdbFsError::ParentMissing(dst.to_string()),
                    _ => AdbFsError::NotFound(src.to_string()),
                });
            }
            Some(RemoteFailure::NotADirectory) => {
                return Err(AdbFsError::ResourceInvalid(dst.to_string()))
            }
            Some(failure) => return Err(failure.into_error(src)),
        }

        self.state.cache.invalidate_prefix(&[src]);
        Ok(())
    }

    fn move_path(&mut self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        if !overwrite && self.exists(dst)? {
            return Err(AdbFsError::DestinationExists(dst.to_string()));
        }

        let result = match self.rename(src, dst) {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!("rename {} -> {} failed ({}), copying instead", src, dst, e);
                self.copy(src, dst, overwrite)
                    .and_then(|()| self.remove(src))
            }
        };

        let (src_parent, dst_parent) = (path::dirname(src), path::dirname(dst));
        for p in [src, src_parent.as_str(), dst, dst_parent.as_str()] {
            self.state.cache.invalidate(p);
        }
        result
    }

    fn copy(&mut self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        match self.target_entry(src)? {
            None => return Err(AdbFsError::NotFound(src.to_string())),
            Some(e) if e.is_dir() => return Err(AdbFsError::ResourceInvalid(src.to_string())),
            Some(_) => {}
        }
        if !overwrite && self.exists(dst)? {
            return Err(AdbFsError::DestinationExists(dst.to_string()));
        }

        let reply = self.run(format!("cp -r {} {}", shell_quote(src), shell_quote(dst)))?;
        self.state.cache.invalidate(&path::dirname(dst));
        match reply.failure() {
            None => Ok(()),
            Some(RemoteFailure::NoSuchFile) => Err(AdbFsError::ParentMissing(dst.to_string())),
            Some(failure) => Err(failure.into_error(dst)),
        }
    }

    fn cache_all(&mut self) -> Result<usize> {
        let reply = self.run(format!("ls -l -R {}", shell_quote(path::ROOT)))?;
        if let Some(RemoteFailure::DeviceUnavailable(msg)) = reply.failure() {
            return Err(AdbFsError::DeviceUnavailable(msg));
        }
        let groups = listing::group_recursive(
            path::ROOT,
            reply.lines.iter().map(String::as_str),
            self.options().dialect,
        );
        Ok(self.state.cache.prepopulate(groups))
    }
}

/// Filesystem view of one device
///
/// Cloning is cheap; clones share the cache, the lock and the runtime.
#[derive(Clone)]
pub struct AdbFs {
    shared: Arc<Shared>,
}

impl AdbFs {
    /// Build an adapter over `session`. With `dircache_all` set this
    /// performs the whole-tree listing before returning.
    pub fn new(session: Arc<dyn Session>, options: FsOptions) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("adbfs-io")
            .enable_all()
            .build()?;

        let fs = Self {
            shared: Arc::new(Shared {
                session,
                options,
                state: Mutex::new(State {
                    cache: DirCache::new(),
                    cache_hint: false,
                }),
                runtime,
            }),
        };

        if fs.shared.options.dircache_all {
            let count = fs.cache_all()?;
            debug!("preloaded {} directories", count);
        }
        Ok(fs)
    }

    pub fn options(&self) -> &FsOptions {
        &self.shared.options
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.shared.session
    }

    fn guarded<T>(
        &self,
        op: &'static str,
        target: &str,
        f: impl FnOnce(&mut Ctx<'_>) -> Result<T>,
    ) -> Result<T> {
        self.shared.guarded(op, target, f)
    }

    pub fn exists(&self, p: &str) -> Result<bool> {
        let p = path::abspath(p);
        self.guarded("exists", &p, |ctx| ctx.exists(&p))
    }

    pub fn isdir(&self, p: &str) -> Result<bool> {
        let p = path::abspath(p);
        self.guarded("isdir", &p, |ctx| ctx.isdir(&p))
    }

    pub fn isfile(&self, p: &str) -> Result<bool> {
        let p = path::abspath(p);
        self.guarded("isfile", &p, |ctx| ctx.isfile(&p))
    }

    pub fn listdir(&self, p: &str, options: &ListOptions) -> Result<Vec<String>> {
        let p = path::abspath(p);
        self.guarded("listdir", &p, |ctx| {
            Ok(ctx
                .listdir(&p, options)?
                .into_iter()
                .map(|(name, _)| name)
                .collect())
        })
    }

    /// Like [`AdbFs::listdir`] but with metadata for each child
    pub fn listdirinfo(&self, p: &str, options: &ListOptions) -> Result<Vec<(String, Info)>> {
        let p = path::abspath(p);
        self.guarded("listdirinfo", &p, |ctx| {
            Ok(ctx
                .listdir(&p, options)?
                .into_iter()
                .map(|(name, entry)| (name, Info::from_entry(entry)))
                .collect())
        })
    }

    pub fn getinfo(&self, p: &str) -> Result<Info> {
        let p = path::abspath(p);
        self.guarded("getinfo", &p, |ctx| ctx.getinfo(&p))
    }

    /// Size in bytes, from the listing when it is reliable, else from `stat`
    pub fn getsize(&self, p: &str) -> Result<u64> {
        let p = path::abspath(p);
        self.guarded("getsize", &p, |ctx| ctx.getsize(&p))
    }

    /// The listing line the entry was parsed from
    pub fn desc(&self, p: &str) -> Result<String> {
        let p = path::abspath(p);
        self.guarded("desc", &p, |ctx| {
            let entry = ctx
                .raw_entry(&p)?
                .ok_or_else(|| AdbFsError::NotFound(p.clone()))?;
            Ok(if entry.raw_line.is_empty() {
                "No description available".to_string()
            } else {
                entry.raw_line
            })
        })
    }

    /// Open a remote file through a local scratch copy. `mode` takes the
    /// usual `r`, `w`, `a` with optional `+`, `b` and `t`.
    pub fn open(&self, p: &str, mode: &str) -> Result<AdbFile> {
        let mode = OpenMode::parse(mode)?;
        let p = path::abspath(p);
        self.guarded("open", &p, |ctx| file::open(ctx, &p, mode))
    }

    /// Replace the contents of a remote file in one transfer
    pub fn setcontents(&self, p: &str, data: impl Into<Bytes>) -> Result<()> {
        let p = path::abspath(p);
        let data = data.into();
        self.guarded("setcontents", &p, |ctx| {
            ctx.state.cache.invalidate(&path::dirname(&p));
            match ctx.block_on(ctx.session().write_raw(&p, data)) {
                Err(AdbFsError::NotFound(_)) => Err(AdbFsError::ParentMissing(p.clone())),
                other => other,
            }
        })
    }

    pub fn getcontents(&self, p: &str) -> Result<Bytes> {
        let p = path::abspath(p);
        self.guarded("getcontents", &p, |ctx| {
            ctx.block_on(ctx.session().read_raw(&p))
        })
    }

    pub fn getcontents_text(&self, p: &str) -> Result<String> {
        let data = self.getcontents(p)?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    pub fn makedir(&self, p: &str, recursive: bool, allow_recreate: bool) -> Result<()> {
        let p = path::abspath(p);
        self.guarded("makedir", &p, |ctx| ctx.makedir(&p, recursive, allow_recreate))
    }

    /// Remove a file or symlink
    pub fn remove(&self, p: &str) -> Result<()> {
        let p = path::abspath(p);
        self.guarded("remove", &p, |ctx| ctx.remove(&p))
    }

    /// Remove a directory.
    ///
    /// `force` deletes the contents first, skipping children that fail.
    /// `recursive` then also removes parents that became empty.
    pub fn removedir(&self, p: &str, recursive: bool, force: bool) -> Result<()> {
        let p = path::abspath(p);
        self.guarded("removedir", &p, |ctx| ctx.removedir(&p, recursive, force))
    }

    pub fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let (src, dst) = (path::abspath(src), path::abspath(dst));
        self.guarded("rename", &src, |ctx| ctx.rename(&src, &dst))
    }

    /// Rename, falling back to copy and remove
    pub fn move_path(&self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        let (src, dst) = (path::abspath(src), path::abspath(dst));
        self.guarded("move", &src, |ctx| ctx.move_path(&src, &dst, overwrite))
    }

    /// Copy a file on the device
    pub fn copy(&self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        let (src, dst) = (path::abspath(src), path::abspath(dst));
        self.guarded("copy", &src, |ctx| ctx.copy(&src, &dst, overwrite))
    }

    pub fn copydir(&self, src: &str, dst: &str, overwrite: bool, ignore_errors: bool) -> Result<()> {
        let (src, dst) = (path::abspath(src), path::abspath(dst));
        self.guarded("copydir", &src, |ctx| {
            ctx.state.cache.invalidate_prefix(&[path::dirname(&dst)]);
            ctx.copydir(&src, &dst, overwrite, ignore_errors)
        })
    }

    pub fn movedir(&self, src: &str, dst: &str, overwrite: bool, ignore_errors: bool) -> Result<()> {
        let (src, dst) = (path::abspath(src), path::abspath(dst));
        self.guarded("movedir", &src, |ctx| {
            ctx.state
                .cache
                .invalidate_prefix(&[path::dirname(&src), path::dirname(&dst)]);
            ctx.movedir(&src, &dst, overwrite, ignore_errors)
        })
    }

    /// Drop cached listings at and below `paths`, or everything if empty
    pub fn clear_dircache(&self, paths: &[&str]) {
        let mut state = self.shared.state.lock();
        if paths.is_empty() {
            state.cache.clear();
        } else {
            state.cache.invalidate_prefix(paths);
        }
    }

    /// Drop the cached listing of exactly these directories
    pub fn refresh_dircache(&self, paths: &[&str]) {
        let mut state = self.shared.state.lock();
        for p in paths {
            state.cache.invalidate(p);
        }
    }

    /// Keep listings between calls even when `dircache` is off
    pub fn cache_hint(&self, enabled: bool) {
        self.shared.state.lock().cache_hint = enabled;
    }

    /// Load every directory on the device with one recursive listing
    pub fn cache_all(&self) -> Result<usize> {
        self.guarded("cache_all", path::ROOT, |ctx| ctx.cache_all())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.state.lock().cache.stats()
    }

    /// True if `dir` has a listing that would be served from cache
    pub fn is_cached(&self, dir: &str) -> bool {
        self.shared.state.lock().cache.is_fresh(dir)
    }

    /// Guarded operations in flight; zero whenever no call is running
    pub fn cache_busy(&self) -> usize {
        self.shared.state.lock().cache.busy()
    }

    /// Copy a local file onto the device
    pub fn push(&self, local: &Path, remote: &str) -> Result<()> {
        let remote = path::abspath(remote);
        self.guarded("push", &remote, |ctx| {
            ctx.state.cache.invalidate(&path::dirname(&remote));
            ctx.block_on(ctx.session().push(local, &remote))
        })
    }

    /// Copy a device file to the local filesystem
    pub fn pull(&self, remote: &str, local: &Path) -> Result<()> {
        let remote = path::abspath(remote);
        self.guarded("pull", &remote, |ctx| {
            ctx.block_on(ctx.session().pull(&remote, local))
        })
    }

    /// Wait for the device to come back, then forget everything cached
    pub fn wait_for_device(&self) -> Result<()> {
        self.guarded("wait_for_device", path::ROOT, |ctx| {
            ctx.block_on(ctx.session().wait_for_device())?;
            ctx.state.cache.clear();
            Ok(())
        })
    }
}

impl fmt::Display for AdbFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<AdbFs {}>", self.shared.session.description())
    }
}

impl fmt::Debug for AdbFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdbFs")
            .field("session", &self.shared.session.description())
            .field("options", &self.shared.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryDevice;

    fn adapter(options: FsOptions) -> (Arc<MemoryDevice>, AdbFs) {
        let device = Arc::new(MemoryDevice::new());
        let fs = AdbFs::new(device.clone(), options).unwrap();
        (device, fs)
    }

    #[test]
    fn test_root_queries() {
        let (_, fs) = adapter(FsOptions::default());
        assert!(fs.exists("/").unwrap());
        assert!(fs.isdir("").unwrap());
        assert!(!fs.isfile("/").unwrap());
        assert!(fs.getinfo("/").unwrap().is_dir());
    }

    #[test]
    fn test_listing_is_cached_between_calls() {
        let (device, fs) = adapter(FsOptions::default());
        device.add_file("/a/x", "1");
        assert!(fs.exists("/a/x").unwrap());
        assert!(fs.isfile("/a/x").unwrap());
        assert_eq!(device.count_commands("ls -l '/a/'"), 1);
        assert!(fs.is_cached("/a"));
        assert_eq!(fs.cache_busy(), 0);
    }

    #[test]
    fn test_disabled_cache_is_cleared_after_each_call() {
        let (device, fs) = adapter(FsOptions {
            dircache: false,
            ..Default::default()
        });
        device.add_file("/a/x", "1");
        assert!(fs.exists("/a/x").unwrap());
        assert!(fs.exists("/a/x").unwrap());
        assert_eq!(device.count_commands("ls -l '/a/'"), 2);
        assert!(!fs.is_cached("/a"));

        fs.cache_hint(true);
        fs.exists("/a/x").unwrap();
        fs.exists("/a/x").unwrap();
        assert_eq!(device.count_commands("ls -l '/a/'"), 3);
    }

    #[test]
    fn test_listdir_options() {
        let (device, fs) = adapter(FsOptions::default());
        device.add_file("/d/a.txt", "1");
        device.add_file("/d/b.log", "2");
        device.add_dir("/d/sub");

        let all = fs.listdir("/d", &ListOptions::new()).unwrap();
        assert_eq!(all, vec!["a.txt", "b.log", "sub"]);
        let txt = fs.listdir("/d", &ListOptions::new().wildcard("*.txt")).unwrap();
        assert_eq!(txt, vec!["a.txt"]);
        let dirs = fs.listdir("/d", &ListOptions::new().dirs_only()).unwrap();
        assert_eq!(dirs, vec!["sub"]);
        let files = fs
            .listdir("/d", &ListOptions::new().files_only().absolute())
            .unwrap();
        assert_eq!(files, vec!["/d/a.txt", "/d/b.log"]);
        let full = fs.listdir("/d", &ListOptions::new().dirs_only().full()).unwrap();
        assert_eq!(full, vec!["d/sub"]);

        let err = fs
            .listdir("/d", &ListOptions::new().dirs_only().files_only())
            .unwrap_err();
        assert!(matches!(err, AdbFsError::InvalidArgument(_)));
    }

    #[test]
    fn test_listdir_errors() {
        let (device, fs) = adapter(FsOptions::default());
        device.add_file("/f", "1");
        assert!(matches!(
            fs.listdir("/missing", &ListOptions::new()),
            Err(AdbFsError::NotFound(_))
        ));
        assert!(matches!(
            fs.listdir("/f", &ListOptions::new()),
            Err(AdbFsError::ResourceInvalid(_))
        ));
    }

    #[test]
    fn test_listdirinfo() {
        let (device, fs) = adapter(FsOptions::default());
        device.add_file("/d/a.txt", "abc");
        let infos = fs.listdirinfo("/d", &ListOptions::new()).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].0, "a.txt");
        assert_eq!(infos[0].1.size(), 3);
        assert!(infos[0].1.modified_time.is_some());
        assert_eq!(infos[0].1.modified_time, infos[0].1.created_time);
    }

    #[test]
    fn test_getsize_and_desc() {
        let (device, fs) = adapter(FsOptions::default());
        device.add_file("/d/a.txt", "abcd");
        device.add_symlink("/d/link", "a.txt");
        device.add_symlink("/d/dangling", "nowhere");

        assert_eq!(fs.getsize("/d/a.txt").unwrap(), 4);
        assert_eq!(fs.getsize("/d/link").unwrap(), 4);
        assert!(matches!(
            fs.getsize("/d/dangling"),
            Err(AdbFsError::OperationFailed { op: "getsize", .. })
        ));
        assert!(matches!(fs.getsize("/d/nope"), Err(AdbFsError::NotFound(_))));
        assert!(fs.desc("/d/a.txt").unwrap().ends_with(" a.txt"));
        assert_eq!(fs.desc("/").unwrap(), "No description available");
    }

    #[test]
    fn test_makedir_errors() {
        let (device, fs) = adapter(FsOptions::default());
        device.add_file("/f", "1");
        assert!(matches!(
            fs.makedir("/x/y", false, false),
            Err(AdbFsError::ParentMissing(_))
        ));
        assert!(matches!(
            fs.makedir("/f", false, true),
            Err(AdbFsError::ResourceInvalid(_))
        ));
        fs.makedir("/d", false, false).unwrap();
        assert!(matches!(
            fs.makedir("/d", false, false),
            Err(AdbFsError::DestinationExists(_))
        ));
        assert!(matches!(
            fs.makedir("/f/sub", true, false),
            Err(AdbFsError::ResourceInvalid(_))
        ));
    }

    #[test]
    fn test_remove_checks() {
        let (device, fs) = adapter(FsOptions::default());
        device.add_dir("/d");
        device.add_symlink("/l", "/d");
        assert!(matches!(fs.remove("/d"), Err(AdbFsError::ResourceInvalid(_))));
        assert!(matches!(fs.remove("/nope"), Err(AdbFsError::NotFound(_))));
        fs.remove("/l").unwrap();
        assert!(!device.exists("/l"));
        assert!(device.exists("/d"));
    }

    #[test]
    fn test_removedir_checks() {
        let (device, fs) = adapter(FsOptions::default());
        device.add_file("/d/f", "1");
        assert!(matches!(
            fs.removedir("/", false, true),
            Err(AdbFsError::RemoveRoot(_))
        ));
        assert!(matches!(
            fs.removedir("/d", false, false),
            Err(AdbFsError::DirectoryNotEmpty(_))
        ));
        assert!(matches!(
            fs.removedir("/d/f", false, false),
            Err(AdbFsError::ResourceInvalid(_))
        ));
        assert!(matches!(
            fs.removedir("/e", false, false),
            Err(AdbFsError::NotFound(_))
        ));
    }

    #[test]
    fn test_removedir_recursive_climbs_empty_parents() {
        let (device, fs) = adapter(FsOptions::default());
        device.add_dir("/a/b/c");
        device.add_file("/keep", "1");
        fs.removedir("/a/b/c", true, false).unwrap();
        assert!(!device.exists("/a"));
        assert!(device.exists("/keep"));

        device.add_dir("/x/y");
        device.add_file("/x/other", "1");
        fs.removedir("/x/y", true, false).unwrap();
        assert!(device.exists("/x/other"));
        assert!(!fs.exists("/x/y").unwrap());
    }

    #[test]
    fn test_rename_classification() {
        let (device, fs) = adapter(FsOptions::default());
        device.add_file("/a/f", "1");
        assert!(matches!(
            fs.rename("/a/missing", "/a/g"),
            Err(AdbFsError::NotFound(p)) if p == "/a/missing"
        ));
        assert!(matches!(
            fs.rename("/a/f", "/nodir/g"),
            Err(AdbFsError::ParentMissing(p)) if p == "/nodir/g"
        ));
    }

    #[test]
    fn test_move_and_copy() {
        let (device, fs) = adapter(FsOptions::default());
        device.add_file("/a/f", "1");
        device.add_file("/a/g", "2");
        device.add_dir("/a/d");

        assert!(matches!(
            fs.move_path("/a/f", "/a/g", false),
            Err(AdbFsError::DestinationExists(_))
        ));
        fs.move_path("/a/f", "/a/h", false).unwrap();
        assert!(!fs.exists("/a/f").unwrap());
        assert_eq!(device.contents("/a/h"), Some(b"1".to_vec()));

        assert!(matches!(
            fs.copy("/a/d", "/a/e", false),
            Err(AdbFsError::ResourceInvalid(_))
        ));
        assert!(matches!(
            fs.copy("/a/h", "/a/g", false),
            Err(AdbFsError::DestinationExists(_))
        ));
        fs.copy("/a/h", "/a/g", true).unwrap();
        assert_eq!(fs.getcontents_text("/a/g").unwrap(), "1");
        assert!(fs.exists("/a/h").unwrap());
    }

    #[test]
    fn test_setcontents() {
        let (device, fs) = adapter(FsOptions::default());
        device.add_dir("/a");
        assert!(!fs.exists("/a/f").unwrap());
        fs.setcontents("/a/f", "hello").unwrap();
        assert!(fs.exists("/a/f").unwrap());
        assert_eq!(fs.getsize("/a/f").unwrap(), 5);
        assert!(matches!(
            fs.setcontents("/b/f", "x"),
            Err(AdbFsError::ParentMissing(_))
        ));
    }

    #[test]
    fn test_clear_and_refresh_dircache() {
        let (device, fs) = adapter(FsOptions::default());
        device.add_dir("/a/b");
        fs.exists("/a/b/x").unwrap();
        fs.exists("/a/x").unwrap();
        assert!(fs.is_cached("/a") && fs.is_cached("/a/b"));

        fs.refresh_dircache(&["/a"]);
        assert!(!fs.is_cached("/a"));
        assert!(fs.is_cached("/a/b"));

        fs.clear_dircache(&["/a"]);
        assert!(!fs.is_cached("/a/b"));

        fs.exists("/a/x").unwrap();
        fs.clear_dircache(&[]);
        assert!(!fs.is_cached("/a"));
    }

    #[test]
    fn test_cache_all_preloads_tree() {
        let device = Arc::new(MemoryDevice::new());
        device.add_file("/a/b/f", "1");
        let fs = AdbFs::new(
            device.clone(),
            FsOptions {
                dircache_all: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(fs.is_cached("/a/b"));
        device.clear_commands();
        assert!(fs.isfile("/a/b/f").unwrap());
        assert!(device.commands().is_empty());
    }

    #[test]
    fn test_device_unavailable_surfaces() {
        let (device, fs) = adapter(FsOptions::default());
        device.set_online(false);
        let err = fs.exists("/a").unwrap_err();
        assert!(err.is_device_unavailable());
        assert_eq!(fs.cache_busy(), 0);
        fs.wait_for_device().unwrap();
        assert!(!fs.exists("/a").unwrap());
    }

    /// Session answering `ls` with canned replies
    struct CannedListings(std::collections::HashMap<String, Reply>);

    #[async_trait::async_trait]
    impl Session for CannedListings {
        async fn run_batch(&self, commands: &[String]) -> Result<Vec<Reply>> {
            Ok(commands
                .iter()
                .map(|c| {
                    self.0.get(c).cloned().unwrap_or_else(|| {
                        Reply::failed(format!("ls: {}: No such file or directory", c), 1)
                    })
                })
                .collect())
        }

        async fn read_raw(&self, path: &str) -> Result<Bytes> {
            Err(AdbFsError::NotFound(path.to_string()))
        }

        async fn write_raw(&self, path: &str, _data: Bytes) -> Result<()> {
            Err(AdbFsError::PermissionDenied(path.to_string()))
        }

        async fn pull(&self, remote: &str, _local: &Path) -> Result<()> {
            Err(AdbFsError::NotFound(remote.to_string()))
        }

        async fn push(&self, _local: &Path, remote: &str) -> Result<()> {
            Err(AdbFsError::PermissionDenied(remote.to_string()))
        }

        async fn wait_for_device(&self) -> Result<()> {
            Ok(())
        }

        fn description(&self) -> String {
            "canned".to_string()
        }
    }

    fn canned(replies: &[(&str, &[&str], i32)]) -> AdbFs {
        let replies = replies
            .iter()
            .map(|(dir, lines, status)| {
                let reply = Reply {
                    lines: lines.iter().map(|l| l.to_string()).collect(),
                    status: *status,
                };
                (list_command(dir), reply)
            })
            .collect();
        AdbFs::new(Arc::new(CannedListings(replies)), FsOptions::default()).unwrap()
    }

    #[test]
    fn test_partial_listing_keeps_readable_entries() {
        let fs = canned(&[(
            "/",
            &[
                "total 3",
                "drwxrwx--x 4 system system 4096 2023-04-01 10:20 sdcard",
                "ls: /cache: Permission denied",
                "drwxr-xr-x 12 root root 4096 2023-04-01 10:20 system",
            ],
            1,
        )]);
        let names = fs.listdir("/", &ListOptions::new()).unwrap();
        assert_eq!(names, vec!["sdcard", "system"]);
        assert!(fs.exists("/sdcard").unwrap());
        assert!(fs.isdir("/system").unwrap());
        assert!(!fs.exists("/cache").unwrap());
    }

    #[test]
    fn test_unreadable_directory_lists_empty() {
        let fs = canned(&[("/d", &["ls: /d: Permission denied"], 1)]);
        assert!(!fs.exists("/d/x").unwrap());
        assert!(fs.is_cached("/d"));
    }

    #[test]
    fn test_device_words_in_names_are_not_device_errors() {
        let fs = canned(&[(
            "/d",
            &[
                "-rw-r--r-- 1 root root 3 2023-04-01 10:20 unauthorized_apps.txt",
                "-rw-r--r-- 1 root root 3 2023-04-01 10:20 device offline.log",
                "ls: /d/x: Permission denied",
            ],
            1,
        )]);
        assert!(fs.exists("/d/unauthorized_apps.txt").unwrap());
        assert!(fs.isfile("/d/device offline.log").unwrap());

        let fs = canned(&[("/e", &["ls: /e/no devices.txt: Permission denied"], 1)]);
        assert!(!fs.exists("/e/x").unwrap());
    }

    #[test]
    fn test_adb_diagnostic_in_listing_is_device_error() {
        let fs = canned(&[("/d", &["error: no devices/emulators found"], 1)]);
        assert!(fs.exists("/d/x").unwrap_err().is_device_unavailable());
        assert_eq!(fs.cache_busy(), 0);
    }

    #[test]
    fn test_following_listing_prefetches_link_targets() {
        let (device, fs) = adapter(FsOptions {
            follow_symlinks: true,
            ..Default::default()
        });
        device.add_file("/x/one", "1");
        device.add_file("/y/two", "22");
        device.add_symlink("/links/a", "/x/one");
        device.add_symlink("/links/b", "../y/two");

        let infos = fs.listdirinfo("/links", &ListOptions::new()).unwrap();
        let sizes: Vec<u64> = infos.iter().map(|(_, info)| info.size()).collect();
        assert_eq!(sizes, vec![1, 2]);
        assert!(fs.is_cached("/x") && fs.is_cached("/y"));
        assert_eq!(device.count_commands("ls -l '/x/'"), 1);
        assert_eq!(device.count_commands("ls -l '/y/'"), 1);
    }

    #[test]
    fn test_display() {
        let (_, fs) = adapter(FsOptions::default());
        assert_eq!(fs.to_string(), "<AdbFs in-memory device>");
    }
}
