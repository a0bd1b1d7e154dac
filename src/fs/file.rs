//! Remote files opened through a local scratch copy
//!
//! Opening pulls the remote file into a temporary file, reads and writes
//! go to that copy, and closing pushes it back if anything changed.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::{AdbFsError, Result};
use crate::path;

use super::{Ctx, Shared};

/// Parsed `open` mode string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
}

impl OpenMode {
    /// Parse `r`, `w` or `a`, optionally followed by `+`, `b` or `t`
    pub fn parse(mode: &str) -> Result<Self> {
        let invalid = || AdbFsError::InvalidArgument(format!("invalid open mode '{}'", mode));
        let mut chars = mode.chars();
        let mut parsed = match chars.next() {
            Some('r') => Self {
                read: true,
                write: false,
                append: false,
                truncate: false,
            },
            Some('w') => Self {
                read: false,
                write: true,
                append: false,
                truncate: true,
            },
            Some('a') => Self {
                read: false,
                write: true,
                append: true,
                truncate: false,
            },
            _ => return Err(invalid()),
        };
        for c in chars {
            match c {
                '+' => {
                    parsed.read = true;
                    parsed.write = true;
                }
                'b' | 't' => {}
                _ => return Err(invalid()),
            }
        }
        Ok(parsed)
    }

    /// Modes that refuse to create the file
    pub fn requires_existing(&self) -> bool {
        !self.truncate
    }
}

pub(super) fn open(ctx: &mut Ctx<'_>, p: &str, mode: OpenMode) -> Result<AdbFile> {
    let entry = match ctx.target_entry(p) {
        Err(AdbFsError::NotFound(_)) if !mode.requires_existing() => None,
        other => other?,
    };
    match &entry {
        Some(e) if e.is_dir() => return Err(AdbFsError::ResourceInvalid(p.to_string())),
        None if mode.requires_existing() => return Err(AdbFsError::NotFound(p.to_string())),
        _ => {}
    }

    if mode.write {
        ctx.state.cache.invalidate(&path::dirname(p));
    }

    let mut builder = tempfile::Builder::new();
    builder.prefix("adbfs-");
    let scratch = match &ctx.options().scratch_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    }
    .into_temp_path();

    if entry.is_some() && !mode.truncate {
        ctx.block_on(ctx.session().pull(p, &scratch))?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .append(mode.append)
        .open(&scratch)?;
    debug!("opened {} via {}", p, scratch.display());

    Ok(AdbFile {
        shared: ctx.shared.clone(),
        path: p.to_string(),
        mode,
        file,
        scratch,
        changed: mode.truncate,
        closed: false,
    })
}

/// Open remote file
///
/// Dropping the handle closes it; call [`AdbFile::close`] to see whether
/// the final push succeeded.
pub struct AdbFile {
    shared: Arc<Shared>,
    path: String,
    mode: OpenMode,
    file: File,
    scratch: TempPath,
    changed: bool,
    closed: bool,
}

impl AdbFile {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// True once the local copy differs from what was pulled
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    fn invalidate_parent(&self, op: &'static str) -> Result<()> {
        let parent = path::dirname(&self.path);
        self.shared.guarded(op, &self.path, |ctx| {
            ctx.state.cache.invalidate(&parent);
            Ok(())
        })
    }

    pub fn truncate(&mut self, size: u64) -> Result<()> {
        if !self.mode.write {
            return Err(AdbFsError::PermissionDenied(self.path.clone()));
        }
        self.file.set_len(size)?;
        self.changed = true;
        self.invalidate_parent("truncate")
    }

    /// Push pending changes and release the scratch copy
    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.changed {
            return Ok(());
        }

        self.file.flush()?;
        let parent = path::dirname(&self.path);
        let (remote, local) = (&self.path, &self.scratch);
        self.shared.guarded("close", remote, |ctx| {
            ctx.state.cache.invalidate(&parent);
            ctx.block_on(ctx.session().push(local, remote))
        })
    }

    fn denied(&self, what: &str) -> io::Error {
        io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{} not open for {}", self.path, what),
        )
    }
}

impl Read for AdbFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.mode.read {
            return Err(self.denied("reading"));
        }
        self.file.read(buf)
    }
}

impl Write for AdbFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.mode.write {
            return Err(self.denied("writing"));
        }
        let written = self.file.write(buf)?;
        self.changed |= written > 0;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.invalidate_parent("flush").map_err(io::Error::from)
    }
}

impl Seek for AdbFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Drop for AdbFile {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            warn!("failed to write back {}: {}", self.path, e);
        }
    }
}

impl fmt::Debug for AdbFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdbFile")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("changed", &self.changed)
            .finish()
    }
}
