//! Interactive transfer shell
//!
//! A small command loop over an [`AdbFs`] that moves files between the
//! computer (`c`) and the device (`d`). Both working directories live in a
//! [`ShellContext`]; nothing touches the process-wide current directory.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{AdbFsError, Result};
use crate::fs::{AdbFs, ListOptions};
use crate::path;

const HELP: &str = "\
ls [path]                      list a device directory
dir [path]                     list a computer directory
cp|copy <c|d> <src> <c|d> <dst> copy between computer (c) and device (d)
cd <c|d> <path>                change the computer or device directory
link                           wait for the device and reconnect
help                           show this text
exit                           leave the shell
Device paths may be relative to the device directory; `..` and `.` work.";

/// Which side of the cable a path lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Computer,
    Device,
}

impl Side {
    fn parse(token: &str) -> Result<Self> {
        match token {
            "c" => Ok(Side::Computer),
            "d" => Ok(Side::Device),
            other => Err(AdbFsError::InvalidArgument(format!(
                "expected 'c' or 'd', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Empty,
    Ls(Option<String>),
    Dir(Option<String>),
    Copy {
        from: Side,
        src: String,
        to: Side,
        dst: String,
    },
    Cd(Side, String),
    Link,
    Help,
    Exit,
}

impl ShellCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = words.split_first() else {
            return Ok(ShellCommand::Empty);
        };

        match (name, args) {
            ("ls", []) => Ok(ShellCommand::Ls(None)),
            ("ls", [p]) => Ok(ShellCommand::Ls(Some(p.to_string()))),
            ("dir", []) => Ok(ShellCommand::Dir(None)),
            ("dir", [p]) => Ok(ShellCommand::Dir(Some(p.to_string()))),
            ("cp" | "copy", [from, src, to, dst]) => Ok(ShellCommand::Copy {
                from: Side::parse(from)?,
                src: src.to_string(),
                to: Side::parse(to)?,
                dst: dst.to_string(),
            }),
            ("cp" | "copy", _) => Err(usage("cp <c|d> <src> <c|d> <dst>")),
            // Computer paths may contain spaces
            ("cd", [side, rest @ ..]) if !rest.is_empty() => {
                Ok(ShellCommand::Cd(Side::parse(side)?, rest.join(" ")))
            }
            ("cd", _) => Err(usage("cd <c|d> <path>")),
            ("link", []) => Ok(ShellCommand::Link),
            ("help", _) => Ok(ShellCommand::Help),
            ("exit" | "quit", []) => Ok(ShellCommand::Exit),
            ("ls" | "dir" | "link" | "exit" | "quit", _) => {
                Err(usage(&format!("{} takes at most one argument", name)))
            }
            (other, _) => Err(AdbFsError::InvalidArgument(format!(
                "unknown command '{}', see help",
                other
            ))),
        }
    }
}

fn usage(text: &str) -> AdbFsError {
    AdbFsError::InvalidArgument(format!("usage: {}", text))
}

/// Whether the loop should keep reading commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Working directories on both sides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellContext {
    pub remote_cwd: String,
    pub local_cwd: PathBuf,
}

impl ShellContext {
    pub fn new(local_cwd: impl Into<PathBuf>) -> Self {
        Self {
            remote_cwd: path::ROOT.to_string(),
            local_cwd: local_cwd.into(),
        }
    }

    pub fn remote(&self, input: &str) -> String {
        path::resolve(input, &self.remote_cwd)
    }

    pub fn local(&self, input: &str) -> PathBuf {
        let p = Path::new(input);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.local_cwd.join(p)
        }
    }
}

impl fmt::Display for ShellContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}\n> ", self.remote_cwd, self.local_cwd.display())
    }
}

pub struct Shell {
    fs: AdbFs,
    context: ShellContext,
}

impl Shell {
    pub fn new(fs: AdbFs, context: ShellContext) -> Self {
        Self { fs, context }
    }

    pub fn context(&self) -> &ShellContext {
        &self.context
    }

    /// Read commands until `exit` or end of input
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> io::Result<()> {
        let mut lines = input.lines();
        loop {
            write!(out, "{}", self.context)?;
            out.flush()?;
            let Some(line) = lines.next() else {
                writeln!(out)?;
                return Ok(());
            };
            if self.handle_line(&line?, out)? == Flow::Exit {
                return Ok(());
            }
        }
    }

    /// Parse and run one line, reporting failures to `out`. A vanished
    /// device triggers one reconnect attempt.
    pub fn handle_line<W: Write>(&mut self, line: &str, out: &mut W) -> io::Result<Flow> {
        let result = ShellCommand::parse(line).and_then(|cmd| self.execute(cmd, out));
        match result {
            Ok(flow) => Ok(flow),
            Err(AdbFsError::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe => Err(e),
            Err(e) if e.is_device_unavailable() => {
                writeln!(out, "error: {}", e)?;
                writeln!(out, "device disconnected, reconnecting")?;
                warn!("device lost: {}", e);
                match self.fs.wait_for_device() {
                    Ok(()) => writeln!(out, "reconnected")?,
                    Err(e) => writeln!(out, "reconnect failed: {}", e)?,
                }
                Ok(Flow::Continue)
            }
            Err(e) => {
                writeln!(out, "error: {}", e)?;
                Ok(Flow::Continue)
            }
        }
    }

    pub fn execute<W: Write>(&mut self, command: ShellCommand, out: &mut W) -> Result<Flow> {
        match command {
            ShellCommand::Empty => {}
            ShellCommand::Ls(target) => self.ls(target.as_deref(), out)?,
            ShellCommand::Dir(target) => self.dir(target.as_deref(), out)?,
            ShellCommand::Copy { from, src, to, dst } => self.copy(from, &src, to, &dst)?,
            ShellCommand::Cd(side, target) => self.cd(side, &target)?,
            ShellCommand::Link => {
                writeln!(out, "waiting for device")?;
                self.fs.wait_for_device()?;
                writeln!(out, "reconnected")?;
            }
            ShellCommand::Help => writeln!(out, "{}", HELP)?,
            ShellCommand::Exit => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }

    fn ls<W: Write>(&self, target: Option<&str>, out: &mut W) -> Result<()> {
        let dir = self.context.remote(target.unwrap_or("."));
        for (name, info) in self.fs.listdirinfo(&dir, &ListOptions::new())? {
            match info.target() {
                Some(target) => writeln!(out, "{} -> {}", name, target)?,
                None if info.is_dir() => writeln!(out, "{}/", name)?,
                None => writeln!(out, "{:>10}  {}", info.size(), name)?,
            }
        }
        Ok(())
    }

    fn dir<W: Write>(&self, target: Option<&str>, out: &mut W) -> Result<()> {
        let dir = self.context.local(target.unwrap_or("."));
        let mut names: Vec<(String, bool)> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                (entry.file_name().to_string_lossy().into_owned(), is_dir)
            })
            .collect();
        names.sort();
        for (name, is_dir) in names {
            if is_dir {
                writeln!(out, "{}/", name)?;
            } else {
                writeln!(out, "{}", name)?;
            }
        }
        Ok(())
    }

    fn copy(&self, from: Side, src: &str, to: Side, dst: &str) -> Result<()> {
        match (from, to) {
            (Side::Computer, Side::Device) => {
                let local = self.context.local(src);
                let mut remote = self.context.remote(dst);
                if self.fs.isdir(&remote)? {
                    remote = path::pathjoin(&remote, &local_name(&local)?);
                }
                info!("push {} -> {}", local.display(), remote);
                self.fs.push(&local, &remote)
            }
            (Side::Device, Side::Computer) => {
                let remote = self.context.remote(src);
                let mut local = self.context.local(dst);
                if local.is_dir() {
                    local.push(path::basename(&remote));
                }
                info!("pull {} -> {}", remote, local.display());
                self.fs.pull(&remote, &local)
            }
            (Side::Device, Side::Device) => {
                let src = self.context.remote(src);
                let mut dst = self.context.remote(dst);
                if self.fs.isdir(&dst)? {
                    dst = path::pathjoin(&dst, &path::basename(&src));
                }
                info!("copy {} -> {}", src, dst);
                if self.fs.isdir(&src)? {
                    self.fs.copydir(&src, &dst, false, false)
                } else {
                    self.fs.copy(&src, &dst, true)
                }
            }
            (Side::Computer, Side::Computer) => {
                let src = self.context.local(src);
                let mut dst = self.context.local(dst);
                if dst.is_dir() {
                    dst.push(local_name(&src)?);
                }
                std::fs::copy(&src, &dst)?;
                Ok(())
            }
        }
    }

    fn cd(&mut self, side: Side, target: &str) -> Result<()> {
        match side {
            Side::Device => {
                let dir = self.context.remote(target);
                if !self.fs.exists(&dir)? {
                    return Err(AdbFsError::NotFound(dir));
                }
                if !self.fs.isdir(&dir)? {
                    return Err(AdbFsError::ResourceInvalid(dir));
                }
                self.context.remote_cwd = dir;
            }
            Side::Computer => {
                let dir = self.context.local(target).canonicalize()?;
                if !dir.is_dir() {
                    return Err(AdbFsError::ResourceInvalid(dir.display().to_string()));
                }
                self.context.local_cwd = dir;
            }
        }
        Ok(())
    }
}

fn local_name(p: &Path) -> Result<String> {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AdbFsError::InvalidArgument(format!("{} has no file name", p.display())))
}
