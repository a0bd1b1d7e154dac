//! In-process emulated device
//!
//! Interprets the handful of shell commands the adapter issues against an
//! in-memory tree and answers in toolbox or toybox `ls -l` format. Used by
//! the test suite and by `adbfs --memory` for dry runs without hardware.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{AdbFsError, Result};
use crate::listing::Dialect;
use crate::path;

use super::{RemoteFailure, Reply, Session};

const TIMESTAMP: &str = "2023-04-01 10:20";

/// Symlink hops before the emulated kernel gives up (Linux uses 40)
const MAX_HOPS: usize = 40;

const OFFLINE_MESSAGE: &str = "error: no devices/emulators found";

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
    Link(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Errno {
    NoEnt,
    NotDir,
    IsDir,
    Exists,
    NotEmpty,
    Loop,
    Inval,
}

impl Errno {
    fn message(self) -> &'static str {
        match self {
            Errno::NoEnt => "No such file or directory",
            Errno::NotDir => "Not a directory",
            Errno::IsDir => "Is a directory",
            Errno::Exists => "File exists",
            Errno::NotEmpty => "Directory not empty",
            Errno::Loop => "Too many symbolic links encountered",
            Errno::Inval => "Invalid argument",
        }
    }

    fn reply(self, tool: &str, path: &str) -> Reply {
        Reply::failed(format!("{}: '{}': {}", tool, path, self.message()), 1)
    }

    fn into_error(self, path: &str) -> AdbFsError {
        RemoteFailure::classify(self.message()).into_error(path)
    }
}

type Outcome = std::result::Result<Vec<String>, Reply>;

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    dialect: Dialect,
}

impl Tree {
    fn new(dialect: Dialect) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(path::ROOT.to_string(), Node::Dir);
        Self { nodes, dialect }
    }

    /// Resolve symlinks along `p`. Intermediate links are always followed,
    /// the final component only if `follow_last`. A missing final
    /// component is fine; the caller decides what absence means.
    fn canonical(&self, p: &str, follow_last: bool) -> std::result::Result<String, Errno> {
        let mut pending: VecDeque<String> = components(p);
        let mut current = path::ROOT.to_string();
        let mut hops = 0;

        while let Some(component) = pending.pop_front() {
            let candidate = path::pathjoin(&current, &component);
            let is_last = pending.is_empty();
            match self.nodes.get(&candidate) {
                Some(Node::Link(target)) if !is_last || follow_last => {
                    hops += 1;
                    if hops > MAX_HOPS {
                        return Err(Errno::Loop);
                    }
                    let mut rewritten = components(&path::pathjoin(&current, target));
                    rewritten.extend(pending.drain(..));
                    pending = rewritten;
                    current = path::ROOT.to_string();
                }
                Some(Node::File(_)) if !is_last => return Err(Errno::NotDir),
                None if !is_last => return Err(Errno::NoEnt),
                _ => current = candidate,
            }
        }
        Ok(current)
    }

    fn children(&self, dir: &str) -> Vec<(String, &Node)> {
        self.nodes
            .iter()
            .filter(|(key, _)| key.as_str() != dir && path::dirname(key) == dir)
            .map(|(key, node)| (path::basename(key), node))
            .collect()
    }

    fn subtree(&self, top: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|key| path::isbase(key, top))
            .cloned()
            .collect()
    }

    fn line(&self, name: &str, node: &Node) -> String {
        match (self.dialect, node) {
            (Dialect::Toybox, Node::Dir) => {
                format!("drwxrwx--x 2 root sdcard_rw 4096 {} {}", TIMESTAMP, name)
            }
            (Dialect::Toybox, Node::File(data)) => format!(
                "-rw-rw---- 1 root sdcard_rw {} {} {}",
                data.len(),
                TIMESTAMP,
                name
            ),
            (Dialect::Toybox, Node::Link(target)) => format!(
                "lrwxrwxrwx 1 root root {} {} {} -> {}",
                target.len(),
                TIMESTAMP,
                name,
                target
            ),
            (_, Node::Dir) => format!("drwxrwx--x root sdcard_rw {} {}", TIMESTAMP, name),
            (_, Node::File(data)) => format!(
                "-rw-rw---- root sdcard_rw {} {} {}",
                data.len(),
                TIMESTAMP,
                name
            ),
            (_, Node::Link(target)) => {
                format!("lrwxrwxrwx root root {} {} -> {}", TIMESTAMP, name, target)
            }
        }
    }

    fn dir_lines(&self, dir: &str) -> Vec<String> {
        let children = self.children(dir);
        let mut lines = vec![format!("total {}", children.len())];
        lines.extend(children.iter().map(|(name, node)| self.line(name, node)));
        lines
    }

    fn execute(&mut self, command: &str) -> Reply {
        let words = split_words(command);
        let (program, args) = match words.split_first() {
            Some((program, args)) => (program.as_str(), args),
            None => return Reply::ok(Vec::new()),
        };
        let (flags, operands): (Vec<&String>, Vec<&String>) =
            args.iter().partition(|a| a.starts_with('-') && a.len() > 1);
        let has_flag = |c: char| flags.iter().any(|f| f.contains(c));
        let operands: Vec<&str> = operands.iter().map(|s| s.as_str()).collect();

        let outcome = match (program, operands.as_slice()) {
            ("ls", []) => self.ls("/", has_flag('R')),
            ("ls", [target]) => self.ls(target, has_flag('R')),
            ("stat", [target]) => self.stat(target, has_flag('L')),
            ("mkdir", [target]) => self.mkdir(target),
            ("rmdir", [target]) => self.rmdir(target),
            ("rm", [target]) => self.rm(target, has_flag('r')),
            ("mv", [src, dst]) => self.transfer("mv", src, dst, true),
            ("cp", [src, dst]) => {
                if has_flag('r') {
                    self.transfer("cp", src, dst, false)
                } else {
                    self.copy_file(src, dst)
                }
            }
            ("ln", [target, link]) if has_flag('s') => self.symlink(target, link),
            _ => Err(Reply::failed(
                format!("/system/bin/sh: {}: not found", command),
                127,
            )),
        };

        match outcome {
            Ok(lines) => Reply::ok(lines),
            Err(reply) => reply,
        }
    }

    fn ls(&self, target: &str, recursive: bool) -> Outcome {
        let follow = target.ends_with(path::SEP) || path::is_root(target);
        let canon = self
            .canonical(target, follow)
            .map_err(|e| e.reply("ls", target))?;
        match self.nodes.get(&canon) {
            None => Err(Errno::NoEnt.reply("ls", target)),
            Some(Node::Dir) if recursive => {
                let shown = path::abspath(target);
                let mut lines = Vec::new();
                for dir in self.subtree(&canon) {
                    if !matches!(self.nodes.get(&dir), Some(Node::Dir)) {
                        continue;
                    }
                    if !lines.is_empty() {
                        lines.push(String::new());
                    }
                    let label = path::pathjoin(&shown, dir[canon.len()..].trim_start_matches('/'));
                    lines.push(format!("{}:", label));
                    lines.extend(self.dir_lines(&dir));
                }
                Ok(lines)
            }
            Some(Node::Dir) => Ok(self.dir_lines(&canon)),
            Some(node) => Ok(vec![self.line(target, node)]),
        }
    }

    fn stat(&self, target: &str, follow: bool) -> Outcome {
        let canon = self
            .canonical(target, follow)
            .map_err(|e| e.reply("stat", target))?;
        let (size, kind) = match self.nodes.get(&canon) {
            None => return Err(Errno::NoEnt.reply("stat", target)),
            Some(Node::Dir) => (4096, "directory"),
            Some(Node::File(data)) => (data.len(), "regular file"),
            Some(Node::Link(dest)) => (dest.len(), "symbolic link"),
        };
        Ok(vec![
            format!("  File: '{}'", target),
            format!("  Size: {}\tBlocks: 8\tIO Block: 4096\t{}", size, kind),
        ])
    }

    fn mkdir(&mut self, target: &str) -> Outcome {
        let canon = self
            .canonical(target, false)
            .map_err(|e| e.reply("mkdir", target))?;
        if self.nodes.contains_key(&canon) {
            return Err(Errno::Exists.reply("mkdir", target));
        }
        self.nodes.insert(canon, Node::Dir);
        Ok(Vec::new())
    }

    fn rmdir(&mut self, target: &str) -> Outcome {
        let canon = self
            .canonical(target, false)
            .map_err(|e| e.reply("rmdir", target))?;
        match self.nodes.get(&canon) {
            None => return Err(Errno::NoEnt.reply("rmdir", target)),
            Some(Node::Dir) => {}
            Some(_) => return Err(Errno::NotDir.reply("rmdir", target)),
        }
        if path::is_root(&canon) || !self.children(&canon).is_empty() {
            return Err(Errno::NotEmpty.reply("rmdir", target));
        }
        self.nodes.remove(&canon);
        Ok(Vec::new())
    }

    fn rm(&mut self, target: &str, recursive: bool) -> Outcome {
        let canon = self
            .canonical(target, false)
            .map_err(|e| e.reply("rm", target))?;
        match self.nodes.get(&canon) {
            None => Err(Errno::NoEnt.reply("rm", target)),
            Some(Node::Dir) if !recursive => Err(Errno::IsDir.reply("rm", target)),
            Some(_) => {
                for key in self.subtree(&canon) {
                    self.nodes.remove(&key);
                }
                Ok(Vec::new())
            }
        }
    }

    /// Shared body of `mv` and `cp -r`: copy the subtree at `src` to its
    /// destination, then drop the source when moving.
    fn transfer(&mut self, tool: &str, src: &str, dst: &str, remove_source: bool) -> Outcome {
        let from = self
            .canonical(src, !remove_source)
            .map_err(|e| e.reply(tool, src))?;
        let source_node = match self.nodes.get(&from) {
            Some(node) => node.clone(),
            None => return Err(Errno::NoEnt.reply(tool, src)),
        };
        let to = self.destination(tool, &from, dst)?;
        if to == from {
            return Ok(Vec::new());
        }
        if path::isbase(&to, &from) {
            return Err(Errno::Inval.reply(tool, dst));
        }

        match (self.nodes.get(&to), &source_node) {
            (Some(Node::Dir), Node::Dir) => {
                if !self.children(&to).is_empty() {
                    return Err(Errno::NotEmpty.reply(tool, dst));
                }
            }
            (Some(Node::Dir), _) => return Err(Errno::IsDir.reply(tool, dst)),
            (Some(_), Node::Dir) => return Err(Errno::NotDir.reply(tool, dst)),
            _ => {}
        }

        let moved: Vec<(String, Node)> = self
            .subtree(&from)
            .into_iter()
            .filter_map(|key| {
                let node = self.nodes.get(&key)?.clone();
                Some((format!("{}{}", to, &key[from.len()..]), node))
            })
            .collect();
        if remove_source {
            for key in self.subtree(&from) {
                self.nodes.remove(&key);
            }
        }
        for (key, node) in moved {
            self.nodes.insert(path::abspath(&key), node);
        }
        Ok(Vec::new())
    }

    /// Where `src` lands: inside `dst` if that is an existing directory
    fn destination(&self, tool: &str, from: &str, dst: &str) -> std::result::Result<String, Reply> {
        let followed = self.canonical(dst, true).map_err(|e| e.reply(tool, dst))?;
        if matches!(self.nodes.get(&followed), Some(Node::Dir)) && followed != from {
            return Ok(path::pathjoin(&followed, &path::basename(from)));
        }
        self.canonical(dst, false).map_err(|e| e.reply(tool, dst))
    }

    fn copy_file(&mut self, src: &str, dst: &str) -> Outcome {
        let from = self
            .canonical(src, true)
            .map_err(|e| e.reply("cp", src))?;
        match self.nodes.get(&from) {
            None => Err(Errno::NoEnt.reply("cp", src)),
            Some(Node::Dir) => Err(Errno::IsDir.reply("cp", src)),
            Some(_) => self.transfer("cp", src, dst, false),
        }
    }

    fn symlink(&mut self, target: &str, link: &str) -> Outcome {
        let canon = self
            .canonical(link, false)
            .map_err(|e| e.reply("ln", link))?;
        if self.nodes.contains_key(&canon) {
            return Err(Errno::Exists.reply("ln", link));
        }
        self.nodes.insert(canon, Node::Link(target.to_string()));
        Ok(Vec::new())
    }

    fn read(&self, p: &str) -> Result<Vec<u8>> {
        let canon = self.canonical(p, true).map_err(|e| e.into_error(p))?;
        match self.nodes.get(&canon) {
            Some(Node::File(data)) => Ok(data.clone()),
            Some(Node::Dir) => Err(Errno::IsDir.into_error(p)),
            _ => Err(Errno::NoEnt.into_error(p)),
        }
    }

    fn write(&mut self, p: &str, data: Vec<u8>) -> Result<()> {
        let canon = self.canonical(p, true).map_err(|e| e.into_error(p))?;
        if matches!(self.nodes.get(&canon), Some(Node::Dir)) || path::is_root(&canon) {
            return Err(Errno::IsDir.into_error(p));
        }
        self.nodes.insert(canon, Node::File(data));
        Ok(())
    }

    fn insert_with_parents(&mut self, p: &str, node: Node) {
        let p = path::abspath(p);
        for ancestor in path::recursepath(&path::dirname(&p)) {
            self.nodes.entry(ancestor).or_insert(Node::Dir);
        }
        self.nodes.insert(p, node);
    }
}

#[derive(Debug)]
struct State {
    tree: Tree,
    online: bool,
    log: Vec<String>,
}

/// Emulated device holding its file tree in memory
#[derive(Debug)]
pub struct MemoryDevice {
    state: Mutex<State>,
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDevice {
    /// Empty device answering in toolbox format
    pub fn new() -> Self {
        Self::with_dialect(Dialect::Toolbox)
    }

    pub fn with_dialect(dialect: Dialect) -> Self {
        Self {
            state: Mutex::new(State {
                tree: Tree::new(dialect),
                online: true,
                log: Vec::new(),
            }),
        }
    }

    /// Create a directory and any missing ancestors
    pub fn add_dir(&self, p: &str) {
        self.state.lock().tree.insert_with_parents(p, Node::Dir);
    }

    /// Create a file and any missing ancestors
    pub fn add_file(&self, p: &str, contents: impl AsRef<[u8]>) {
        let node = Node::File(contents.as_ref().to_vec());
        self.state.lock().tree.insert_with_parents(p, node);
    }

    pub fn add_symlink(&self, link: &str, target: &str) {
        let node = Node::Link(target.to_string());
        self.state.lock().tree.insert_with_parents(link, node);
    }

    /// Simulate unplugging (`false`) or reattaching (`true`) the device
    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    /// Contents of a file, following symlinks
    pub fn contents(&self, p: &str) -> Option<Vec<u8>> {
        self.state.lock().tree.read(p).ok()
    }

    /// True if something exists at `p` itself (links are not followed)
    pub fn exists(&self, p: &str) -> bool {
        let state = self.state.lock();
        match state.tree.canonical(p, false) {
            Ok(canon) => state.tree.nodes.contains_key(&canon),
            Err(_) => false,
        }
    }

    /// Every shell command received so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Number of received commands starting with `prefix`
    pub fn count_commands(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn clear_commands(&self) {
        self.state.lock().log.clear();
    }

    fn ensure_online(state: &State) -> Result<()> {
        if state.online {
            Ok(())
        } else {
            Err(AdbFsError::DeviceUnavailable(OFFLINE_MESSAGE.to_string()))
        }
    }
}

#[async_trait]
impl Session for MemoryDevice {
    async fn run_batch(&self, commands: &[String]) -> Result<Vec<Reply>> {
        let mut state = self.state.lock();
        Self::ensure_online(&state)?;
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            debug!("memory shell: {}", command);
            state.log.push(command.clone());
            replies.push(state.tree.execute(command));
        }
        Ok(replies)
    }

    async fn read_raw(&self, p: &str) -> Result<Bytes> {
        let mut state = self.state.lock();
        Self::ensure_online(&state)?;
        state.log.push(format!("cat {}", path::shell_quote(p)));
        state.tree.read(p).map(Bytes::from)
    }

    async fn write_raw(&self, p: &str, data: Bytes) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_online(&state)?;
        state.log.push(format!("cat > {}", path::shell_quote(p)));
        state.tree.write(p, data.to_vec())
    }

    async fn pull(&self, remote: &str, local: &Path) -> Result<()> {
        let data = {
            let mut state = self.state.lock();
            Self::ensure_online(&state)?;
            state.log.push(format!("pull {}", path::shell_quote(remote)));
            state.tree.read(remote)?
        };
        tokio::fs::write(local, data).await?;
        Ok(())
    }

    async fn push(&self, local: &Path, remote: &str) -> Result<()> {
        let data = tokio::fs::read(local).await?;
        let mut state = self.state.lock();
        Self::ensure_online(&state)?;
        state.log.push(format!("push {}", path::shell_quote(remote)));
        state.tree.write(remote, data)
    }

    async fn wait_for_device(&self) -> Result<()> {
        self.state.lock().online = true;
        Ok(())
    }

    fn description(&self) -> String {
        "in-memory device".to_string()
    }
}

fn components(p: &str) -> VecDeque<String> {
    path::abspath(p)
        .split(path::SEP)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a command line into words, honouring single quotes, double quotes
/// and backslash escapes the way `sh` does for the commands we emit
fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '"' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '"' {
                        break;
                    }
                    current.push(q);
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::{group_recursive, parse_listing};

    fn run(device: &MemoryDevice, command: &str) -> Reply {
        tokio_test::block_on(device.run(command)).unwrap()
    }

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words("mv '/a b' '/it'\\''s'"),
            vec!["mv", "/a b", "/it's"]
        );
        assert_eq!(split_words("  ls   -l  "), vec!["ls", "-l"]);
        assert_eq!(split_words("echo ''"), vec!["echo", ""]);
    }

    #[test]
    fn test_ls_parses_back() {
        let device = MemoryDevice::new();
        device.add_file("/sdcard/notes.txt", "hello");
        device.add_dir("/sdcard/DCIM");
        device.add_symlink("/sdcard/latest", "DCIM");

        let reply = run(&device, "ls -l '/sdcard/'");
        assert!(reply.success());
        let listing = parse_listing(reply.lines.iter().map(String::as_str), Dialect::Auto);
        assert_eq!(listing.len(), 3);
        assert_eq!(listing["notes.txt"].size, 5);
        assert!(listing["DCIM"].is_dir());
        assert_eq!(listing["latest"].target.as_deref(), Some("DCIM"));
    }

    #[test]
    fn test_toybox_dialect_parses_back() {
        let device = MemoryDevice::with_dialect(Dialect::Toybox);
        device.add_file("/data/a file", "xyz");
        let reply = run(&device, "ls -l '/data/'");
        let listing = parse_listing(reply.lines.iter().map(String::as_str), Dialect::Auto);
        assert_eq!(listing["a file"].size, 3);
    }

    #[test]
    fn test_ls_recursive_groups() {
        let device = MemoryDevice::new();
        device.add_file("/a/b/f", "1");
        let reply = run(&device, "ls -l -R '/'");
        let groups = group_recursive("/", reply.lines.iter().map(String::as_str), Dialect::Auto);
        let dirs: Vec<&str> = groups.iter().map(|(d, _)| d.as_str()).collect();
        assert_eq!(dirs, vec!["/", "/a", "/a/b"]);
        assert!(groups[2].1.contains_key("f"));
    }

    #[test]
    fn test_errors_are_reported_in_reply() {
        let device = MemoryDevice::new();
        device.add_dir("/a/b");
        assert_eq!(
            run(&device, "rmdir '/a'").failure(),
            Some(RemoteFailure::NotEmpty)
        );
        assert_eq!(
            run(&device, "mkdir '/a'").failure(),
            Some(RemoteFailure::FileExists)
        );
        assert_eq!(
            run(&device, "rm '/a'").failure(),
            Some(RemoteFailure::IsADirectory)
        );
        assert_eq!(
            run(&device, "mkdir '/x/y'").failure(),
            Some(RemoteFailure::NoSuchFile)
        );
        assert_eq!(run(&device, "frobnicate").status, 127);
    }

    #[test]
    fn test_mv_into_directory_and_rename() {
        let device = MemoryDevice::new();
        device.add_file("/a/f", "1");
        device.add_dir("/b");
        assert!(run(&device, "mv '/a/f' '/b'").success());
        assert!(device.exists("/b/f"));
        assert!(run(&device, "mv '/b' '/c'").success());
        assert_eq!(device.contents("/c/f"), Some(b"1".to_vec()));
        assert!(!device.exists("/b"));
        let reply = run(&device, "mv '/nope' '/d'");
        assert!(reply.text().contains("'/nope'"));
    }

    #[test]
    fn test_cp_recursive() {
        let device = MemoryDevice::new();
        device.add_file("/a/x/f", "1");
        assert!(run(&device, "cp -r '/a' '/b'").success());
        assert!(device.exists("/a/x/f"));
        assert!(device.exists("/b/x/f"));
    }

    #[test]
    fn test_symlink_loop_is_reported() {
        let device = MemoryDevice::new();
        device.add_symlink("/loop", "/loop");
        let reply = run(&device, "stat -L '/loop'");
        assert!(reply.text().contains("Too many symbolic links"));
    }

    #[test]
    fn test_raw_io_and_offline() {
        let device = MemoryDevice::new();
        device.add_dir("/a");
        tokio_test::block_on(device.write_raw("/a/f", Bytes::from_static(b"data"))).unwrap();
        let data = tokio_test::block_on(device.read_raw("/a/f")).unwrap();
        assert_eq!(&data[..], b"data");

        let err = tokio_test::block_on(device.write_raw("/missing/f", Bytes::new())).unwrap_err();
        assert!(matches!(err, AdbFsError::NotFound(_)));

        device.set_online(false);
        let err = tokio_test::block_on(device.run("ls -l '/'")).unwrap_err();
        assert!(err.is_device_unavailable());
        tokio_test::block_on(device.wait_for_device()).unwrap();
        assert!(run(&device, "ls -l '/'").success());
    }
}
