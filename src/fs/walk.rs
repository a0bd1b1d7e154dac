//! Whole-tree copy and move built from the single-entry operations

use tracing::{debug, warn};

use crate::error::{AdbFsError, Result};
use crate::path::{self, shell_quote};

use super::Ctx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Copy,
    Move,
}

impl Ctx<'_> {
    pub(super) fn copydir(
        &mut self,
        src: &str,
        dst: &str,
        overwrite: bool,
        ignore_errors: bool,
    ) -> Result<()> {
        self.check_tree(src, dst, overwrite)?;
        self.transfer_tree(src, dst, Transfer::Copy, ignore_errors)
    }

    pub(super) fn movedir(
        &mut self,
        src: &str,
        dst: &str,
        overwrite: bool,
        ignore_errors: bool,
    ) -> Result<()> {
        self.check_tree(src, dst, overwrite)?;
        self.transfer_tree(src, dst, Transfer::Move, ignore_errors)?;
        self.removedir(src, false, true)
    }

    fn check_tree(&mut self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        match self.entry(src)? {
            None => return Err(AdbFsError::NotFound(src.to_string())),
            Some(e) if !e.is_dir() => return Err(AdbFsError::ResourceInvalid(src.to_string())),
            Some(_) => {}
        }
        if path::isbase(dst, src) {
            return Err(AdbFsError::InvalidArgument(format!(
                "{} is inside {}",
                dst, src
            )));
        }
        if !overwrite && self.exists(dst)? {
            return Err(AdbFsError::DestinationExists(dst.to_string()));
        }
        Ok(())
    }

    fn transfer_tree(
        &mut self,
        src: &str,
        dst: &str,
        how: Transfer,
        ignore_errors: bool,
    ) -> Result<()> {
        self.makedir(dst, true, true)?;

        for (name, entry) in self.readdir(src)? {
            let from = path::pathjoin(src, &name);
            let to = path::pathjoin(dst, &name);
            let result = match (how, &entry.target) {
                _ if entry.is_dir() && !entry.is_symlink() => {
                    self.transfer_tree(&from, &to, how, ignore_errors)
                }
                (Transfer::Copy, Some(target)) => self.copy_link(target, &to),
                (Transfer::Copy, None) => self.copy(&from, &to, true),
                (Transfer::Move, _) => self.move_path(&from, &to, true),
            };

            match result {
                Ok(()) => debug!("{:?} {} -> {}", how, from, to),
                Err(e) if e.is_transport() => return Err(e),
                Err(e) if ignore_errors => warn!("skipping {}: {}", from, e),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Recreate a symlink at `to` instead of copying what it points at
    fn copy_link(&mut self, target: &str, to: &str) -> Result<()> {
        if self.raw_entry(to)?.is_some() {
            self.remove(to)?;
        }
        self.state.cache.invalidate(&path::dirname(to));
        self.run(format!("ln -s {} {}", shell_quote(target), shell_quote(to)))?
            .check(to)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::{AdbFs, FsOptions};
    use super::*;
    use crate::session::MemoryDevice;

    fn adapter() -> (Arc<MemoryDevice>, AdbFs) {
        let device = Arc::new(MemoryDevice::new());
        device.add_file("/src/a.txt", "a");
        device.add_file("/src/sub/b.txt", "bb");
        device.add_dir("/src/sub/empty");
        device.add_symlink("/src/link", "a.txt");
        let fs = AdbFs::new(device.clone(), FsOptions::default()).unwrap();
        (device, fs)
    }

    #[test]
    fn test_copydir() {
        let (device, fs) = adapter();
        fs.copydir("/src", "/dst", false, false).unwrap();
        assert_eq!(device.contents("/dst/a.txt"), Some(b"a".to_vec()));
        assert_eq!(device.contents("/dst/sub/b.txt"), Some(b"bb".to_vec()));
        assert!(fs.isdir("/dst/sub/empty").unwrap());
        assert_eq!(
            fs.getinfo("/dst/link").unwrap().target(),
            Some("a.txt")
        );
        assert!(device.exists("/src/sub/b.txt"));
        assert_eq!(fs.cache_busy(), 0);
    }

    #[test]
    fn test_movedir() {
        let (device, fs) = adapter();
        fs.movedir("/src", "/moved", false, false).unwrap();
        assert_eq!(device.contents("/moved/sub/b.txt"), Some(b"bb".to_vec()));
        assert_eq!(device.contents("/moved/link"), Some(b"a".to_vec()));
        assert!(!device.exists("/src"));
        assert!(!fs.exists("/src").unwrap());
    }

    #[test]
    fn test_tree_checks() {
        let (device, fs) = adapter();
        device.add_dir("/taken");
        assert!(matches!(
            fs.copydir("/nope", "/x", false, false),
            Err(AdbFsError::NotFound(_))
        ));
        assert!(matches!(
            fs.copydir("/src/a.txt", "/x", false, false),
            Err(AdbFsError::ResourceInvalid(_))
        ));
        assert!(matches!(
            fs.copydir("/src", "/taken", false, false),
            Err(AdbFsError::DestinationExists(_))
        ));
        assert!(matches!(
            fs.movedir("/src", "/src/sub/inner", true, false),
            Err(AdbFsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_ignore_errors_continues() {
        let (device, fs) = adapter();
        device.add_file("/dst/sub", "in the way");

        assert!(matches!(
            fs.copydir("/src", "/dst", true, false),
            Err(AdbFsError::ResourceInvalid(_))
        ));

        fs.copydir("/src", "/dst", true, true).unwrap();
        assert_eq!(device.contents("/dst/a.txt"), Some(b"a".to_vec()));
        assert_eq!(device.contents("/dst/sub"), Some(b"in the way".to_vec()));
    }
}
