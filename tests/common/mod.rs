//! Common test utilities and fixtures
//!
//! Every test gets its own [`TestHarness`]: an in-memory device plus an
//! adapter over it, so tests stay independent and run in parallel.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use adbfs::fs::{AdbFs, FsOptions, ListOptions};
use adbfs::listing::Dialect;
use adbfs::session::MemoryDevice;
use tracing_subscriber::EnvFilter;

static LOGGING: Once = Once::new();

/// Initialize logging for tests; honours `RUST_LOG`, quiet otherwise
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub struct TestHarness {
    pub device: Arc<MemoryDevice>,
    pub fs: AdbFs,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_options(MemoryDevice::new(), FsOptions::default())
    }

    pub fn following() -> Self {
        Self::with_options(
            MemoryDevice::new(),
            FsOptions {
                follow_symlinks: true,
                ..Default::default()
            },
        )
    }

    pub fn toybox() -> Self {
        Self::with_options(MemoryDevice::with_dialect(Dialect::Toybox), FsOptions::default())
    }

    pub fn with_options(device: MemoryDevice, options: FsOptions) -> Self {
        init_logging();
        let device = Arc::new(device);
        let fs = AdbFs::new(device.clone(), options).expect("Failed to build adapter");
        Self { device, fs }
    }

    /// Names in `dir`, sorted
    pub fn names(&self, dir: &str) -> Vec<String> {
        self.fs
            .listdir(dir, &ListOptions::new())
            .unwrap_or_else(|e| panic!("listdir {} failed: {}", dir, e))
    }

    /// Number of `ls` round trips for exactly `dir`
    pub fn listings_of(&self, dir: &str) -> usize {
        let quoted = if dir == "/" {
            "'/'".to_string()
        } else {
            format!("'{}/'", dir)
        };
        self.device.count_commands(&format!("ls -l {}", quoted))
    }

    pub fn assert_idle(&self) {
        assert_eq!(self.fs.cache_busy(), 0, "cache left busy after an operation");
    }
}

pub fn assert_names(actual: Vec<String>, expected: &[&str]) {
    let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    assert_eq!(actual, expected, "directory listing mismatch");
}
