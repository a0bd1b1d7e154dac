//! Directory cache behaviour seen through the adapter

mod common;

use adbfs::fs::FsOptions;
use adbfs::session::MemoryDevice;
use adbfs::Result;
use common::*;

#[test]
fn test_repeat_queries_hit_the_cache() -> Result<()> {
    let h = TestHarness::new();
    h.device.add_file("/a/f", "1");

    for _ in 0..5 {
        assert!(h.fs.isfile("/a/f")?);
    }
    assert_eq!(h.listings_of("/a"), 1);
    let stats = h.fs.cache_stats();
    assert!(stats.hits >= 4, "{}", stats);
    Ok(())
}

#[test]
fn test_mutation_invalidates_parent() -> Result<()> {
    let h = TestHarness::new();
    h.device.add_dir("/a");
    assert_names(h.names("/a"), &[]);

    h.fs.setcontents("/a/new", "data")?;
    assert_names(h.names("/a"), &["new"]);

    h.fs.remove("/a/new")?;
    assert_names(h.names("/a"), &[]);
    assert_eq!(h.listings_of("/a"), 3);
    Ok(())
}

#[test]
fn test_external_change_needs_refresh() -> Result<()> {
    let h = TestHarness::new();
    h.device.add_dir("/a");
    assert!(!h.fs.exists("/a/outside")?);

    h.device.add_file("/a/outside", "x");
    assert!(!h.fs.exists("/a/outside")?);

    h.fs.refresh_dircache(&["/a"]);
    assert!(h.fs.exists("/a/outside")?);
    Ok(())
}

#[test]
fn test_clear_prefix_drops_descendants() -> Result<()> {
    let h = TestHarness::new();
    h.device.add_file("/a/b/c/f", "1");
    h.device.add_dir("/z");
    h.fs.exists("/a/b/c/f")?;
    h.fs.exists("/z/x")?;

    h.fs.clear_dircache(&["/a"]);
    assert!(!h.fs.is_cached("/a"));
    assert!(!h.fs.is_cached("/a/b"));
    assert!(!h.fs.is_cached("/a/b/c"));
    assert!(h.fs.is_cached("/z"));
    Ok(())
}

#[test]
fn test_rename_of_directory_drops_its_subtree() -> Result<()> {
    let h = TestHarness::new();
    h.device.add_file("/old/sub/f", "1");
    assert!(h.fs.exists("/old/sub/f")?);
    assert!(h.fs.is_cached("/old/sub"));

    h.fs.rename("/old", "/new")?;
    assert!(!h.fs.is_cached("/old/sub"));
    assert!(!h.fs.exists("/old/sub/f")?);
    assert!(h.fs.exists("/new/sub/f")?);
    Ok(())
}

#[test]
fn test_uncached_adapter_refetches_every_call() -> Result<()> {
    let h = TestHarness::with_options(
        MemoryDevice::new(),
        FsOptions {
            dircache: false,
            ..Default::default()
        },
    );
    h.device.add_file("/a/f", "1");

    assert!(h.fs.exists("/a/f")?);
    h.device.add_file("/a/g", "2");
    assert!(h.fs.exists("/a/g")?);
    assert_eq!(h.listings_of("/a"), 2);
    assert!(!h.fs.is_cached("/a"));
    h.assert_idle();
    Ok(())
}

#[test]
fn test_failed_operations_leave_cache_idle() {
    let h = TestHarness::new();
    h.device.add_file("/a/f", "1");

    assert!(h.fs.remove("/missing").is_err());
    assert!(h.fs.removedir("/a", false, false).is_err());
    assert!(h.fs.copy("/a", "/b", false).is_err());
    assert!(h.fs.open("/a", "r").is_err());
    h.assert_idle();
}

#[test]
fn test_preload_serves_whole_tree() -> Result<()> {
    let device = MemoryDevice::new();
    device.add_file("/sdcard/a/b/c.txt", "c");
    device.add_file("/data/x", "x");
    let h = TestHarness::with_options(
        device,
        FsOptions {
            dircache_all: true,
            ..Default::default()
        },
    );
    let recursive = h.device.count_commands("ls -l -R");
    assert_eq!(recursive, 1);

    h.device.clear_commands();
    assert!(h.fs.isfile("/sdcard/a/b/c.txt")?);
    assert!(h.fs.isfile("/data/x")?);
    assert!(h.device.commands().is_empty());
    Ok(())
}
