//! adbfs interactive shell entry point

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use adbfs::config::Config;
use adbfs::fs::AdbFs;
use adbfs::session::{AdbSession, MemoryDevice, Session};
use adbfs::shell::{Shell, ShellContext};

/// Print usage information
fn print_usage() {
    eprintln!("Usage: adbfs [--memory] [config.yaml]");
    eprintln!();
    eprintln!("adbfs - browse and copy files on an Android device over adb");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.yaml    Path to configuration file (defaults apply when omitted)");
    eprintln!("  --memory       Use an in-memory device instead of adb");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  adbfs ~/.config/adbfs.yaml");
}

struct Args {
    memory: bool,
    config_path: Option<PathBuf>,
}

fn parse_args() -> Option<Args> {
    let mut args = Args {
        memory: false,
        config_path: None,
    };
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--memory" => args.memory = true,
            "-h" | "--help" => return None,
            _ if arg.starts_with('-') => return None,
            _ if args.config_path.is_none() => args.config_path = Some(PathBuf::from(arg)),
            _ => return None,
        }
    }
    Some(args)
}

fn demo_device() -> MemoryDevice {
    let device = MemoryDevice::new();
    device.add_dir("/sdcard/DCIM/Camera");
    device.add_dir("/sdcard/Download");
    device.add_file("/sdcard/Download/readme.txt", "adbfs in-memory device\n");
    device.add_dir("/data/local/tmp");
    device
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Some(args) = parse_args() else {
        print_usage();
        std::process::exit(1);
    };

    // Load configuration
    let config = match &args.config_path {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Initialize logging; stdout belongs to the shell
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    info!("adbfs starting");
    if let Some(path) = &args.config_path {
        info!("Loaded configuration from {:?}", path);
    }

    let session: Arc<dyn Session> = if args.memory {
        Arc::new(demo_device())
    } else {
        Arc::new(AdbSession::from_config(&config.device))
    };

    // Preloading has to wait until the device is there
    let mut options = config.fs_options();
    let preload = std::mem::take(&mut options.dircache_all);
    let fs = AdbFs::new(session, options)?;

    eprintln!("Waiting for device");
    if let Err(e) = fs.wait_for_device() {
        error!("Device did not become available: {}", e);
        std::process::exit(1);
    }
    info!("Connected to {}", fs);

    if preload {
        match fs.cache_all() {
            Ok(count) => info!("Preloaded {} directories", count),
            Err(e) => error!("Preloading the directory cache failed: {}", e),
        }
    }

    let mut shell = Shell::new(fs, ShellContext::new(std::env::current_dir()?));
    let stdin = io::stdin();
    shell.run(stdin.lock(), &mut io::stdout())?;

    info!("adbfs exiting");
    Ok(())
}
