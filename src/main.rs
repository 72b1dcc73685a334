use std::backtrace::Backtrace;
use std::fs::File;
use std::io::Write;
use std::panic;
use std::path::PathBuf;

use anyhow::{bail, Context};
use log::{info, LevelFilter};

use showroom_viewer::ViewerConfig;

const USAGE: &str = "usage: showroom-viewer <model.glb> [config.json]";

fn main() -> anyhow::Result<()> {
    setup_diagnostics();

    let mut args = std::env::args_os().skip(1);
    let Some(model) = args.next().map(PathBuf::from) else {
        bail!(USAGE);
    };
    let config = match args.next() {
        Some(path) => ViewerConfig::from_file(&path)
            .with_context(|| format!("loading config {}", PathBuf::from(&path).display()))?,
        None => ViewerConfig::default(),
    };
    if args.next().is_some() {
        bail!(USAGE);
    }

    info!("Starting Showroom Viewer for {}", model.display());
    showroom_viewer::run_native(&model, config).context("viewer terminated")?;
    Ok(())
}

/// Logging plus a crash report on panic.
fn setup_diagnostics() {
    env_logger::Builder::new()
        .filter_level(if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .format_timestamp_millis()
        .format_target(false)
        .parse_default_env()
        .init();

    panic::set_hook(Box::new(|panic_info| {
        let backtrace = Backtrace::force_capture();

        let msg = match panic_info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };
        let location = panic_info
            .location()
            .map_or("unknown location".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));

        let crash_msg = format!("=== VIEWER CRASH ===\nReason: {msg}\nLocation: {location}\n\nStack Trace:\n{backtrace}");
        eprintln!("\x1b[31;1m{crash_msg}\x1b[0m");

        if let Ok(mut file) = File::create("viewer_crash.log") {
            let _ = file.write_all(crash_msg.as_bytes());
            eprintln!("Crash report saved to viewer_crash.log");
        }
    }));
}
