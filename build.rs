//! Generates the allocator's compile-time constants from a TOML file.
//!
//! The allocator itself takes no runtime configuration (see `src/lib.rs`):
//! everything it reads is a `pub const`. This build script is the one place
//! those constants come from something other than a literal in the source,
//! so a deployment can retune span sizing or sweep cadence without touching
//! allocator code. The generated file is included by `src/config.rs`.

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    config: ConfigSection,
}

#[derive(Deserialize, Default)]
struct ConfigSection {
    alignment: Option<usize>,
    page_size: Option<usize>,
    max_small: Option<usize>,
    span_pages: Option<usize>,
    thread_hold: Option<u32>,
    max_delay_count: Option<u32>,
    delay_interval_ms: Option<u64>,
    span_tracker_capacity: Option<usize>,
}

struct Resolved {
    alignment: usize,
    page_size: usize,
    page_shift: u32,
    max_small: usize,
    span_pages: usize,
    thread_hold: u32,
    max_delay_count: u32,
    delay_interval_ms: u64,
    span_tracker_capacity: usize,
}

fn resolve(cfg: &ConfigSection) -> Resolved {
    let alignment = cfg.alignment.unwrap_or(8);
    let page_size = cfg.page_size.unwrap_or(4096);
    let max_small = cfg.max_small.unwrap_or(256 * 1024);
    let span_pages = cfg.span_pages.unwrap_or(8);
    let thread_hold = cfg.thread_hold.unwrap_or(256);
    let max_delay_count = cfg.max_delay_count.unwrap_or(64);
    let delay_interval_ms = cfg.delay_interval_ms.unwrap_or(1000);
    let span_tracker_capacity = cfg.span_tracker_capacity.unwrap_or(1 << 16);

    assert!(
        alignment > 0 && alignment.is_power_of_two(),
        "alignment ({alignment}) must be a power of 2"
    );
    assert!(
        page_size > 0 && page_size.is_power_of_two(),
        "page_size ({page_size}) must be a power of 2"
    );
    assert!(
        max_small % alignment == 0,
        "max_small ({max_small}) must be a multiple of alignment ({alignment})"
    );
    assert!(span_pages > 0, "span_pages must be > 0");
    assert!(thread_hold > 0, "thread_hold must be > 0");
    assert!(max_delay_count > 0, "max_delay_count must be > 0");
    assert!(delay_interval_ms > 0, "delay_interval_ms must be > 0");
    assert!(span_tracker_capacity > 0, "span_tracker_capacity must be > 0");

    Resolved {
        alignment,
        page_size,
        page_shift: page_size.trailing_zeros(),
        max_small,
        span_pages,
        thread_hold,
        max_delay_count,
        delay_interval_ms,
        span_tracker_capacity,
    }
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{manifest_dir}/alloc.toml")
}

fn generate(cfg: &Resolved, out_path: &Path) {
    let num_size_classes = cfg.max_small / cfg.alignment;
    let code = format!(
        "// Auto-generated by build.rs. Do not edit.\n\n\
         pub const ALIGNMENT: usize = {};\n\
         pub const PAGE_SHIFT: usize = {};\n\
         pub const PAGE_SIZE: usize = {};\n\
         pub const MAX_SMALL: usize = {};\n\
         pub const NUM_SIZE_CLASSES: usize = {};\n\
         pub const SPAN_PAGES: usize = {};\n\
         pub const THREAD_HOLD: u32 = {};\n\
         pub const MAX_DELAY_COUNT: u32 = {};\n\
         pub const DELAY_INTERVAL_MS: u64 = {};\n\
         pub const SPAN_TRACKER_CAPACITY: usize = {};\n",
        cfg.alignment,
        cfg.page_shift,
        cfg.page_size,
        cfg.max_small,
        num_size_classes,
        cfg.span_pages,
        cfg.thread_hold,
        cfg.max_delay_count,
        cfg.delay_interval_ms,
        cfg.span_tracker_capacity,
    );
    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn main() {
    println!("cargo:rerun-if-env-changed=ALLOC_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();
    let config_path = env::var("ALLOC_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={config_path}");

    let content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("failed to read {config_path}: {e}"));
    let config: Config = toml::from_str(&content).expect("failed to parse TOML config");

    let resolved = resolve(&config.config);
    generate(&resolved, &Path::new(&out_dir).join("config_gen.rs"));
}
