//! Stamps `dualvision --version` with where and when the binary was built
//!
//! `built` writes package and toolchain facts to `$OUT_DIR/built.rs`; the
//! `DUALVISION_*` variables below feed the long version string in main.rs.
//! Release pipelines pass the commit through `GIT_COMMIT_HASH`.

use std::env;
use std::io;

const UNKNOWN: &str = "unknown";

fn main() -> io::Result<()> {
    built::write_built_file()?;

    println!("cargo:rerun-if-env-changed=GIT_COMMIT_HASH");

    let target = env::var("TARGET").unwrap_or_else(|_| UNKNOWN.to_string());
    let commit = env::var("GIT_COMMIT_HASH")
        .ok()
        .map(|hash| hash.trim().chars().take(12).collect::<String>())
        .filter(|hash| !hash.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string());
    let built_at = chrono::Utc::now().format("%Y-%m-%d %H:%M UTC");

    println!("cargo:rustc-env=DUALVISION_TARGET={}", target);
    println!("cargo:rustc-env=DUALVISION_COMMIT={}", commit);
    println!("cargo:rustc-env=DUALVISION_BUILT_AT={}", built_at);
    Ok(())
}
