//! Stamps the binaries with GIT_HASH, BUILD_TIMESTAMP and BUILD_PROFILE

use std::process::Command;

fn git_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?;
    Some(hash.trim().to_string())
}

fn main() {
    let hash = git_hash().unwrap_or_else(|| "unknown".to_string());
    let built = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    for (key, value) in [("GIT_HASH", hash), ("BUILD_TIMESTAMP", built), ("BUILD_PROFILE", profile)] {
        println!("cargo:rustc-env={}={}", key, value);
    }
}
