use std::{env, process::Command};

fn main() {
    let tag = build_value("CM_BUILD_GIT_TAG", || {
        run_git(&["describe", "--tags", "--exact-match"])
    })
    .unwrap_or_else(|| "untagged".to_string());
    let commit = build_value("CM_BUILD_GIT_COMMIT", || {
        run_git(&["rev-parse", "--short=12", "HEAD"])
    })
    .unwrap_or_else(|| "unknown".to_string());
    let dirty = build_value("CM_BUILD_GIT_DIRTY", || {
        run_git(&["status", "--porcelain", "--untracked-files=no"])
            .map(|output| (!output.is_empty()).to_string())
    })
    .unwrap_or_else(|| "false".to_string());

    println!("cargo:rustc-env=CM_BUILD_GIT_TAG={tag}");
    println!("cargo:rustc-env=CM_BUILD_GIT_COMMIT={commit}");
    println!("cargo:rustc-env=CM_BUILD_GIT_DIRTY={dirty}");
}

/// Explicit environment overrides win over whatever git reports.
fn build_value(key: &str, detect: impl FnOnce() -> Option<String>) -> Option<String> {
    println!("cargo:rerun-if-env-changed={key}");
    env::var(key).ok().or_else(detect)
}

fn run_git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|value| value.trim().to_string())
}
