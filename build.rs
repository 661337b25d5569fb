use std::env;
use std::process::Command;

fn run_git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() { return None; }
    let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if s.is_empty() { None } else { Some(s) }
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");

    let commit = run_git(&["rev-parse", "--short=12", "HEAD"])
        .or_else(|| env::var("GITHUB_SHA").ok().map(|s| s.chars().take(12).collect()))
        .unwrap_or_else(|| "unknown".to_string());
    let describe = run_git(&["describe", "--tags", "--always", "--dirty"]).unwrap_or_else(|| "unknown".to_string());
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());

    // Consumed by `--version` in main.rs
    println!("cargo:rustc-env=GIT_COMMIT={}", commit);
    println!("cargo:rustc-env=GIT_DESCRIBE={}", describe);
    println!("cargo:rustc-env=BUILD_TARGET={}", target);
}
