use std::process::Command;

fn main() {
    let now = chrono::Utc::now();
    println!(
        "cargo:rustc-env=CLAUDE_USAGE_MONITOR_BUILD_TIME={}",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "cargo:rustc-env=CLAUDE_USAGE_MONITOR_BUILD_ID={}",
        now.format("%Y%m%d%H%M%S")
    );

    println!("cargo:rerun-if-changed=.git/HEAD");

    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
    {
        if output.status.success() {
            let git_hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
            println!("cargo:rustc-env=CLAUDE_USAGE_MONITOR_GIT_HASH={}", git_hash);
        }
    }
}
