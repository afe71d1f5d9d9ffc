use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");
    println!("cargo:rerun-if-changed=migrations");

    let revision =
        git(&["describe", "--always", "--dirty", "--abbrev=8"]).unwrap_or_else(|| "dev".to_string());
    println!("cargo:rustc-env=PLANORA_GIT_SHA={revision}");
}
