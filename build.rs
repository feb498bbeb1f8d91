fn main() {
    let version = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let built = chrono::Utc::now().format("%Y-%m-%d").to_string();

    let hash = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());

    // Shown by `conductor --version`
    let long_version = match hash {
        Some(hash) => format!("{} ({}, built {})", version, hash, built),
        None => format!("{} (built {})", version, built),
    };
    println!("cargo:rustc-env=CONDUCTOR_LONG_VERSION={long_version}");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
