use std::process::Command;

/// Run git and return trimmed stdout if it succeeded
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn main() {
    let version = env!("CARGO_PKG_VERSION");
    let profile = std::env::var("PROFILE").unwrap_or_default();

    // Release builds and source tarballs report the plain package version
    let version_str = match (profile.as_str(), git(&["rev-parse", "--short", "HEAD"])) {
        ("release", _) | (_, None) => version.to_string(),
        (_, Some(hash)) => {
            let dirty = git(&["diff-index", "--quiet", "HEAD"]).is_none();
            if dirty {
                format!("{}+{}-dirty", version, hash)
            } else {
                format!("{}+{}", version, hash)
            }
        }
    };

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rustc-env=VERSION_STRING={}", version_str);
}
