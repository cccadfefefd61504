//! URL derivation for release artifacts and Gitian assertion documents.

/// Download subdirectory for a (software, build tag) pair.
///
/// Source builds live under `source/`, the GUI bundle sits at the root of
/// the download host, everything else under `cli/`.
#[must_use]
pub fn subdir_for(software: &str, build_tag: &str) -> &'static str {
    if build_tag.contains("-source") {
        "source"
    } else if software.contains("-gui") {
        ""
    } else {
        "cli"
    }
}

/// Canonical download URL for a release artifact.
#[must_use]
pub fn update_url(base: &str, software: &str, subdir: &str, build_tag: &str, version: &str) -> String {
    let ext = if build_tag.starts_with("win") {
        "zip"
    } else {
        "tar.bz2"
    };
    let filename = format!("{}-{}-v{}.{}", software, build_tag, version, ext);
    if subdir.is_empty() {
        format!("{}/{}", base, filename)
    } else {
        format!("{}/{}/{}", base, subdir, filename)
    }
}

/// Last path segment of a URL.
#[must_use]
pub fn artifact_filename(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

/// Gitian build tag for a DNS build tag; unmapped tags pass through.
#[must_use]
pub fn gitian_build_tag(build_tag: &str) -> &str {
    match build_tag {
        "linux-x64" => "x86_64-linux-gnu",
        "linux-x32" => "i686-linux-gnu",
        "win-x64" => "x86_64-w64-mingw32",
        "win-x32" => "i686-w64-mingw32",
        "freebsd" => "x86_64-unknown-freebsd",
        "mac-x64" => "x86_64-apple-darwin11",
        "linux-armv7" => "arm-linux-gnueabihf",
        "linux-armv8" => "aarch64-linux-gnu",
        other => other,
    }
}

/// Coarse Gitian platform token: the build tag up to the first `-`,
/// with the historical `mac` → `osx` rename applied.
#[must_use]
pub fn gitian_platform(build_tag: &str) -> &str {
    let coarse = build_tag.split('-').next().unwrap_or(build_tag);
    match coarse {
        "mac" => "osx",
        other => other,
    }
}

/// Path of the signer tree index under the VCS host.
#[must_use]
pub fn gitian_tree_path(project: &str, version: &str, platform: &str) -> String {
    format!("/{}/gitian.sigs/tree/master/v{}-{}", project, version, platform)
}

/// Base URL for raw assertion documents of one release/platform.
#[must_use]
pub fn gitian_blob_base(raw_host: &str, project: &str, version: &str, platform: &str) -> String {
    format!(
        "{}/{}/gitian.sigs/master/v{}-{}",
        raw_host, project, version, platform
    )
}

/// Assertion document URL for one signer. `short_version` is the first four
/// characters of the release version.
#[must_use]
pub fn gitian_assert_url(
    blob_base: &str,
    user: &str,
    software: &str,
    platform: &str,
    version: &str,
) -> String {
    let short_version: String = version.chars().take(4).collect();
    format!(
        "{}/{}/{}-{}-{}-build.assert",
        blob_base, user, software, platform, short_version
    )
}
