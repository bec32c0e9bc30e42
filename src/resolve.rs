use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Resolve //, /./, and /../ in a request target.
///
/// Returns None if the target is invalid/unsafe: it doesn't start with a slash, contains a NUL
/// byte, or climbs above the root. A trailing slash is preserved. Works on raw bytes, so targets
/// that aren't UTF-8 come through unchanged.
pub fn make_safe_url(url: &[u8]) -> Option<Vec<u8>> {
    // URLs not starting with a slash are illegal.
    if !url.starts_with(b"/") || url.contains(&0) {
        return None;
    }

    let mut components = Vec::new();
    for component in url.split(|&b| b == b'/') {
        match component {
            b"" | b"." => {}
            b".." => {
                components.pop()?;
            }
            component => components.push(component),
        }
    }

    let mut safe_url = Vec::with_capacity(url.len());
    for component in &components {
        safe_url.push(b'/');
        safe_url.extend_from_slice(component);
    }
    // Always preserve leading slash
    if safe_url.is_empty() || url.ends_with(b"/") {
        safe_url.push(b'/');
    }
    Some(safe_url)
}

/// Map a request target onto a path beneath `docroot`.
pub fn resolve(docroot: &Path, target: &[u8]) -> Option<PathBuf> {
    let safe_url = make_safe_url(target)?;
    let relative = safe_url.strip_prefix(b"/").unwrap_or(&safe_url);
    Some(docroot.join(OsStr::from_bytes(relative)))
}
