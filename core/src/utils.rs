//! Shared process utilities.

use std::path::{Path, PathBuf};

/// Locate an executable: an explicit path is used as-is when it exists,
/// a bare name is searched for on `PATH`.
pub(crate) fn find_executable(bin: &Path) -> Option<PathBuf> {
    match std::env::var_os("PATH") {
        Some(paths) => find_executable_in(bin, std::env::split_paths(&paths)),
        None => find_executable_in(bin, std::iter::empty::<PathBuf>()),
    }
}

/// Like `find_executable`, but bare names are searched for in `dirs`.
pub(crate) fn find_executable_in<I>(bin: &Path, dirs: I) -> Option<PathBuf>
where
    I: IntoIterator,
    I::Item: AsRef<Path>,
{
    if bin.components().count() > 1 || bin.is_absolute() {
        return bin.exists().then(|| bin.to_path_buf());
    }
    dirs.into_iter()
        .map(|dir| dir.as_ref().join(bin))
        .find(|candidate| candidate.is_file())
}

/// Trim and cap engine diagnostics so they stay readable in a JSON message.
pub(crate) fn diagnostic_text(stderr: &[u8]) -> String {
    const MAX_CHARS: usize = 2000;
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.chars().count() > MAX_CHARS {
        let head: String = text.chars().take(MAX_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
