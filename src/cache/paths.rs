// Cache path utilities.
// Locates the platform cache directory and sanitizes names for the filesystem.

use std::path::PathBuf;

use directories::ProjectDirs;

/// Get the base cache directory (~/.cache/starhop on Linux).
pub fn cache_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "starhop").map(|dirs| dirs.cache_dir().to_path_buf())
}

/// Sanitize a name for use in filesystem paths.
/// Replaces problematic characters with underscores.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}
