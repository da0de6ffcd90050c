//! Name rules that decide what reconciliation may touch.

use std::fs;
use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};

/// Top-level folder names that are content, never a wrapper to flatten.
pub const RECOGNIZED_CONTENT_FOLDERS: &[&str] = &[
    "mods",
    "config",
    "versions",
    "saves",
    "resourcepacks",
    "shaderpacks",
    "screenshots",
    "logs",
];

/// Target subfolders whose files are deleted when absent from the source.
pub const WATCHED_FOLDERS: &[&str] = &["mods", "config"];

/// Name fragments of user-installed cosmetic add-ons that are never deleted.
pub const WHITELIST_SUBSTRINGS: &[&str] = &[
    "figura",
    "emotecraft",
    "essential",
    "customskinloader",
    "skinlayers",
    "wavey-capes",
];

const SETTINGS_NAME: &str = "options.txt";
const SETTINGS_PATTERN: &str = "options*.txt";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Join path components with `/` so rules behave the same on every OS.
pub fn normalized(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether `relative` is a settings file that must not be overwritten.
pub fn is_settings_path(relative: &Path) -> bool {
    let path = normalized(relative);
    if path.eq_ignore_ascii_case(SETTINGS_NAME) {
        return true;
    }
    Pattern::new(SETTINGS_PATTERN)
        .map(|p| p.matches_with(&path, MATCH_OPTIONS))
        .unwrap_or(false)
}

/// Whether `relative` names a whitelisted add-on and is exempt from deletion.
pub fn is_whitelisted(relative: &Path) -> bool {
    contains_protected_fragment(&normalized(relative))
}

/// Whether a bare file name contains a protected fragment.
pub fn is_protected_name(name: &str) -> bool {
    contains_protected_fragment(name)
}

fn contains_protected_fragment(text: &str) -> bool {
    let lower = text.to_lowercase();
    WHITELIST_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

/// Whether `name` is a recognized content folder.
pub fn is_content_folder(name: &str) -> bool {
    RECOGNIZED_CONTENT_FOLDERS
        .iter()
        .any(|f| f.eq_ignore_ascii_case(name))
}

/// Pick the directory whose contents mirror the target root.
///
/// A staging area holding exactly one directory that is not a recognized
/// content folder is a wrapper, and that directory is returned instead.
pub fn effective_root(staging: &Path) -> std::io::Result<PathBuf> {
    let mut entries = fs::read_dir(staging)?.collect::<Result<Vec<_>, _>>()?;
    if entries.len() != 1 {
        return Ok(staging.to_path_buf());
    }

    let entry = entries.remove(0);
    let name = entry.file_name();
    if entry.file_type()?.is_dir() && !is_content_folder(&name.to_string_lossy()) {
        Ok(entry.path())
    } else {
        Ok(staging.to_path_buf())
    }
}
