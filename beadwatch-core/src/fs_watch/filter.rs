//! Ignore rules for paths surfacing inside a watched item directory.

use std::path::{Component, Path};

const EDITOR_TEMP_SUFFIXES: &[&str] = &[".swp", ".swx", ".swo", ".tmp"];

/// Whether a path, relative to the watch root it was reported under, names a
/// hidden file or an editor scratch file.
///
/// Any dot-prefixed component counts as hidden. The rule is evaluated below
/// the watch root only, so the dot-prefixed store directory that holds every
/// target never hides anything by itself.
pub fn is_ignored(relative: &Path) -> bool {
    let hidden = relative.components().any(|component| match component {
        Component::Normal(segment) => {
            segment.to_str().is_some_and(|seg| seg.starts_with('.'))
        }
        _ => false,
    });
    if hidden {
        return true;
    }

    let Some(name) = relative.file_name().and_then(|name| name.to_str()) else {
        return false;
    };

    name.ends_with('~')
        || EDITOR_TEMP_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        || (name.len() > 1 && name.starts_with('#') && name.ends_with('#'))
        // vim probes directory writability with this name
        || name == "4913"
}
