//! Maps changed paths to the work item they describe.

use std::path::Path;

use beadwatch_model::ItemId;
use once_cell::sync::Lazy;
use regex::Regex;

static ITEM_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z]+-[0-9]+$").expect("item id regex should compile")
});

/// Result of classifying a changed path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Classification {
    pub item_id: Option<ItemId>,
}

/// Derive the item identifier from the base name of `path` with its final
/// extension removed. Paths that do not look like `PREFIX-123` (including the
/// aggregate store file) classify to no item.
pub fn classify(path: &Path) -> Classification {
    let item_id = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| ITEM_ID_PATTERN.is_match(stem))
        .map(ItemId::from);

    Classification { item_id }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(path: &str) -> Option<ItemId> {
        classify(Path::new(path)).item_id
    }

    #[test]
    fn item_file_yields_identifier() {
        assert_eq!(item("PROJ-123.md"), Some(ItemId::from("PROJ-123")));
        assert_eq!(
            item("/repo/.beads/issues/bd-7.md"),
            Some(ItemId::from("bd-7"))
        );
    }

    #[test]
    fn identifier_without_extension_still_matches() {
        assert_eq!(item("/repo/.beads/issues/ABC-1"), Some(ItemId::from("ABC-1")));
    }

    #[test]
    fn unrelated_names_yield_nothing() {
        assert_eq!(item("notes.txt"), None);
        assert_eq!(item("/repo/.beads/issues.jsonl"), None);
        assert_eq!(item(".issues.jsonl.swp"), None);
        assert_eq!(item("PROJ-12a.md"), None);
        assert_eq!(item("-12.md"), None);
        assert_eq!(item("PROJ-.md"), None);
        assert_eq!(item("PROJ-123.md.bak"), None);
    }

    #[test]
    fn empty_and_root_paths_are_total() {
        assert_eq!(item(""), None);
        assert_eq!(item("/"), None);
    }
}
