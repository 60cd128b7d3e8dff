//! Physical names derived from display names and dataset ids.

use uuid::Uuid;
use widestore::{BATCH_COLUMN, CHUNK_COLUMN, ROW_COLUMN};

const TABLE_PREFIX: &str = "ds_rows_";
const COLUMN_PREFIX: &str = "col_";
const EMPTY_COLUMN: &str = "unknown_col";

/// Row table of a dataset: `ds_rows_<id>` with `-` turned into `_`.
pub fn table_name(dataset_id: &Uuid) -> String {
    let id: String = dataset_id
        .to_string()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{TABLE_PREFIX}{id}")
}

/// Storage column for a display name.
///
/// Non-alphanumeric characters become `_` and letters are lowercased. Names
/// starting with a digit, and names that would shadow a key column, get the
/// `col_` prefix.
pub fn storage_column_name(display: &str) -> String {
    if display.is_empty() {
        return EMPTY_COLUMN.to_string();
    }
    let safe: String = display
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    let leading_digit = safe.starts_with(|c: char| c.is_ascii_digit());
    let reserved = [BATCH_COLUMN, CHUNK_COLUMN, ROW_COLUMN].contains(&safe.as_str());
    if leading_digit || reserved {
        format!("{COLUMN_PREFIX}{safe}")
    } else {
        safe
    }
}

/// Display names that map to a storage column already taken by an earlier
/// name, as `(earlier, later, storage)`.
pub fn storage_collisions<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<(String, String, String)> {
    let mut seen: Vec<(&str, String)> = Vec::new();
    let mut clashes = Vec::new();
    for name in names {
        let storage = storage_column_name(name);
        match seen.iter().find(|(_, s)| *s == storage) {
            Some((earlier, _)) if *earlier != name => {
                clashes.push((earlier.to_string(), name.to_string(), storage));
            }
            Some(_) => {}
            None => seen.push((name, storage)),
        }
    }
    clashes
}
