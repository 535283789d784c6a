use std::collections::HashSet;
use tracing::warn;

/// Field key for a header cell: ASCII lowercase, every run of other
/// characters (non-ASCII letters included) collapsed to one `_`, no leading
/// or trailing `_`.
///
/// `"Full Name"` → `"full_name"`, `"E-mail Address "` → `"e_mail_address"`.
pub fn normalize_header(cell: &str) -> String {
    let mut key = String::with_capacity(cell.len());
    let mut pending_sep = false;
    for ch in cell.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !key.is_empty() {
                key.push('_');
            }
            pending_sep = false;
            key.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    key
}

/// Keys for a whole header row. Blank cells become `column_<n>` (1-based)
/// and repeated keys get a `_2`, `_3`… suffix so every key is unique.
pub fn header_keys(cells: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(cells.len());
    cells
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            let mut key = normalize_header(cell);
            if key.is_empty() {
                key = format!("column_{}", idx + 1);
            }
            if !seen.insert(key.clone()) {
                let mut n = 2;
                while !seen.insert(format!("{key}_{n}")) {
                    n += 1;
                }
                warn!(header = %cell, key = %format!("{key}_{n}"), "duplicate header renamed");
                key = format!("{key}_{n}");
            }
            key
        })
        .collect()
}
