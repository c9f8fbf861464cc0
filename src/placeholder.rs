//! `%(key)` token substitution over workbook cells.

use crate::fields::FieldTable;
use crate::grid::{Address, CellValue, Grid};
use crate::record::StudentRecord;
use crate::xlsx::Workbook;
use indexmap::IndexSet;

/// A token found in cell text: byte span of the whole `%(key)` and the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub start: usize,
    pub end: usize,
    pub key: &'a str,
}

fn is_key_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// All non-overlapping tokens, left to right. Malformed openers (`%(` not
/// followed by key bytes and `)`) are skipped over.
pub fn tokens(text: &str) -> Vec<Token<'_>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] != b'%' || bytes[i + 1] != b'(' {
            i += 1;
            continue;
        }
        let key_start = i + 2;
        let mut j = key_start;
        while j < bytes.len() && is_key_byte(bytes[j]) {
            j += 1;
        }
        if j > key_start && j < bytes.len() && bytes[j] == b')' {
            out.push(Token {
                start: i,
                end: j + 1,
                key: &text[key_start..j],
            });
            i = j + 1;
        } else {
            i += 1;
        }
    }
    out
}

/// Replace every resolvable token. Unknown keys stay verbatim. `None` when
/// nothing in `text` resolved, meaning the cell must be left as it is.
pub fn substitute_text(text: &str, table: &FieldTable, record: &StudentRecord) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut replaced = false;
    for tok in tokens(text) {
        let Some(field) = table.lookup(tok.key) else {
            continue;
        };
        out.push_str(&text[last..tok.start]);
        out.push_str(&field.get(record));
        last = tok.end;
        replaced = true;
    }
    if !replaced {
        return None;
    }
    out.push_str(&text[last..]);
    Some(out)
}

fn is_textual(v: &CellValue) -> bool {
    matches!(v, CellValue::Text(_))
}

/// Substitute within one grid; returns how many cells changed.
pub fn substitute_grid(grid: &mut Grid, table: &FieldTable, record: &StudentRecord) -> usize {
    let candidates: Vec<(Address, String)> = grid
        .cells()
        .filter(|(_, v)| is_textual(v))
        .map(|(a, v)| (a, v.display()))
        .filter(|(_, text)| text.contains("%("))
        .collect();
    let mut changed = 0;
    for (addr, text) in candidates {
        if let Some(new_text) = substitute_text(&text, table, record) {
            grid.set_text(addr, new_text);
            changed += 1;
        }
    }
    changed
}

/// Substitute across every sheet; returns how many cells changed.
pub fn substitute_workbook(wb: &mut Workbook, table: &FieldTable, record: &StudentRecord) -> usize {
    wb.sheets_mut()
        .iter_mut()
        .map(|sheet| substitute_grid(&mut sheet.grid, table, record))
        .sum()
}

/// Distinct keys in order of first appearance (sheet order, then row-major).
pub fn scan_keys(wb: &Workbook) -> Vec<String> {
    let mut seen: IndexSet<String> = IndexSet::new();
    for sheet in wb.sheets() {
        for (_, v) in sheet.grid.cells() {
            if !is_textual(v) {
                continue;
            }
            let text = v.display();
            for tok in tokens(&text) {
                seen.insert(tok.key.to_string());
            }
        }
    }
    seen.into_iter().collect()
}

/// Cells whose whole (trimmed) text is exactly one token.
pub fn sole_token_cells(grid: &Grid) -> Vec<(Address, String)> {
    grid.cells()
        .filter(|(_, v)| is_textual(v))
        .filter_map(|(a, v)| {
            let text = v.display();
            let trimmed = text.trim();
            let toks = tokens(trimmed);
            match toks.as_slice() {
                [only] if only.start == 0 && only.end == trimmed.len() => {
                    Some((a, only.key.to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xlsx::testing;

    fn record() -> StudentRecord {
        let mut r = StudentRecord::default();
        r.info.lname = "Dela Cruz".into();
        r.info.fname = "Juan".into();
        r
    }

    #[test]
    fn finds_tokens_and_skips_malformed() {
        let t = tokens("a %(lname) b %(bad key) %() %(x_1)%(y)");
        let keys: Vec<&str> = t.iter().map(|t| t.key).collect();
        assert_eq!(keys, vec!["lname", "x_1", "y"]);
        assert!(tokens("100%(").is_empty());
    }

    #[test]
    fn substitutes_multiple_tokens_and_keeps_unknown() {
        let r = record();
        let table = FieldTable::for_record(&r);
        assert_eq!(
            substitute_text("%(lname), %(fname) %(mname)", &table, &r).as_deref(),
            Some("Dela Cruz, Juan ")
        );
        assert_eq!(
            substitute_text("Name: %(lname) [%(nickname)]", &table, &r).as_deref(),
            Some("Name: Dela Cruz [%(nickname)]")
        );
        assert_eq!(substitute_text("only %(nickname)", &table, &r), None);
        assert_eq!(substitute_text("no tokens", &table, &r), None);
    }

    #[test]
    fn unresolvable_cells_are_not_touched() {
        let bytes = testing::build(&[(
            "FRONT",
            &[("B2", "%(lname)"), ("C2", "%(unknown)"), ("D2", "plain")],
        )]);
        let mut wb = Workbook::from_bytes(&bytes).expect("load");
        let r = record();
        let changed = substitute_workbook(&mut wb, &FieldTable::for_record(&r), &r);
        assert_eq!(changed, 1);
        let g = &wb.sheets()[0].grid;
        assert_eq!(g.text(Address::new(1, 1)), "Dela Cruz");
        assert_eq!(g.text(Address::new(1, 2)), "%(unknown)");
        assert_eq!(g.edited().collect::<Vec<_>>(), vec![Address::new(1, 1)]);
    }

    #[test]
    fn scan_collapses_duplicates_in_first_seen_order() {
        let bytes = testing::build(&[
            ("FRONT", &[("A1", "%(lname)"), ("B1", "%(lname)"), ("A2", "%(fname) %(lname)")]),
            ("BACK", &[("A1", "%(s3sub_1)")]),
        ]);
        let wb = Workbook::from_bytes(&bytes).expect("load");
        assert_eq!(scan_keys(&wb), vec!["lname", "fname", "s3sub_1"]);
    }

    #[test]
    fn sole_token_cells_only_whole_cell_tokens() {
        let bytes = testing::build(&[(
            "FRONT",
            &[("A1", " %(lname) "), ("B1", "LRN: %(lrn)"), ("C1", "%(a)%(b)")],
        )]);
        let wb = Workbook::from_bytes(&bytes).expect("load");
        let cells = sole_token_cells(&wb.sheets()[0].grid);
        assert_eq!(cells, vec![(Address::new(0, 0), "lname".to_string())]);
    }
}
