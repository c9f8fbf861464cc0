//! Sparse cell grid and the label locator used by both the exporter and the
//! importer.
//!
//! Labels are matched as upper-cased substrings, never exactly: template
//! revisions disagree on trailing colons and punctuation. The locator only
//! ever answers the first match in row-major order; callers that need a
//! later occurrence of a repeated label skip matches explicitly with
//! `locate_nth` or an `Occurrences` counter.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Zero-based cell address. Ordering is row-major, which is also the scan
/// order of the locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    pub row: u32,
    pub col: u32,
}

impl Address {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Shift by signed offsets; `None` when the result falls left of column A
    /// or above row 1.
    pub fn offset(self, offset_col: i32, offset_row: i32) -> Option<Address> {
        let row = i64::from(self.row) + i64::from(offset_row);
        let col = i64::from(self.col) + i64::from(offset_col);
        if row < 0 || col < 0 || row > i64::from(u32::MAX) || col > i64::from(u32::MAX) {
            return None;
        }
        Some(Address::new(row as u32, col as u32))
    }

    /// Parse "B12" style references (absolute markers allowed).
    pub fn parse_a1(s: &str) -> Option<Address> {
        let s = s.trim().replace('$', "");
        let split = s.find(|c: char| c.is_ascii_digit())?;
        let (letters, digits) = s.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        let mut col: u32 = 0;
        for ch in letters.chars() {
            let v = (ch.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
            col = col.checked_mul(26)?.checked_add(v)?;
        }
        let row: u32 = digits.parse().ok()?;
        if row == 0 {
            return None;
        }
        Some(Address::new(row - 1, col - 1))
    }

    pub fn column_letters(col: u32) -> String {
        let mut n = col + 1;
        let mut out = Vec::new();
        while n > 0 {
            let rem = (n - 1) % 26;
            out.push((b'A' + rem as u8) as char);
            n = (n - 1) / 26;
        }
        out.iter().rev().collect()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Address::column_letters(self.col), self.row + 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    pub fn display(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Search bound for the locator: rows `min_row..=max_row`, columns
/// `0..=max_col`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub min_row: u32,
    pub max_row: u32,
    pub max_col: u32,
}

impl Default for Region {
    fn default() -> Self {
        Self {
            min_row: 0,
            max_row: 300,
            max_col: 80,
        }
    }
}

impl Region {
    /// Default bound, scanning forward from `row`.
    pub fn from_row(row: u32) -> Self {
        Self {
            min_row: row,
            ..Self::default()
        }
    }

    pub fn rows(min_row: u32, max_row: u32) -> Self {
        Self {
            min_row,
            max_row,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Export mode: replace whatever is there.
    Overwrite,
    /// Label fallback mode: never touch a cell that already has content.
    IfEmpty,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    cells: BTreeMap<Address, CellValue>,
    edited: BTreeSet<Address>,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value read from a file; not counted as an edit.
    pub fn load(&mut self, addr: Address, value: CellValue) {
        self.cells.insert(addr, value);
    }

    pub fn get(&self, addr: Address) -> Option<&CellValue> {
        self.cells.get(&addr)
    }

    pub fn text(&self, addr: Address) -> String {
        self.cells.get(&addr).map(CellValue::display).unwrap_or_default()
    }

    pub fn is_empty_at(&self, addr: Address) -> bool {
        self.text(addr).trim().is_empty()
    }

    /// Replace a cell's content with plain text and record the edit.
    pub fn set_text(&mut self, addr: Address, text: impl Into<String>) {
        self.cells.insert(addr, CellValue::Text(text.into()));
        self.edited.insert(addr);
    }

    pub fn cells(&self) -> impl Iterator<Item = (Address, &CellValue)> {
        self.cells.iter().map(|(a, v)| (*a, v))
    }

    pub fn edited(&self) -> impl Iterator<Item = Address> + '_ {
        self.edited.iter().copied()
    }

    pub fn has_edits(&self) -> bool {
        !self.edited.is_empty()
    }
}

/// First cell in row-major order, within `region`, whose upper-cased text
/// contains `label`.
pub fn locate(grid: &Grid, label: &str, region: Region) -> Option<Address> {
    locate_nth(grid, label, 0, region)
}

/// Like `locate`, but skips the first `n` matches.
pub fn locate_nth(grid: &Grid, label: &str, n: usize, region: Region) -> Option<Address> {
    let needle = label.trim().to_uppercase();
    if needle.is_empty() || region.min_row > region.max_row {
        return None;
    }
    grid.cells
        .range(Address::new(region.min_row, 0)..)
        .take_while(|(a, _)| a.row <= region.max_row)
        .filter(|(a, _)| a.col <= region.max_col)
        .filter(|(_, v)| v.display().to_uppercase().contains(&needle))
        .map(|(a, _)| *a)
        .nth(n)
}

/// Write `value` at `addr` shifted by the offsets. Returns whether the cell
/// was written.
pub fn write_at(
    grid: &mut Grid,
    addr: Address,
    value: &str,
    offset_col: i32,
    offset_row: i32,
    mode: WriteMode,
) -> bool {
    let Some(target) = addr.offset(offset_col, offset_row) else {
        return false;
    };
    let target_empty = grid.is_empty_at(target);
    if mode == WriteMode::IfEmpty && !target_empty {
        return false;
    }
    if value.is_empty() && target_empty {
        return false;
    }
    grid.set_text(target, value);
    true
}

/// Display text at the shifted address, right-trimmed; empty when the cell
/// is absent.
pub fn read_at(grid: &Grid, addr: Address, offset_col: i32, offset_row: i32) -> String {
    addr.offset(offset_col, offset_row)
        .map(|a| grid.text(a).trim_end().to_string())
        .unwrap_or_default()
}

/// Per-label count of matches already consumed, for labels that repeat
/// (for example "GEN. AVE:" once per completer line).
#[derive(Debug, Default)]
pub struct Occurrences {
    consumed: HashMap<String, usize>,
}

impl Occurrences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unconsumed match of `label`. A miss does not advance the count.
    pub fn next(&mut self, grid: &Grid, label: &str, region: Region) -> Option<Address> {
        let key = label.trim().to_uppercase();
        let seen = self.consumed.get(&key).copied().unwrap_or(0);
        let found = locate_nth(grid, label, seen, region)?;
        self.consumed.insert(key, seen + 1);
        Some(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(cells: &[(&str, &str)]) -> Grid {
        let mut g = Grid::new();
        for (a1, text) in cells {
            g.load(
                Address::parse_a1(a1).expect("a1"),
                CellValue::Text(text.to_string()),
            );
        }
        g
    }

    #[test]
    fn a1_parse_and_format() {
        assert_eq!(Address::parse_a1("A1"), Some(Address::new(0, 0)));
        assert_eq!(Address::parse_a1("$AB$12"), Some(Address::new(11, 27)));
        assert_eq!(Address::parse_a1("A0"), None);
        assert_eq!(Address::parse_a1("12"), None);
        assert_eq!(Address::new(11, 27).to_string(), "AB12");
        assert_eq!(Address::column_letters(25), "Z");
        assert_eq!(Address::column_letters(26), "AA");
    }

    #[test]
    fn first_match_wins_and_nth_skips() {
        // "SCHOOL:" at (2,1) and (9,1).
        let mut g = Grid::new();
        g.load(Address::new(2, 1), CellValue::Text("SCHOOL:".into()));
        g.load(Address::new(9, 1), CellValue::Text("SCHOOL:".into()));
        let region = Region::default();
        assert_eq!(locate(&g, "SCHOOL:", region), Some(Address::new(2, 1)));
        assert_eq!(
            locate_nth(&g, "SCHOOL:", 1, region),
            Some(Address::new(9, 1))
        );
        assert_eq!(locate_nth(&g, "SCHOOL:", 2, region), None);
    }

    #[test]
    fn match_is_case_insensitive_substring() {
        let g = grid(&[("A3", "Last Name:"), ("C3", "Dela Cruz")]);
        assert_eq!(
            locate(&g, "LAST NAME", Region::default()),
            Some(Address::new(2, 0))
        );
        assert_eq!(locate(&g, "MIDDLE NAME", Region::default()), None);
        assert_eq!(locate(&g, "", Region::default()), None);
    }

    #[test]
    fn row_major_order_prefers_earlier_row() {
        let g = grid(&[("Z1", "x SY: y"), ("A2", "SY:")]);
        assert_eq!(
            locate(&g, "SY:", Region::default()),
            Some(Address::new(0, 25))
        );
    }

    #[test]
    fn region_limits_rows_and_columns() {
        let g = grid(&[("A1", "SCHOOL:"), ("A5", "SCHOOL:"), ("Z9", "SCHOOL:")]);
        assert_eq!(
            locate(&g, "SCHOOL:", Region::from_row(1)),
            Some(Address::new(4, 0))
        );
        let narrow = Region {
            min_row: 5,
            max_row: 20,
            max_col: 10,
        };
        assert_eq!(locate(&g, "SCHOOL:", narrow), None);
    }

    #[test]
    fn write_modes() {
        let mut g = grid(&[("A1", "LRN:"), ("B1", "kept")]);
        let at = Address::new(0, 0);
        assert!(!write_at(&mut g, at, "new", 1, 0, WriteMode::IfEmpty));
        assert_eq!(g.text(Address::new(0, 1)), "kept");
        assert!(write_at(&mut g, at, "new", 1, 0, WriteMode::Overwrite));
        assert_eq!(g.text(Address::new(0, 1)), "new");
        assert!(write_at(&mut g, at, "far", 40, 200, WriteMode::IfEmpty));
        assert_eq!(g.text(Address::new(200, 40)), "far");
        assert!(!write_at(&mut g, at, "x", -1, 0, WriteMode::Overwrite));
        assert_eq!(g.edited().count(), 2);
    }

    #[test]
    fn read_trims_right_and_formats_numbers() {
        let mut g = Grid::new();
        g.load(Address::new(0, 0), CellValue::Text("NAME:".into()));
        g.load(Address::new(0, 1), CellValue::Text("Dela Cruz  ".into()));
        g.load(Address::new(1, 1), CellValue::Number(87.0));
        let at = Address::new(0, 0);
        assert_eq!(read_at(&g, at, 1, 0), "Dela Cruz");
        assert_eq!(read_at(&g, at, 1, 1), "87");
        assert_eq!(read_at(&g, at, 5, 0), "");
    }

    #[test]
    fn occurrences_consume_in_order() {
        let g = grid(&[("A1", "Gen. Ave:"), ("A4", "GEN. AVE:")]);
        let mut occ = Occurrences::new();
        let r = Region::default();
        assert_eq!(occ.next(&g, "GEN. AVE", r), Some(Address::new(0, 0)));
        assert_eq!(occ.next(&g, "gen. ave", r), Some(Address::new(3, 0)));
        assert_eq!(occ.next(&g, "GEN. AVE", r), None);
    }
}
