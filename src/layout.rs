//! Where each field lives on a Form 137-SHS workbook, expressed as label
//! anchors plus offsets. The exporter writes through these slots and the
//! heuristic importer reads through the same slots, so both directions
//! share one description of the form.
//!
//! Semester blocks are found in order by a forward cursor over each sheet:
//! block N is the Nth "SUBJECTS" table that is not a remedial table, and its
//! header labels are searched only in the few rows above that table. This is
//! the occurrence counter for labels such as "SCHOOL:" that repeat once per
//! block.

use crate::fields::{resolve, FieldRef};
use crate::grid::{locate, Address, Grid, Occurrences, Region, WriteMode};
use crate::record::{AnnexEntry, SubjectKind};
use crate::xlsx::Workbook;

pub const FRONT: (&str, usize) = ("FRONT", 0);
pub const BACK: (&str, usize) = ("BACK", 1);
pub const ANNEX: (&str, usize) = ("ANNEX", 2);

/// Rows above a SUBJECTS header that may hold that block's school labels.
const HEADER_SPAN: u32 = 4;
/// Rows after the general-average row that may hold remarks and signatures.
const TRAILER_SPAN: u32 = 8;
/// Upper bound on subject rows when the table end cannot be found.
pub const MAX_TABLE_ROWS: usize = 40;

const SUBJECTS_LABEL: &str = "SUBJECTS";
const GENERAL_AVERAGE_LABEL: &str = "GENERAL AVE";
const REMEDIAL_LABEL: &str = "REMEDIAL";
const TEACHER_LABEL: &str = "NAME OF TEACHER";

/// Column offsets from the SUBJECTS header cell.
pub const SUBJECT_OFFSETS: &[(&str, u32)] = &[
    ("type", 0),
    ("sub", 8),
    ("q1", 14),
    ("q2", 16),
    ("final", 18),
    ("action", 20),
];
pub const REMEDIAL_OFFSETS: &[(&str, u32)] = &[
    ("rtype", 0),
    ("rsub", 8),
    ("rsem", 14),
    ("rclass", 16),
    ("rrecomp", 18),
    ("raction", 20),
];
const FINAL_COLUMN: u32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pick {
    First,
    /// Consume the next occurrence of a repeated label.
    Next,
}

struct LabelSpec {
    label: &'static str,
    key: &'static str,
    col: i32,
    row: i32,
    pick: Pick,
}

const fn spec(label: &'static str, key: &'static str, col: i32, row: i32) -> LabelSpec {
    LabelSpec {
        label,
        key,
        col,
        row,
        pick: Pick::First,
    }
}

const fn repeated(label: &'static str, key: &'static str, col: i32) -> LabelSpec {
    LabelSpec {
        label,
        key,
        col,
        row: 0,
        pick: Pick::Next,
    }
}

/// Learner information and eligibility, above the scholastic record.
const FRONT_LABELS: &[LabelSpec] = &[
    spec("LAST NAME", "lname", 1, 0),
    spec("FIRST NAME", "fname", 1, 0),
    spec("MIDDLE NAME", "mname", 1, 0),
    spec("LRN:", "lrn", 1, 0),
    spec("DATE OF BIRTH", "birthdate", 1, 0),
    spec("SEX:", "sex", 1, 0),
    spec("DATE OF SHS ADMISSION", "admission", 1, 0),
    spec("IRREGULAR", "irregular", -1, 0),
    spec("HIGH SCHOOL COMPLETER", "hs_completer", -1, 0),
    repeated("GEN. AVE", "hs_genave", 1),
    spec("JUNIOR HIGH SCHOOL COMPLETER", "jhs_completer", -1, 0),
    repeated("GEN. AVE", "jhs_genave", 1),
    spec("DATE OF GRADUATION/COMPLETION", "grad_date", 1, 0),
    spec("NAME OF SCHOOL", "elem_school", 1, 0),
    spec("SCHOOL ADDRESS", "elem_address", 1, 0),
    spec("PEPT PASSER", "pept", -1, 0),
    repeated("RATING", "pept_rating", 1),
    spec("ALS A&E PASSER", "als", -1, 0),
    repeated("RATING", "als_rating", 1),
    spec("DATE OF EXAMINATION", "exam_date", 1, 0),
    spec("OTHERS (PLS. SPECIFY)", "others", -1, 0),
    spec("OTHERS (PLS. SPECIFY)", "others_specify", 1, 0),
    spec("COMMUNITY LEARNING CENTER", "clc", 1, 0),
];

/// Semester header, searched above the SUBJECTS table. Keys get `s{n}`.
const SEMESTER_HEADER_LABELS: &[LabelSpec] = &[
    spec("SCHOOL:", "school", 1, 0),
    spec("SCHOOL ID", "schoolid", 1, 0),
    spec("GRADE LEVEL", "grade", 1, 0),
    spec("SY:", "sy", 1, 0),
    spec("SEM:", "sem", 1, 0),
    spec("TRACK/STRAND", "track", 1, 0),
    spec("SECTION", "section", 1, 0),
];

/// Below the general-average row.
const SEMESTER_TRAILER_LABELS: &[LabelSpec] = &[
    spec("REMARKS", "remarks", 1, 0),
    spec("PREPARED BY", "adviser", 0, 1),
    spec("CERTIFIED TRUE AND CORRECT", "certby", 0, 1),
    spec("DATE CHECKED", "datechecked", 1, 0),
];

/// Between the REMEDIAL anchor and the remedial SUBJECTS table.
const REMEDIAL_HEADER_LABELS: &[LabelSpec] = &[
    spec("CONDUCTED FROM", "rem_from", 1, 0),
    spec("TO:", "rem_to", 1, 0),
    spec("SCHOOL:", "rem_school", 1, 0),
    spec("SCHOOL ID", "rem_schoolid", 1, 0),
];

/// After the last semester block on the back sheet.
const CERTIFICATION_LABELS: &[LabelSpec] = &[
    spec("TRACK/STRAND ACCOMPLISHED", "cert_track", 1, 0),
    spec("SHS GENERAL AVERAGE", "cert_genave", 1, 0),
    spec("AWARDS/HONORS RECEIVED", "cert_awards", 1, 0),
    spec("DATE OF SHS GRADUATION", "cert_graddate", 1, 0),
    spec("SCHOOL HEAD", "cert_head", 1, 0),
    spec("DATE CERTIFIED", "cert_date", 1, 0),
    spec("REMARKS", "cert_remarks", 1, 0),
    spec("DATE ISSUED", "cert_issued", 1, 0),
];

/// Annex column headers, one list of subject names under each.
const ANNEX_HEADERS: &[(SubjectKind, &str)] = &[
    (SubjectKind::Core, "CORE SUBJECTS"),
    (SubjectKind::Applied, "APPLIED SUBJECTS"),
    (SubjectKind::Specialized, "SPECIALIZED SUBJECTS"),
    (SubjectKind::Other, "OTHER SUBJECTS"),
];

/// One field's position: the anchor cell found by label search and the
/// offset of the value cell from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub sheet: usize,
    pub anchor: Address,
    pub offset_col: i32,
    pub offset_row: i32,
    pub field: FieldRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemedialLayout {
    pub anchor: Address,
    pub subjects: Address,
    pub teacher: Option<Address>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemesterLayout {
    pub header_start: u32,
    pub subjects: Address,
    pub general_average: Option<Address>,
    pub remedial: Option<RemedialLayout>,
    /// First row after this block; the cursor for the next one.
    pub end_row: u32,
}

impl SemesterLayout {
    /// Rows available for subjects before the general-average row.
    fn subject_capacity(&self) -> Option<usize> {
        self.general_average
            .map(|ga| ga.row.saturating_sub(self.subjects.row + 1) as usize)
    }
}

impl RemedialLayout {
    fn capacity(&self) -> Option<usize> {
        self.teacher
            .map(|t| t.row.saturating_sub(self.subjects.row + 1) as usize)
    }
}

fn bounded_rows(from: u32, span: u32) -> Region {
    Region::rows(from, from.saturating_add(span))
}

/// Find the next semester block at or after `from_row`.
pub fn find_semester(grid: &Grid, from_row: u32) -> Option<SemesterLayout> {
    let subjects = locate(grid, SUBJECTS_LABEL, Region::from_row(from_row))?;
    let header_start = from_row.max(subjects.row.saturating_sub(HEADER_SPAN));
    let next_table = locate(grid, SUBJECTS_LABEL, Region::from_row(subjects.row + 1));

    let table_end = next_table
        .map(|a| a.row.saturating_sub(1))
        .unwrap_or(subjects.row + MAX_TABLE_ROWS as u32 + TRAILER_SPAN);
    let general_average = locate(
        grid,
        GENERAL_AVERAGE_LABEL,
        Region::rows(subjects.row + 1, table_end.max(subjects.row + 1)),
    );

    let remedial = locate(
        grid,
        REMEDIAL_LABEL,
        Region::rows(subjects.row + 1, table_end.max(subjects.row + 1)),
    )
    .and_then(|anchor| {
        let rem_subjects = next_table.filter(|t| t.row > anchor.row)?;
        let teacher = locate(
            grid,
            TEACHER_LABEL,
            bounded_rows(rem_subjects.row + 1, MAX_TABLE_ROWS as u32),
        );
        Some(RemedialLayout {
            anchor,
            subjects: rem_subjects,
            teacher,
        })
    });

    let end_row = match (&remedial, general_average) {
        (Some(r), _) => r.teacher.unwrap_or(r.subjects).row + 1,
        (None, Some(ga)) => ga.row + 1,
        (None, None) => subjects.row + 1,
    };

    Some(SemesterLayout {
        header_start,
        subjects,
        general_average,
        remedial,
        end_row,
    })
}

/// All blocks of one sheet, in order.
pub fn semesters_in(grid: &Grid) -> Vec<SemesterLayout> {
    let mut out = Vec::new();
    let mut cursor = 0;
    while let Some(block) = find_semester(grid, cursor) {
        cursor = block.end_row;
        out.push(block);
    }
    out
}

/// Front and back sheet indexes, distinct and in that order.
fn record_sheets(wb: &Workbook) -> Vec<usize> {
    let mut sheets = Vec::new();
    for (name, pos) in [FRONT, BACK] {
        if let Some(i) = wb.sheet_index(name, pos) {
            if !sheets.contains(&i) {
                sheets.push(i);
            }
        }
    }
    sheets
}

struct Planner<'a> {
    out: Vec<Slot>,
    sheet: usize,
    grid: &'a Grid,
}

impl<'a> Planner<'a> {
    fn labels(&mut self, specs: &[LabelSpec], prefix: &str, region: Region) {
        let mut occ = Occurrences::new();
        for s in specs {
            let found = match s.pick {
                Pick::First => locate(self.grid, s.label, region),
                Pick::Next => occ.next(self.grid, s.label, region),
            };
            let (Some(anchor), Some(field)) = (found, resolve(&format!("{prefix}{}", s.key))) else {
                continue;
            };
            self.out.push(Slot {
                sheet: self.sheet,
                anchor,
                offset_col: s.col,
                offset_row: s.row,
                field,
            });
        }
    }

    fn table(&mut self, header: Address, offsets: &[(&str, u32)], n: usize, rows: usize) {
        for i in 1..=rows {
            for (col, offset) in offsets {
                let Some(field) = resolve(&format!("s{n}{col}_{i}")) else {
                    continue;
                };
                self.out.push(Slot {
                    sheet: self.sheet,
                    anchor: header,
                    offset_col: *offset as i32,
                    offset_row: i as i32,
                    field,
                });
            }
        }
    }

    /// Plan one block; returns the last row any of its slots anchor on.
    fn semester(&mut self, n: usize, block: &SemesterLayout, rows_hint: usize) -> u32 {
        let first = self.out.len();
        let prefix = format!("s{n}");
        if block.subjects.row > block.header_start {
            self.labels(
                SEMESTER_HEADER_LABELS,
                &prefix,
                Region::rows(block.header_start, block.subjects.row - 1),
            );
        }

        let rows = block
            .subject_capacity()
            .map_or(rows_hint, |cap| cap.min(rows_hint));
        self.table(block.subjects, SUBJECT_OFFSETS, n, rows);

        if let Some(ga) = block.general_average {
            if let Some(field) = resolve(&format!("{prefix}genave")) {
                self.out.push(Slot {
                    sheet: self.sheet,
                    anchor: Address::new(ga.row, block.subjects.col),
                    offset_col: FINAL_COLUMN as i32,
                    offset_row: 0,
                    field,
                });
            }
            let trailer_end = block
                .remedial
                .map(|r| r.anchor.row.saturating_sub(1))
                .unwrap_or(ga.row + TRAILER_SPAN)
                .max(ga.row);
            self.labels(SEMESTER_TRAILER_LABELS, &prefix, Region::rows(ga.row, trailer_end));
        }

        if let Some(rem) = block.remedial {
            if rem.subjects.row > rem.anchor.row {
                self.labels(
                    REMEDIAL_HEADER_LABELS,
                    &prefix,
                    Region::rows(rem.anchor.row, rem.subjects.row - 1),
                );
            }
            let rows = rem.capacity().map_or(rows_hint, |cap| cap.min(rows_hint));
            self.table(rem.subjects, REMEDIAL_OFFSETS, n, rows);
            if let Some(teacher) = rem.teacher {
                if let Some(field) = resolve(&format!("{prefix}rem_teacher")) {
                    self.out.push(Slot {
                        sheet: self.sheet,
                        anchor: teacher,
                        offset_col: 1,
                        offset_row: 0,
                        field,
                    });
                }
            }
        }

        self.out[first..]
            .iter()
            .map(|slot| slot.anchor.row)
            .max()
            .unwrap_or(block.subjects.row)
            .max(block.end_row.saturating_sub(1))
    }
}

/// Every label-addressed field of the workbook. Subject tables get up to
/// `rows_hint` rows each, fewer when the table's end is known.
pub fn plan(wb: &Workbook, rows_hint: usize) -> Vec<Slot> {
    let mut out = Vec::new();
    let mut semester = 0usize;
    let sheets = record_sheets(wb);

    for (pos, &sheet) in sheets.iter().enumerate() {
        let grid = &wb.sheets()[sheet].grid;
        let blocks = semesters_in(grid);
        let mut p = Planner {
            out: Vec::new(),
            sheet,
            grid,
        };

        if pos == 0 {
            let region = match blocks.first() {
                Some(b) if b.subjects.row > 0 => Region::rows(0, b.subjects.row - 1),
                _ => Region::default(),
            };
            p.labels(FRONT_LABELS, "", region);
        }

        let mut last_row = None;
        for block in &blocks {
            if semester == 4 {
                break;
            }
            semester += 1;
            last_row = Some(p.semester(semester, block, rows_hint));
        }

        if pos + 1 == sheets.len() {
            let from = last_row.map_or(0, |r| r + 1);
            p.labels(CERTIFICATION_LABELS, "", Region::from_row(from));
        }

        out.extend(p.out);
    }
    out
}

/// Write annex subject names under their kind headers, active entries only,
/// in record order.
pub fn write_annex(grid: &mut Grid, annex: &[AnnexEntry], mode: WriteMode) -> usize {
    let mut written = 0;
    for (kind, label) in ANNEX_HEADERS {
        let Some(header) = locate(grid, label, Region::default()) else {
            continue;
        };
        let names = annex
            .iter()
            .filter(|a| a.kind == *kind && a.active)
            .map(|a| a.subject.as_str());
        for (k, name) in names.enumerate() {
            if crate::grid::write_at(grid, header, name, 0, k as i32 + 1, mode) {
                written += 1;
            }
        }
    }
    written
}

/// Read annex lists back; each list ends at its first empty cell.
pub fn read_annex(grid: &Grid) -> Vec<AnnexEntry> {
    let mut out = Vec::new();
    for (kind, label) in ANNEX_HEADERS {
        let Some(header) = locate(grid, label, Region::default()) else {
            continue;
        };
        for k in 1..=MAX_TABLE_ROWS as i32 {
            let name = crate::grid::read_at(grid, header, 0, k);
            if name.trim().is_empty() {
                break;
            }
            out.push(AnnexEntry {
                kind: *kind,
                subject: name,
                active: true,
            });
        }
    }
    out
}


#[cfg(test)]
mod tests {
    use super::*;

    fn slot_keys(slots: &[Slot]) -> Vec<String> {
        slots.iter().map(|s| s.field.key()).collect()
    }

    #[test]
    fn semester_blocks_skip_remedial_tables() {
        let wb = Workbook::from_bytes(&fixtures::form_bytes()).expect("load");
        let front = wb.grid("FRONT", 0).expect("front");
        let blocks = semesters_in(front);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].subjects, Address::new(12, 0));
        assert_eq!(blocks[0].general_average, Some(Address::new(16, 0)));
        let rem = blocks[0].remedial.expect("remedial");
        assert_eq!(rem.subjects, Address::new(23, 0));
        assert_eq!(rem.teacher, Some(Address::new(26, 0)));
        assert_eq!(blocks[0].end_row, 27);
        assert_eq!(blocks[1].subjects, Address::new(31, 0));
        assert!(blocks[1].remedial.is_none());
    }

    #[test]
    fn plan_maps_semesters_in_order_across_sheets() {
        let wb = Workbook::from_bytes(&fixtures::form_bytes()).expect("load");
        let slots = plan(&wb, 10);
        let keys = slot_keys(&slots);

        let school = |k: &str| {
            slots
                .iter()
                .find(|s| s.field.key() == k)
                .map(|s| (s.sheet, s.anchor))
        };
        assert_eq!(school("s1school"), Some((0, Address::new(10, 0))));
        assert_eq!(school("s1rem_school"), Some((0, Address::new(22, 7))));
        assert_eq!(school("s2school"), Some((0, Address::new(29, 0))));
        assert_eq!(school("s3school"), Some((1, Address::new(1, 0))));
        assert!(!keys.iter().any(|k| k.starts_with("s4")));

        // Capacity: 3 rows between SUBJECTS (row 13) and GENERAL AVERAGE (row 17).
        assert!(keys.contains(&"s1sub_3".to_string()));
        assert!(!keys.contains(&"s1sub_4".to_string()));
        assert!(keys.contains(&"s1rsub_2".to_string()));
        assert!(!keys.contains(&"s1rsub_3".to_string()));

        // Repeated labels consumed in order.
        assert_eq!(school("hs_genave"), Some((0, Address::new(5, 3))));
        assert_eq!(school("jhs_genave"), Some((0, Address::new(5, 8))));
        assert_eq!(school("als_rating"), Some((0, Address::new(7, 8))));

        // Certification only from the back sheet, after its last block.
        assert_eq!(school("cert_genave"), Some((1, Address::new(11, 7))));
        assert_eq!(school("cert_remarks"), None);
    }

    #[test]
    fn front_labels_stop_above_first_semester() {
        let wb = Workbook::from_bytes(&fixtures::form_bytes()).expect("load");
        let slots = plan(&wb, 1);
        let lrn: Vec<_> = slots.iter().filter(|s| s.field.key() == "lrn").collect();
        assert_eq!(lrn.len(), 1);
        assert_eq!(lrn[0].anchor, Address::new(3, 0));
    }

    #[test]
    fn annex_lists_round_trip() {
        let mut wb = Workbook::from_bytes(&fixtures::form_bytes()).expect("load");
        let annex = vec![
            AnnexEntry {
                kind: SubjectKind::Core,
                subject: "Oral Communication".into(),
                active: true,
            },
            AnnexEntry {
                kind: SubjectKind::Applied,
                subject: "Empowerment Technologies".into(),
                active: true,
            },
            AnnexEntry {
                kind: SubjectKind::Core,
                subject: "Retired".into(),
                active: false,
            },
            AnnexEntry {
                kind: SubjectKind::Core,
                subject: "General Mathematics".into(),
                active: true,
            },
        ];
        let grid = wb.grid_mut("ANNEX", 2).expect("annex");
        assert_eq!(write_annex(grid, &annex, WriteMode::Overwrite), 3);
        let back = read_annex(grid);
        let names: Vec<&str> = back.iter().map(|a| a.subject.as_str()).collect();
        assert_eq!(
            names,
            vec!["Oral Communication", "General Mathematics", "Empowerment Technologies"]
        );
    }
}
