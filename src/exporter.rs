use crate::error::{CoreError, CoreResult};
use crate::fields::FieldTable;
use crate::grid::{write_at, WriteMode};
use crate::layout::{self, ANNEX};
use crate::placeholder::substitute_workbook;
use crate::record::StudentRecord;
use crate::xlsx::Workbook;
use std::path::Path;

/// Rows the label pass needs in any subject table: the longest table the
/// record has.
fn rows_hint(record: &StudentRecord) -> usize {
    (1..=4)
        .filter_map(|n| record.semester(n))
        .map(|s| s.subjects.len().max(s.remedial.subjects.len()))
        .max()
        .unwrap_or(0)
}

pub(crate) fn load_workbook(bytes: &[u8], what: &str) -> CoreResult<Workbook> {
    Workbook::from_bytes(bytes)
        .map_err(|e| CoreError::MalformedInput(format!("unreadable {what}: {e:#}")))
}

/// Fill a template with one record and return the new workbook bytes.
///
/// Placeholders are substituted first. The label pass then writes every
/// field it can anchor; when the placeholder pass changed anything it only
/// fills cells that are still empty, so a template's tokens always win.
pub fn export(record: &StudentRecord, template: &[u8]) -> CoreResult<Vec<u8>> {
    let mut wb = load_workbook(template, "template")?;

    let table = FieldTable::for_record(record);
    let substituted = substitute_workbook(&mut wb, &table, record);
    let mode = if substituted > 0 {
        WriteMode::IfEmpty
    } else {
        WriteMode::Overwrite
    };

    let slots = layout::plan(&wb, rows_hint(record));
    let mut written = 0usize;
    for slot in &slots {
        if !slot.field.row_exists(record) {
            continue;
        }
        let value = slot.field.get(record);
        let grid = &mut wb.sheets_mut()[slot.sheet].grid;
        if write_at(grid, slot.anchor, &value, slot.offset_col, slot.offset_row, mode) {
            written += 1;
        }
    }
    if let Some(grid) = wb.grid_mut(ANNEX.0, ANNEX.1) {
        written += layout::write_annex(grid, &record.annex, mode);
    }

    tracing::debug!(fields = table.len(), substituted, slots = slots.len(), written, "template filled");
    Ok(wb.to_bytes()?)
}

/// `export` against a template on disk. The file is read before any work
/// starts; a missing or unreadable template is a resource error.
pub fn export_file(record: &StudentRecord, template_path: &Path) -> CoreResult<Vec<u8>> {
    let template = std::fs::read(template_path).map_err(|e| {
        CoreError::Resource(format!("template {}: {e}", template_path.display()))
    })?;
    export(record, &template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Address;
    use crate::layout::fixtures;
    use crate::record::Subject;
    use crate::xlsx::testing;

    fn text(wb: &Workbook, sheet: usize, a1: &str) -> String {
        wb.sheets()[sheet]
            .grid
            .text(Address::parse_a1(a1).expect("a1"))
    }

    #[test]
    fn placeholder_template_with_subject_table() {
        let mut record = StudentRecord::default();
        record.info.lname = "Dela Cruz".into();
        record.info.fname = "Juan".into();
        record.semester1.subjects.push(Subject {
            subject: "Math".into(),
            q1: "80".into(),
            q2: "90".into(),
            ..Subject::default()
        });
        let template = testing::build(&[(
            "FRONT",
            &[("B2", "%(lname)"), ("D2", "%(fname)"), ("A5", "SUBJECTS")],
        )]);

        let out = export(&record, &template).expect("export");
        let wb = Workbook::from_bytes(&out).expect("reload");
        assert_eq!(text(&wb, 0, "B2"), "Dela Cruz");
        assert_eq!(text(&wb, 0, "D2"), "Juan");
        assert_eq!(text(&wb, 0, "I6"), "Math");
        assert_eq!(text(&wb, 0, "O6"), "80");
        assert_eq!(text(&wb, 0, "Q6"), "90");
        assert_eq!(text(&wb, 0, "I7"), "");
    }

    #[test]
    fn placeholders_take_precedence_over_label_writes() {
        let mut record = StudentRecord::default();
        record.info.lname = "Santos".into();
        record.info.fname = "Maria".into();
        record.info.lrn = "123456789012".into();
        let template = testing::build(&[(
            "FRONT",
            &[
                ("A3", "LAST NAME:"),
                ("B3", "%(lname)"),
                ("E3", "FIRST NAME:"),
                ("F3", "(see ID)"),
                ("A4", "LRN:"),
            ],
        )]);

        let wb = Workbook::from_bytes(&export(&record, &template).expect("export")).expect("reload");
        assert_eq!(text(&wb, 0, "B3"), "Santos");
        assert_eq!(text(&wb, 0, "F3"), "(see ID)");
        assert_eq!(text(&wb, 0, "B4"), "123456789012");
    }

    #[test]
    fn label_mode_overwrites_and_skips_missing_labels() {
        let mut record = StudentRecord::default();
        record.info.lname = "Reyes".into();
        record.eligibility.hs_completer = true;
        record.semester1.school = "Rizal NHS".into();
        record.semester1.general_average = "88".into();
        record.semester3.school = "Bonifacio SHS".into();
        record.certification.awards = "With Honors".into();

        let out = export(&record, &fixtures::form_bytes()).expect("export");
        let wb = Workbook::from_bytes(&out).expect("reload");
        assert_eq!(text(&wb, 0, "B3"), "Reyes");
        assert_eq!(text(&wb, 0, "A6"), crate::fields::CHECK);
        assert_eq!(text(&wb, 0, "B11"), "Rizal NHS");
        assert_eq!(text(&wb, 0, "S17"), "88");
        assert_eq!(text(&wb, 1, "B2"), "Bonifacio SHS");
        assert_eq!(text(&wb, 1, "B13"), "With Honors");
        // Untouched labels survive.
        assert_eq!(text(&wb, 0, "A3"), "LAST NAME:");
    }

    #[test]
    fn unreadable_template_is_malformed_input() {
        let err = export(&StudentRecord::default(), b"not a workbook").unwrap_err();
        assert_eq!(err.code(), "malformed_input");
    }

    #[test]
    fn missing_template_file_is_resource_error() {
        let path = std::env::temp_dir().join("form137-no-such-template.xlsx");
        let err = export_file(&StudentRecord::default(), &path).unwrap_err();
        assert_eq!(err.code(), "resource");
    }
}
