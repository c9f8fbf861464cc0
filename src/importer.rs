//! Reading a filled form back into a record.
//!
//! `import` is the label-only reader: it can only see fields whose labels are
//! still on the sheet, and it has no way to tell which cell a substituted
//! placeholder used to occupy. `read_with_template` covers that case when the
//! blank template is at hand.

use crate::error::CoreResult;
use crate::exporter::load_workbook;
use crate::fields::{resolve, FieldRef};
use crate::grid::read_at;
use crate::layout::{self, ANNEX, MAX_TABLE_ROWS};
use crate::placeholder::sole_token_cells;
use crate::record::StudentRecord;

fn is_row_field(field: &FieldRef) -> bool {
    matches!(
        field,
        FieldRef::Subject { .. } | FieldRef::Remedial { .. } | FieldRef::Annex { .. }
    )
}

/// Drop table rows from the first one with no subject name.
fn truncate_tables(record: &mut StudentRecord) {
    for n in 1..=4 {
        let Some(sem) = record.semester_mut(n) else {
            continue;
        };
        if let Some(end) = sem.subjects.iter().position(|s| s.subject.trim().is_empty()) {
            sem.subjects.truncate(end);
        }
        let rem = &mut sem.remedial.subjects;
        if let Some(end) = rem.iter().position(|s| s.subject.trim().is_empty()) {
            rem.truncate(end);
        }
    }
}

/// Best-effort read of every label-anchored field. Absent labels leave the
/// field empty.
pub fn import(bytes: &[u8]) -> CoreResult<StudentRecord> {
    let wb = load_workbook(bytes, "workbook")?;
    let mut record = StudentRecord::default();

    for slot in layout::plan(&wb, MAX_TABLE_ROWS) {
        let grid = &wb.sheets()[slot.sheet].grid;
        let value = read_at(grid, slot.anchor, slot.offset_col, slot.offset_row);
        if value.is_empty() && is_row_field(&slot.field) {
            continue;
        }
        slot.field.set(&mut record, value);
    }
    truncate_tables(&mut record);

    if let Some(grid) = wb.grid(ANNEX.0, ANNEX.1) {
        record.annex = layout::read_annex(grid);
    }
    Ok(record)
}

/// Exact read using the blank template as a map: every template cell that
/// holds exactly one token names the field stored at that address of the
/// filled workbook.
pub fn read_with_template(template: &[u8], filled: &[u8]) -> CoreResult<StudentRecord> {
    let template = load_workbook(template, "template")?;
    let filled = load_workbook(filled, "workbook")?;
    let mut record = StudentRecord::default();

    for (pos, sheet) in template.sheets().iter().enumerate() {
        let Some(target) = filled.sheet_index(&sheet.name, pos) else {
            continue;
        };
        let grid = &filled.sheets()[target].grid;
        for (addr, key) in sole_token_cells(&sheet.grid) {
            let Some(field) = resolve(&key) else {
                continue;
            };
            let value = read_at(grid, addr, 0, 0);
            if value.is_empty() && is_row_field(&field) {
                continue;
            }
            field.set(&mut record, value);
        }
    }
    Ok(record)
}
