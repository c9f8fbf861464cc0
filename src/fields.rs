//! Placeholder vocabulary: every `%(key)` a template may use, mapped to a
//! getter/setter pair over `StudentRecord`.
//!
//! Static keys come from fixed tables. Indexed keys (`s{n}sub_{i}`,
//! `s{n}rsub_{i}`, `annex_{i}`, ...) are generated from the record's shape
//! at call time, so the vocabulary follows however many rows a record has.

use crate::record::{AnnexEntry, RemedialSubject, SemesterBlock, StudentRecord, Subject, SubjectKind};
use indexmap::IndexMap;

/// Text written for a set flag.
pub const CHECK: &str = "✓";

type Getter<T> = fn(&T) -> String;
type Setter<T> = fn(&mut T, String);

fn flag(b: bool) -> String {
    if b {
        CHECK.to_string()
    } else {
        String::new()
    }
}

fn is_set(v: &str) -> bool {
    !v.trim().is_empty()
}

const RECORD_FIELDS: &[(&str, Getter<StudentRecord>, Setter<StudentRecord>)] = &[
    ("lname", |r| r.info.lname.clone(), |r, v| r.info.lname = v),
    ("fname", |r| r.info.fname.clone(), |r, v| r.info.fname = v),
    ("mname", |r| r.info.mname.clone(), |r, v| r.info.mname = v),
    ("lrn", |r| r.info.lrn.clone(), |r, v| r.info.lrn = v),
    ("sex", |r| r.info.sex.clone(), |r, v| r.info.sex = v),
    ("birthdate", |r| r.info.birthdate.clone(), |r, v| r.info.birthdate = v),
    ("admission", |r| r.info.admission_date.clone(), |r, v| r.info.admission_date = v),
    ("irregular", |r| flag(r.info.irregular), |r, v| r.info.irregular = is_set(&v)),
    ("hs_completer", |r| flag(r.eligibility.hs_completer), |r, v| r.eligibility.hs_completer = is_set(&v)),
    ("hs_genave", |r| r.eligibility.hs_gen_ave.clone(), |r, v| r.eligibility.hs_gen_ave = v),
    ("jhs_completer", |r| flag(r.eligibility.jhs_completer), |r, v| r.eligibility.jhs_completer = is_set(&v)),
    ("jhs_genave", |r| r.eligibility.jhs_gen_ave.clone(), |r, v| r.eligibility.jhs_gen_ave = v),
    ("grad_date", |r| r.eligibility.graduation_date.clone(), |r, v| r.eligibility.graduation_date = v),
    ("elem_school", |r| r.eligibility.school_name.clone(), |r, v| r.eligibility.school_name = v),
    ("elem_address", |r| r.eligibility.school_address.clone(), |r, v| r.eligibility.school_address = v),
    ("pept", |r| flag(r.eligibility.pept_passer), |r, v| r.eligibility.pept_passer = is_set(&v)),
    ("pept_rating", |r| r.eligibility.pept_rating.clone(), |r, v| r.eligibility.pept_rating = v),
    ("als", |r| flag(r.eligibility.als_passer), |r, v| r.eligibility.als_passer = is_set(&v)),
    ("als_rating", |r| r.eligibility.als_rating.clone(), |r, v| r.eligibility.als_rating = v),
    ("exam_date", |r| r.eligibility.exam_date.clone(), |r, v| r.eligibility.exam_date = v),
    ("others", |r| flag(r.eligibility.others), |r, v| r.eligibility.others = is_set(&v)),
    ("others_specify", |r| r.eligibility.others_specify.clone(), |r, v| r.eligibility.others_specify = v),
    ("clc", |r| r.eligibility.clc_name_address.clone(), |r, v| r.eligibility.clc_name_address = v),
    ("cert_track", |r| r.certification.track_strand.clone(), |r, v| r.certification.track_strand = v),
    ("cert_genave", |r| r.certification.general_average.clone(), |r, v| r.certification.general_average = v),
    ("cert_awards", |r| r.certification.awards.clone(), |r, v| r.certification.awards = v),
    ("cert_graddate", |r| r.certification.graduation_date.clone(), |r, v| r.certification.graduation_date = v),
    ("cert_head", |r| r.certification.school_head.clone(), |r, v| r.certification.school_head = v),
    ("cert_date", |r| r.certification.certification_date.clone(), |r, v| r.certification.certification_date = v),
    ("cert_remarks", |r| r.certification.remarks.clone(), |r, v| r.certification.remarks = v),
    ("cert_issued", |r| r.certification.date_issued.clone(), |r, v| r.certification.date_issued = v),
];

/// Per-semester keys, spelled `s{n}{suffix}`.
const SEMESTER_FIELDS: &[(&str, Getter<SemesterBlock>, Setter<SemesterBlock>)] = &[
    ("school", |s| s.school.clone(), |s, v| s.school = v),
    ("schoolid", |s| s.school_id.clone(), |s, v| s.school_id = v),
    ("grade", |s| s.grade_level.clone(), |s, v| s.grade_level = v),
    ("sy", |s| s.school_year.clone(), |s, v| s.school_year = v),
    ("sem", |s| s.semester.clone(), |s, v| s.semester = v),
    ("track", |s| s.track_strand.clone(), |s, v| s.track_strand = v),
    ("section", |s| s.section.clone(), |s, v| s.section = v),
    ("genave", |s| s.general_average.clone(), |s, v| s.general_average = v),
    ("remarks", |s| s.remarks.clone(), |s, v| s.remarks = v),
    ("adviser", |s| s.adviser.clone(), |s, v| s.adviser = v),
    ("certby", |s| s.certified_by.clone(), |s, v| s.certified_by = v),
    ("datechecked", |s| s.date_checked.clone(), |s, v| s.date_checked = v),
    ("rem_from", |s| s.remedial.from.clone(), |s, v| s.remedial.from = v),
    ("rem_to", |s| s.remedial.to.clone(), |s, v| s.remedial.to = v),
    ("rem_school", |s| s.remedial.school.clone(), |s, v| s.remedial.school = v),
    ("rem_schoolid", |s| s.remedial.school_id.clone(), |s, v| s.remedial.school_id = v),
    ("rem_teacher", |s| s.remedial.teacher.clone(), |s, v| s.remedial.teacher = v),
];

/// Subject row columns, spelled `s{n}{col}_{i}`.
pub const SUBJECT_COLUMNS: &[(&str, Getter<Subject>, Setter<Subject>)] = &[
    ("type", |s| s.kind.clone(), |s, v| s.kind = v),
    ("sub", |s| s.subject.clone(), |s, v| s.subject = v),
    ("q1", |s| s.q1.clone(), |s, v| s.q1 = v),
    ("q2", |s| s.q2.clone(), |s, v| s.q2 = v),
    ("final", |s| s.final_grade.clone(), |s, v| s.final_grade = v),
    ("action", |s| s.action.clone(), |s, v| s.action = v),
];

/// Remedial row columns, spelled `s{n}{col}_{i}`.
pub const REMEDIAL_COLUMNS: &[(&str, Getter<RemedialSubject>, Setter<RemedialSubject>)] = &[
    ("rtype", |s| s.kind.clone(), |s, v| s.kind = v),
    ("rsub", |s| s.subject.clone(), |s, v| s.subject = v),
    ("rsem", |s| s.sem_final.clone(), |s, v| s.sem_final = v),
    ("rclass", |s| s.remedial_mark.clone(), |s, v| s.remedial_mark = v),
    ("rrecomp", |s| s.recomputed.clone(), |s, v| s.recomputed = v),
    ("raction", |s| s.action.clone(), |s, v| s.action = v),
];

/// Annex row columns, spelled `{col}_{i}`.
const ANNEX_COLUMNS: &[(&str, Getter<AnnexEntry>, Setter<AnnexEntry>)] = &[
    ("annex", |a| a.subject.clone(), |a, v| a.subject = v),
    ("annextype", |a| a.kind.as_str().to_string(), |a, v| {
        if let Some(k) = SubjectKind::parse(&v) {
            a.kind = k;
        }
    }),
];

/// One resolved placeholder key. Indices `n` (semester) and `i` (row) are
/// 1-based as written in the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRef {
    Record(usize),
    Semester { n: usize, field: usize },
    Subject { n: usize, i: usize, col: usize },
    Remedial { n: usize, i: usize, col: usize },
    Annex { i: usize, col: usize },
}

/// Grow `rows` so that 1-based row `i` exists.
fn row_mut<T: Default>(rows: &mut Vec<T>, i: usize) -> &mut T {
    if rows.len() < i {
        rows.resize_with(i, T::default);
    }
    &mut rows[i - 1]
}

impl FieldRef {
    /// Current value; empty when the row does not exist.
    pub fn get(&self, r: &StudentRecord) -> String {
        match *self {
            FieldRef::Record(f) => (RECORD_FIELDS[f].1)(r),
            FieldRef::Semester { n, field } => r
                .semester(n)
                .map(|s| (SEMESTER_FIELDS[field].1)(s))
                .unwrap_or_default(),
            FieldRef::Subject { n, i, col } => r
                .semester(n)
                .and_then(|s| s.subjects.get(i - 1))
                .map(|s| (SUBJECT_COLUMNS[col].1)(s))
                .unwrap_or_default(),
            FieldRef::Remedial { n, i, col } => r
                .semester(n)
                .and_then(|s| s.remedial.subjects.get(i - 1))
                .map(|s| (REMEDIAL_COLUMNS[col].1)(s))
                .unwrap_or_default(),
            FieldRef::Annex { i, col } => r
                .annex
                .get(i - 1)
                .map(|a| (ANNEX_COLUMNS[col].1)(a))
                .unwrap_or_default(),
        }
    }

    /// Store `value`, creating missing rows.
    pub fn set(&self, r: &mut StudentRecord, value: String) {
        match *self {
            FieldRef::Record(f) => (RECORD_FIELDS[f].2)(r, value),
            FieldRef::Semester { n, field } => {
                if let Some(s) = r.semester_mut(n) {
                    (SEMESTER_FIELDS[field].2)(s, value);
                }
            }
            FieldRef::Subject { n, i, col } => {
                if let Some(s) = r.semester_mut(n) {
                    (SUBJECT_COLUMNS[col].2)(row_mut(&mut s.subjects, i), value);
                }
            }
            FieldRef::Remedial { n, i, col } => {
                if let Some(s) = r.semester_mut(n) {
                    (REMEDIAL_COLUMNS[col].2)(row_mut(&mut s.remedial.subjects, i), value);
                }
            }
            FieldRef::Annex { i, col } => (ANNEX_COLUMNS[col].2)(row_mut(&mut r.annex, i), value),
        }
    }

    /// Whether the record has the row this field addresses.
    pub fn row_exists(&self, r: &StudentRecord) -> bool {
        match *self {
            FieldRef::Record(_) | FieldRef::Semester { .. } => true,
            FieldRef::Subject { n, i, .. } => r.semester(n).is_some_and(|s| s.subjects.len() >= i),
            FieldRef::Remedial { n, i, .. } => r
                .semester(n)
                .is_some_and(|s| s.remedial.subjects.len() >= i),
            FieldRef::Annex { i, .. } => r.annex.len() >= i,
        }
    }

    pub fn key(&self) -> String {
        match *self {
            FieldRef::Record(f) => RECORD_FIELDS[f].0.to_string(),
            FieldRef::Semester { n, field } => format!("s{}{}", n, SEMESTER_FIELDS[field].0),
            FieldRef::Subject { n, i, col } => format!("s{}{}_{}", n, SUBJECT_COLUMNS[col].0, i),
            FieldRef::Remedial { n, i, col } => format!("s{}{}_{}", n, REMEDIAL_COLUMNS[col].0, i),
            FieldRef::Annex { i, col } => format!("{}_{}", ANNEX_COLUMNS[col].0, i),
        }
    }
}

fn column_index<T>(table: &[(&str, Getter<T>, Setter<T>)], name: &str) -> Option<usize> {
    table.iter().position(|(k, _, _)| *k == name)
}

/// Largest row index an indexed key may name. Keys come from templates;
/// past this the token is left inert instead of growing the record.
pub const MAX_ROW_INDEX: usize = 200;

/// Parse any well-formed key, whether or not the record currently has that
/// row.
pub fn resolve(key: &str) -> Option<FieldRef> {
    if let Some(f) = column_index(RECORD_FIELDS, key) {
        return Some(FieldRef::Record(f));
    }

    // Indexed forms end in `_<digits>`.
    let indexed = key.rsplit_once('_').and_then(|(head, idx)| {
        if idx.is_empty() || !idx.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let i: usize = idx.parse().ok()?;
        (1..=MAX_ROW_INDEX).contains(&i).then_some((head, i))
    });

    if let Some((head, i)) = indexed {
        if let Some(col) = column_index(ANNEX_COLUMNS, head) {
            return Some(FieldRef::Annex { i, col });
        }
        let (n, col_name) = split_semester(head)?;
        if let Some(col) = column_index(SUBJECT_COLUMNS, col_name) {
            return Some(FieldRef::Subject { n, i, col });
        }
        if let Some(col) = column_index(REMEDIAL_COLUMNS, col_name) {
            return Some(FieldRef::Remedial { n, i, col });
        }
    }

    let (n, suffix) = split_semester(key)?;
    column_index(SEMESTER_FIELDS, suffix).map(|field| FieldRef::Semester { n, field })
}

/// "s3school" -> (3, "school").
fn split_semester(s: &str) -> Option<(usize, &str)> {
    let rest = s.strip_prefix('s')?;
    let digit = rest.chars().next()?.to_digit(10)? as usize;
    (1..=4).contains(&digit).then(|| (digit, &rest[1..]))
}

/// Key → accessor table handed to the substitution engine and readers.
#[derive(Debug, Clone, Default)]
pub struct FieldTable {
    entries: IndexMap<String, FieldRef>,
}

impl FieldTable {
    /// Static keys plus every indexed key the record's current shape has.
    pub fn for_record(record: &StudentRecord) -> Self {
        let mut entries = IndexMap::new();
        let mut add = |f: FieldRef| {
            entries.insert(f.key(), f);
        };
        for f in 0..RECORD_FIELDS.len() {
            add(FieldRef::Record(f));
        }
        for n in 1..=4 {
            for field in 0..SEMESTER_FIELDS.len() {
                add(FieldRef::Semester { n, field });
            }
            let Some(sem) = record.semester(n) else {
                continue;
            };
            for i in 1..=sem.subjects.len() {
                for col in 0..SUBJECT_COLUMNS.len() {
                    add(FieldRef::Subject { n, i, col });
                }
            }
            for i in 1..=sem.remedial.subjects.len() {
                for col in 0..REMEDIAL_COLUMNS.len() {
                    add(FieldRef::Remedial { n, i, col });
                }
            }
        }
        for i in 1..=record.annex.len() {
            for col in 0..ANNEX_COLUMNS.len() {
                add(FieldRef::Annex { i, col });
            }
        }
        Self { entries }
    }

    /// Generated entry first; otherwise the key is parsed, so indexed slots
    /// past the record's last row still resolve (to empty text).
    pub fn lookup(&self, key: &str) -> Option<FieldRef> {
        self.entries.get(key).copied().or_else(|| resolve(key))
    }

    #[cfg(test)]
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StudentRecord {
        let mut r = StudentRecord::default();
        r.info.lname = "Dela Cruz".into();
        r.eligibility.hs_completer = true;
        r.semester1.school = "Rizal NHS".into();
        r.semester1.subjects.push(Subject {
            subject: "Math".into(),
            q1: "80".into(),
            q2: "90".into(),
            ..Subject::default()
        });
        r
    }

    #[test]
    fn resolves_static_semester_and_indexed_keys() {
        assert_eq!(resolve("lname"), Some(FieldRef::Record(0)));
        assert!(matches!(resolve("s2school"), Some(FieldRef::Semester { n: 2, .. })));
        assert!(matches!(resolve("s4rem_school"), Some(FieldRef::Semester { n: 4, .. })));
        assert!(matches!(
            resolve("s1sub_12"),
            Some(FieldRef::Subject { n: 1, i: 12, col: 1 })
        ));
        assert!(matches!(resolve("s3rsub_2"), Some(FieldRef::Remedial { n: 3, i: 2, .. })));
        assert!(matches!(resolve("annex_4"), Some(FieldRef::Annex { i: 4, col: 0 })));
        assert_eq!(resolve("s5school"), None);
        assert_eq!(resolve("s1sub_0"), None);
        assert!(resolve(&format!("s1sub_{MAX_ROW_INDEX}")).is_some());
        assert_eq!(resolve(&format!("s1sub_{}", MAX_ROW_INDEX + 1)), None);
        assert_eq!(resolve("annex_1000000"), None);
        assert_eq!(resolve("s2rsub_99999999999999999999999"), None);
        assert_eq!(resolve("nickname"), None);
        assert_eq!(resolve("s1bogus_1"), None);
    }

    #[test]
    fn keys_round_trip_through_resolve() {
        let table = FieldTable::for_record(&sample());
        for key in table.keys() {
            let f = resolve(key).unwrap_or_else(|| panic!("unresolvable generated key {key}"));
            assert_eq!(f.key(), key);
        }
    }

    #[test]
    fn generator_tracks_record_shape() {
        let mut r = sample();
        let before = FieldTable::for_record(&r);
        assert!(before.keys().any(|k| k == "s1q2_1"));
        assert!(!before.keys().any(|k| k == "s1q2_2"));
        r.semester1.subjects.push(Subject::default());
        let after = FieldTable::for_record(&r);
        assert_eq!(after.len(), before.len() + SUBJECT_COLUMNS.len());
    }

    #[test]
    fn getters_and_setters() {
        let mut r = sample();
        let t = FieldTable::for_record(&r);
        assert_eq!(t.lookup("lname").expect("lname").get(&r), "Dela Cruz");
        assert_eq!(t.lookup("hs_completer").expect("flag").get(&r), CHECK);
        assert_eq!(t.lookup("s1q1_1").expect("q1").get(&r), "80");
        assert_eq!(t.lookup("s1q1_5").expect("slot").get(&r), "");

        resolve("s2sub_3").expect("key").set(&mut r, "Science".into());
        assert_eq!(r.semester2.subjects.len(), 3);
        assert_eq!(r.semester2.subjects[2].subject, "Science");

        resolve("annextype_1").expect("key").set(&mut r, "applied".into());
        assert_eq!(r.annex[0].kind, SubjectKind::Applied);

        resolve("pept").expect("key").set(&mut r, "".into());
        assert!(!r.eligibility.pept_passer);
    }
}
