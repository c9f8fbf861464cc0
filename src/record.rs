use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// Records arrive from the UI and from other installations with `null`s,
// numbers typed into text fields and flags written as text. Every field
// takes those and falls back to its default rather than rejecting the
// record.

fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(if b { "true".into() } else { String::new() }),
        other => Err(D::Error::custom(format!("expected text, found {other}"))),
    }
}

fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        Value::String(s) => Ok(!matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "0" | "no" | "n"
        )),
        other => Err(D::Error::custom(format!("expected a flag, found {other}"))),
    }
}

fn active_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(d)?.unwrap_or(true))
}

fn nullable<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// Any casing of a known kind; other text is `Other`, empty is `Core`.
fn subject_kind<'de, D: Deserializer<'de>>(d: D) -> Result<SubjectKind, D::Error> {
    let raw = text(d)?;
    if raw.trim().is_empty() {
        return Ok(SubjectKind::Core);
    }
    Ok(SubjectKind::parse(&raw).unwrap_or(SubjectKind::Other))
}

/// One learner's Form 137-SHS. Every scalar is text as typed by staff;
/// all fields default to empty so partial records deserialize cleanly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentRecord {
    #[serde(deserialize_with = "text")]
    pub id: String,
    #[serde(deserialize_with = "nullable")]
    pub info: Info,
    #[serde(deserialize_with = "nullable")]
    pub eligibility: Eligibility,
    #[serde(deserialize_with = "nullable")]
    pub semester1: SemesterBlock,
    #[serde(deserialize_with = "nullable")]
    pub semester2: SemesterBlock,
    #[serde(deserialize_with = "nullable")]
    pub semester3: SemesterBlock,
    #[serde(deserialize_with = "nullable")]
    pub semester4: SemesterBlock,
    #[serde(deserialize_with = "nullable")]
    pub annex: Vec<AnnexEntry>,
    #[serde(deserialize_with = "nullable")]
    pub certification: Certification,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Info {
    #[serde(deserialize_with = "text")]
    pub lname: String,
    #[serde(deserialize_with = "text")]
    pub fname: String,
    #[serde(deserialize_with = "text")]
    pub mname: String,
    #[serde(deserialize_with = "text")]
    pub lrn: String,
    #[serde(deserialize_with = "text")]
    pub sex: String,
    #[serde(deserialize_with = "text")]
    pub birthdate: String,
    #[serde(deserialize_with = "text")]
    pub admission_date: String,
    #[serde(deserialize_with = "flag")]
    pub irregular: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Eligibility {
    #[serde(deserialize_with = "flag")]
    pub hs_completer: bool,
    #[serde(deserialize_with = "text")]
    pub hs_gen_ave: String,
    #[serde(deserialize_with = "flag")]
    pub jhs_completer: bool,
    #[serde(deserialize_with = "text")]
    pub jhs_gen_ave: String,
    #[serde(deserialize_with = "text")]
    pub graduation_date: String,
    #[serde(deserialize_with = "text")]
    pub school_name: String,
    #[serde(deserialize_with = "text")]
    pub school_address: String,
    #[serde(deserialize_with = "flag")]
    pub pept_passer: bool,
    #[serde(deserialize_with = "text")]
    pub pept_rating: String,
    #[serde(deserialize_with = "flag")]
    pub als_passer: bool,
    #[serde(deserialize_with = "text")]
    pub als_rating: String,
    #[serde(deserialize_with = "text")]
    pub exam_date: String,
    #[serde(deserialize_with = "flag")]
    pub others: bool,
    #[serde(deserialize_with = "text")]
    pub others_specify: String,
    #[serde(deserialize_with = "text")]
    pub clc_name_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SemesterBlock {
    #[serde(deserialize_with = "text")]
    pub school: String,
    #[serde(deserialize_with = "text")]
    pub school_id: String,
    #[serde(deserialize_with = "text")]
    pub grade_level: String,
    #[serde(deserialize_with = "text")]
    pub school_year: String,
    #[serde(deserialize_with = "text")]
    pub semester: String,
    #[serde(deserialize_with = "text")]
    pub track_strand: String,
    #[serde(deserialize_with = "text")]
    pub section: String,
    #[serde(deserialize_with = "nullable")]
    pub subjects: Vec<Subject>,
    #[serde(deserialize_with = "text")]
    pub general_average: String,
    #[serde(deserialize_with = "text")]
    pub remarks: String,
    #[serde(deserialize_with = "text")]
    pub adviser: String,
    #[serde(deserialize_with = "text")]
    pub certified_by: String,
    #[serde(deserialize_with = "text")]
    pub date_checked: String,
    #[serde(deserialize_with = "nullable")]
    pub remedial: RemedialBlock,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subject {
    #[serde(rename = "type")]
    #[serde(deserialize_with = "text")]
    pub kind: String,
    #[serde(deserialize_with = "text")]
    pub subject: String,
    #[serde(deserialize_with = "text")]
    pub q1: String,
    #[serde(deserialize_with = "text")]
    pub q2: String,
    #[serde(rename = "final")]
    #[serde(deserialize_with = "text")]
    pub final_grade: String,
    #[serde(deserialize_with = "text")]
    pub action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemedialBlock {
    #[serde(deserialize_with = "text")]
    pub from: String,
    #[serde(deserialize_with = "text")]
    pub to: String,
    #[serde(deserialize_with = "text")]
    pub school: String,
    #[serde(deserialize_with = "text")]
    pub school_id: String,
    #[serde(deserialize_with = "text")]
    pub teacher: String,
    #[serde(deserialize_with = "nullable")]
    pub subjects: Vec<RemedialSubject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemedialSubject {
    #[serde(rename = "type")]
    #[serde(deserialize_with = "text")]
    pub kind: String,
    #[serde(deserialize_with = "text")]
    pub subject: String,
    #[serde(deserialize_with = "text")]
    pub sem_final: String,
    #[serde(deserialize_with = "text")]
    pub remedial_mark: String,
    #[serde(deserialize_with = "text")]
    pub recomputed: String,
    #[serde(deserialize_with = "text")]
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnnexEntry {
    #[serde(rename = "type")]
    #[serde(deserialize_with = "subject_kind")]
    pub kind: SubjectKind,
    #[serde(deserialize_with = "text")]
    pub subject: String,
    #[serde(deserialize_with = "active_flag")]
    pub active: bool,
}

impl Default for AnnexEntry {
    fn default() -> Self {
        Self {
            kind: SubjectKind::Core,
            subject: String::new(),
            active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    Core,
    Applied,
    Specialized,
    Other,
}

impl SubjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectKind::Core => "Core",
            SubjectKind::Applied => "Applied",
            SubjectKind::Specialized => "Specialized",
            SubjectKind::Other => "Other",
        }
    }

    /// Lenient parse used for spreadsheet text and query params.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CORE" => Some(SubjectKind::Core),
            "APPLIED" => Some(SubjectKind::Applied),
            "SPECIALIZED" => Some(SubjectKind::Specialized),
            "OTHER" | "OTHERS" => Some(SubjectKind::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Certification {
    #[serde(deserialize_with = "text")]
    pub track_strand: String,
    #[serde(deserialize_with = "text")]
    pub general_average: String,
    #[serde(deserialize_with = "text")]
    pub awards: String,
    #[serde(deserialize_with = "text")]
    pub graduation_date: String,
    #[serde(deserialize_with = "text")]
    pub school_head: String,
    #[serde(deserialize_with = "text")]
    pub certification_date: String,
    #[serde(deserialize_with = "text")]
    pub remarks: String,
    #[serde(deserialize_with = "text")]
    pub date_issued: String,
}

impl StudentRecord {
    /// Semester by 1-based number; `None` outside 1..=4.
    pub fn semester(&self, n: usize) -> Option<&SemesterBlock> {
        match n {
            1 => Some(&self.semester1),
            2 => Some(&self.semester2),
            3 => Some(&self.semester3),
            4 => Some(&self.semester4),
            _ => None,
        }
    }

    pub fn semester_mut(&mut self, n: usize) -> Option<&mut SemesterBlock> {
        match n {
            1 => Some(&mut self.semester1),
            2 => Some(&mut self.semester2),
            3 => Some(&mut self.semester3),
            4 => Some(&mut self.semester4),
            _ => None,
        }
    }

    /// "LAST, FIRST MIDDLE" as shown in the structure tree.
    pub fn display_name(&self) -> String {
        let mut name = self.info.lname.trim().to_string();
        let given = [self.info.fname.trim(), self.info.mname.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        if !given.is_empty() {
            if !name.is_empty() {
                name.push_str(", ");
            }
            name.push_str(&given);
        }
        name
    }

    /// Record id, falling back to the LRN for records that never had one.
    pub fn effective_id(&self) -> Option<String> {
        [self.id.trim(), self.info.lrn.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }
}
