//! Grade level → strand → section → student stubs.

use crate::error::{CoreError, CoreResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SEED_GRADE: &str = "Grade 11";

/// A student's entry in the tree; `id` joins it to the stored record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentStub {
    pub id: String,
    pub name: String,
    pub irregular: bool,
    pub lrn: String,
}

pub type Sections = IndexMap<String, Vec<StudentStub>>;
pub type Strands = IndexMap<String, Sections>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructureTree {
    grades: IndexMap<String, Strands>,
}

/// Where a stub sits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionPath {
    pub grade: String,
    pub strand: String,
    pub section: String,
}

fn clean_name(kind: &str, name: &str) -> CoreResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::MalformedInput(format!("{kind} name is empty")));
    }
    Ok(name.to_string())
}

fn missing(kind: &str, name: &str) -> CoreError {
    CoreError::NotFound(format!("{kind} '{name}'"))
}

fn taken(kind: &str, name: &str) -> CoreError {
    CoreError::Conflict(format!("{kind} '{name}' already exists"))
}

impl StructureTree {
    /// The tree a new workspace starts with.
    pub fn seeded() -> Self {
        let mut grades = IndexMap::new();
        grades.insert(SEED_GRADE.to_string(), Strands::new());
        Self { grades }
    }

    pub fn from_value(v: Value) -> CoreResult<Self> {
        serde_json::from_value(v)
            .map_err(|e| CoreError::MalformedInput(format!("invalid structure tree: {e}")))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.grades).unwrap_or(Value::Null)
    }

    #[cfg(test)]
    pub fn grades(&self) -> impl Iterator<Item = &str> {
        self.grades.keys().map(String::as_str)
    }

    fn strands_mut(&mut self, grade: &str) -> CoreResult<&mut Strands> {
        self.grades
            .get_mut(grade)
            .ok_or_else(|| missing("grade", grade))
    }

    fn sections_mut(&mut self, grade: &str, strand: &str) -> CoreResult<&mut Sections> {
        self.strands_mut(grade)?
            .get_mut(strand)
            .ok_or_else(|| missing("strand", strand))
    }

    fn stubs_mut(&mut self, path: &SectionPath) -> CoreResult<&mut Vec<StudentStub>> {
        self.sections_mut(&path.grade, &path.strand)?
            .get_mut(&path.section)
            .ok_or_else(|| missing("section", &path.section))
    }

    pub fn add_grade(&mut self, name: &str) -> CoreResult<()> {
        let name = clean_name("grade", name)?;
        if self.grades.contains_key(&name) {
            return Err(taken("grade", &name));
        }
        self.grades.insert(name, Strands::new());
        Ok(())
    }

    pub fn add_strand(&mut self, grade: &str, name: &str) -> CoreResult<()> {
        let name = clean_name("strand", name)?;
        let strands = self.strands_mut(grade)?;
        if strands.contains_key(&name) {
            return Err(taken("strand", &name));
        }
        strands.insert(name, Sections::new());
        Ok(())
    }

    pub fn add_section(&mut self, grade: &str, strand: &str, name: &str) -> CoreResult<()> {
        let name = clean_name("section", name)?;
        let sections = self.sections_mut(grade, strand)?;
        if sections.contains_key(&name) {
            return Err(taken("section", &name));
        }
        sections.insert(name, Vec::new());
        Ok(())
    }

    /// Append a stub. Ids are unique across the whole tree.
    pub fn add_student(&mut self, path: &SectionPath, stub: StudentStub) -> CoreResult<()> {
        if stub.id.trim().is_empty() {
            return Err(CoreError::MalformedInput("student id is empty".into()));
        }
        if self.find_student(&stub.id).is_some() {
            return Err(taken("student", &stub.id));
        }
        self.stubs_mut(path)?.push(stub);
        Ok(())
    }

    pub fn delete_grade(&mut self, grade: &str) -> CoreResult<Strands> {
        self.grades
            .shift_remove(grade)
            .ok_or_else(|| missing("grade", grade))
    }

    pub fn delete_strand(&mut self, grade: &str, strand: &str) -> CoreResult<Sections> {
        self.strands_mut(grade)?
            .shift_remove(strand)
            .ok_or_else(|| missing("strand", strand))
    }

    pub fn delete_section(
        &mut self,
        grade: &str,
        strand: &str,
        section: &str,
    ) -> CoreResult<Vec<StudentStub>> {
        self.sections_mut(grade, strand)?
            .shift_remove(section)
            .ok_or_else(|| missing("section", section))
    }

    pub fn delete_student(&mut self, path: &SectionPath, id: &str) -> CoreResult<StudentStub> {
        let stubs = self.stubs_mut(path)?;
        let pos = stubs
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| missing("student", id))?;
        Ok(stubs.remove(pos))
    }

    pub fn find_student(&self, id: &str) -> Option<(SectionPath, &StudentStub)> {
        self.stubs()
            .find(|(_, stub)| stub.id == id)
    }

    /// Keep a stub's display fields in line with its saved record. Returns
    /// whether a stub with that id exists.
    pub fn update_stub(&mut self, id: &str, name: &str, lrn: &str, irregular: bool) -> bool {
        for strands in self.grades.values_mut() {
            for sections in strands.values_mut() {
                for stubs in sections.values_mut() {
                    if let Some(stub) = stubs.iter_mut().find(|s| s.id == id) {
                        stub.name = name.to_string();
                        stub.lrn = lrn.to_string();
                        stub.irregular = irregular;
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Every stub with its section path, in tree order.
    pub fn stubs(&self) -> impl Iterator<Item = (SectionPath, &StudentStub)> {
        self.grades.iter().flat_map(|(grade, strands)| {
            strands.iter().flat_map(move |(strand, sections)| {
                sections.iter().flat_map(move |(section, stubs)| {
                    stubs.iter().map(move |stub| {
                        (
                            SectionPath {
                                grade: grade.clone(),
                                strand: strand.clone(),
                                section: section.clone(),
                            },
                            stub,
                        )
                    })
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(g: &str, st: &str, se: &str) -> SectionPath {
        SectionPath {
            grade: g.into(),
            strand: st.into(),
            section: se.into(),
        }
    }

    fn stub(id: &str, name: &str) -> StudentStub {
        StudentStub {
            id: id.into(),
            name: name.into(),
            ..StudentStub::default()
        }
    }

    #[test]
    fn seeded_tree_serializes_as_plain_mapping() {
        assert_eq!(StructureTree::seeded().to_value(), json!({"Grade 11": {}}));
    }

    #[test]
    fn add_and_find_students() {
        let mut t = StructureTree::seeded();
        t.add_strand("Grade 11", "STEM").expect("strand");
        t.add_section("Grade 11", "STEM", "Einstein").expect("section");
        let p = path("Grade 11", "STEM", "Einstein");
        t.add_student(&p, stub("a", "DELA CRUZ, JUAN")).expect("student");
        t.add_student(&p, stub("b", "SANTOS, MARIA")).expect("student");

        let (found_at, s) = t.find_student("b").expect("found");
        assert_eq!(found_at, p);
        assert_eq!(s.name, "SANTOS, MARIA");
        assert_eq!(
            t.to_value(),
            json!({"Grade 11": {"STEM": {"Einstein": [
                {"id": "a", "name": "DELA CRUZ, JUAN", "irregular": false, "lrn": ""},
                {"id": "b", "name": "SANTOS, MARIA", "irregular": false, "lrn": ""}
            ]}}})
        );
    }

    #[test]
    fn duplicates_conflict_and_missing_paths_are_not_found() {
        let mut t = StructureTree::seeded();
        assert_eq!(t.add_grade(" Grade 11 ").unwrap_err().code(), "conflict");
        assert_eq!(t.add_strand("Grade 12", "ABM").unwrap_err().code(), "not_found");
        t.add_strand("Grade 11", "ABM").expect("strand");
        assert_eq!(t.add_strand("Grade 11", "ABM").unwrap_err().code(), "conflict");
        assert_eq!(t.add_grade("  ").unwrap_err().code(), "malformed_input");
        t.add_section("Grade 11", "ABM", "A").expect("section");
        t.add_section("Grade 11", "ABM", "B").expect("section");
        t.add_student(&path("Grade 11", "ABM", "A"), stub("x", "X")).expect("student");
        assert_eq!(
            t.add_student(&path("Grade 11", "ABM", "B"), stub("x", "X")).unwrap_err().code(),
            "conflict"
        );
        assert_eq!(
            t.delete_student(&path("Grade 11", "ABM", "B"), "x").unwrap_err().code(),
            "not_found"
        );
        assert_eq!(t.delete_section("Grade 11", "ABM", "C").unwrap_err().code(), "not_found");
    }

    #[test]
    fn deletes_keep_sibling_order() {
        let mut t = StructureTree::seeded();
        t.add_grade("Grade 12").expect("grade");
        t.add_grade("Grade 13").expect("grade");
        t.delete_grade("Grade 12").expect("delete");
        assert_eq!(t.grades().collect::<Vec<_>>(), vec!["Grade 11", "Grade 13"]);
    }

    #[test]
    fn update_stub_rewrites_display_fields() {
        let mut t = StructureTree::seeded();
        t.add_strand("Grade 11", "GAS").expect("strand");
        t.add_section("Grade 11", "GAS", "1").expect("section");
        t.add_student(&path("Grade 11", "GAS", "1"), stub("id1", "OLD")).expect("student");
        assert!(t.update_stub("id1", "NEW, NAME", "123", true));
        assert!(!t.update_stub("nope", "", "", false));
        let (_, s) = t.find_student("id1").expect("found");
        assert_eq!((s.name.as_str(), s.lrn.as_str(), s.irregular), ("NEW, NAME", "123", true));
    }

    #[test]
    fn rejects_trees_that_are_not_nested_mappings() {
        assert!(StructureTree::from_value(json!({"Grade 11": {"STEM": {"A": [{"id": "1"}]}}})).is_ok());
        assert_eq!(
            StructureTree::from_value(json!({"Grade 11": []})).unwrap_err().code(),
            "malformed_input"
        );
    }
}
