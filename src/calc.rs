use crate::record::{SemesterBlock, StudentRecord};

pub const PASSING_GRADE: f64 = 75.0;
pub const PASSED: &str = "PASSED";
pub const FAILED: &str = "FAILED";

/// Half-up rounding to a whole number, as grades are printed on the form:
/// `Int(x + 0.5)`.
pub fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

fn score(s: &str) -> Option<f64> {
    let v = s.trim().parse::<f64>().ok()?;
    v.is_finite().then_some(v)
}

fn fmt_grade(v: f64) -> String {
    format!("{}", v as i64)
}

/// Final rating of a subject from its two quarter grades. `None` unless both
/// quarters are numeric.
pub fn final_grade(q1: &str, q2: &str) -> Option<f64> {
    let (a, b) = (score(q1)?, score(q2)?);
    Some(round_half_up((a + b) / 2.0))
}

pub fn action_for(grade: f64) -> &'static str {
    if grade >= PASSING_GRADE {
        PASSED
    } else {
        FAILED
    }
}

/// Recompute the derived cells of one semester: subject finals and actions,
/// remedial recomputed grades, and the general average. Rows with missing
/// quarters get their derived cells cleared.
pub fn recompute_semester(sem: &mut SemesterBlock) {
    let mut finals = Vec::new();
    for s in sem.subjects.iter_mut() {
        match final_grade(&s.q1, &s.q2) {
            Some(g) => {
                s.final_grade = fmt_grade(g);
                s.action = action_for(g).to_string();
                finals.push(g);
            }
            None => {
                s.final_grade.clear();
                s.action.clear();
            }
        }
    }

    for r in sem.remedial.subjects.iter_mut() {
        match final_grade(&r.sem_final, &r.remedial_mark) {
            Some(g) => {
                r.recomputed = fmt_grade(g);
                r.action = action_for(g).to_string();
            }
            None => {
                r.recomputed.clear();
                r.action.clear();
            }
        }
    }

    sem.general_average = if finals.is_empty() {
        String::new()
    } else {
        let mean = finals.iter().sum::<f64>() / finals.len() as f64;
        fmt_grade(round_half_up(mean))
    };
}

/// Recompute all four semesters. The certification's general average is the
/// mean of the semester averages that exist.
pub fn recompute(record: &mut StudentRecord) {
    let mut averages = Vec::new();
    for n in 1..=4 {
        if let Some(sem) = record.semester_mut(n) {
            recompute_semester(sem);
            if let Some(v) = score(&sem.general_average) {
                averages.push(v);
            }
        }
    }
    if !averages.is_empty() {
        let mean = averages.iter().sum::<f64>() / averages.len() as f64;
        record.certification.general_average = fmt_grade(round_half_up(mean));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RemedialSubject, Subject};

    fn subject(q1: &str, q2: &str) -> Subject {
        Subject {
            subject: "X".into(),
            q1: q1.into(),
            q2: q2.into(),
            ..Subject::default()
        }
    }

    #[test]
    fn round_half_up_matches_form() {
        assert_eq!(round_half_up(84.5), 85.0);
        assert_eq!(round_half_up(84.49), 84.0);
        assert_eq!(round_half_up(74.5), 75.0);
    }

    #[test]
    fn final_needs_both_quarters() {
        assert_eq!(final_grade("80", "90"), Some(85.0));
        assert_eq!(final_grade("80", ""), None);
        assert_eq!(final_grade("80", "INC"), None);
    }

    #[test]
    fn semester_recompute_fills_actions_and_average() {
        let mut sem = SemesterBlock::default();
        sem.subjects = vec![subject("80", "90"), subject("70", "75"), subject("88", "")];
        sem.subjects[2].final_grade = "stale".into();
        sem.remedial.subjects.push(RemedialSubject {
            sem_final: "73".into(),
            remedial_mark: "80".into(),
            ..RemedialSubject::default()
        });
        recompute_semester(&mut sem);
        assert_eq!(sem.subjects[0].final_grade, "85");
        assert_eq!(sem.subjects[0].action, PASSED);
        assert_eq!(sem.subjects[1].final_grade, "73");
        assert_eq!(sem.subjects[1].action, FAILED);
        assert_eq!(sem.subjects[2].final_grade, "");
        assert_eq!(sem.general_average, "79");
        assert_eq!(sem.remedial.subjects[0].recomputed, "77");
        assert_eq!(sem.remedial.subjects[0].action, PASSED);
    }

    #[test]
    fn record_average_uses_existing_semesters_only() {
        let mut r = StudentRecord::default();
        r.semester1.subjects = vec![subject("90", "90")];
        r.semester2.subjects = vec![subject("81", "81")];
        recompute(&mut r);
        assert_eq!(r.certification.general_average, "86");
        assert_eq!(r.semester3.general_average, "");
    }
}
