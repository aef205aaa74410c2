//! State transitions over the school snapshot.
//!
//! Every operation borrows the current [`SchoolState`] and hands back a new
//! one; the caller swaps it in and persists it. Nothing here touches storage.

use crate::auth::{Credential, DEFAULT_TEACHER_PASSWORD};
use crate::model::{
    class_group, CaseStatus, DisciplinaryCase, House, MeritCategory, RecordType, SchoolState,
    Severity, Student, StudentRecord, TeacherProfile, INITIAL_POINTS, MAX_RECORD_POINTS,
    MAX_TOTAL_POINTS, MIN_GRADE,
};
use crate::seed;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashSet;
use uuid::Uuid;

pub const MAX_BATCH_STUDENTS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    #[error("{0}")]
    Validation(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("cannot remove the account that is currently signed in")]
    SelfRemoval,
}

impl RosterError {
    pub fn code(&self) -> &'static str {
        match self {
            RosterError::Validation(_) => "validation_failed",
            RosterError::NotFound { .. } => "not_found",
            RosterError::SelfRemoval => "self_removal",
        }
    }

    fn invalid(msg: impl Into<String>) -> Self {
        RosterError::Validation(msg.into())
    }

    fn missing(kind: &'static str, id: &str) -> Self {
        RosterError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordInput {
    pub kind: RecordType,
    pub category: Option<String>,
    pub reason: String,
    pub points: i64,
}

impl RecordInput {
    /// Sign follows the type; the magnitude is what the caller asked for.
    fn signed_points(&self) -> Result<i64, RosterError> {
        if self.points == 0 {
            return Err(RosterError::invalid("points must not be zero"));
        }
        let magnitude = self
            .points
            .checked_abs()
            .filter(|m| *m <= MAX_RECORD_POINTS)
            .ok_or_else(|| {
                RosterError::invalid(format!("points must be between 1 and {}", MAX_RECORD_POINTS))
            })?;
        Ok(match self.kind {
            RecordType::Merit => magnitude,
            RecordType::Demerit => -magnitude,
        })
    }

    fn validate(&self) -> Result<(), RosterError> {
        if self.reason.trim().is_empty() {
            return Err(RosterError::invalid("reason is required"));
        }
        if let (RecordType::Merit, Some(c)) = (self.kind, self.category.as_deref()) {
            if MeritCategory::parse(c).is_none() {
                return Err(RosterError::invalid(format!("unknown merit category: {}", c)));
            }
        }
        self.signed_points().map(|_| ())
    }

    fn build(&self, teacher_name: &str, at: DateTime<Utc>) -> Result<StudentRecord, RosterError> {
        let category = match self.kind {
            RecordType::Merit => Some(
                self.category
                    .as_deref()
                    .and_then(MeritCategory::parse)
                    .unwrap_or(MeritCategory::Personality)
                    .as_str()
                    .to_string(),
            ),
            RecordType::Demerit => None,
        };
        Ok(StudentRecord {
            id: Uuid::new_v4().to_string(),
            kind: self.kind,
            category,
            reason: self.reason.trim().to_string(),
            points: self.signed_points()?,
            timestamp: at,
            teacher_name: teacher_name.to_string(),
        })
    }
}

fn push_record(student: &mut Student, record: StudentRecord) -> Result<(), RosterError> {
    // The two fields only ever move together.
    let total = student
        .total_points
        .checked_add(record.points)
        .filter(|t| t.unsigned_abs() <= MAX_TOTAL_POINTS.unsigned_abs())
        .ok_or_else(|| {
            RosterError::invalid(format!("point total for {} would leave the allowed range", student.id))
        })?;
    student.total_points = total;
    student.records.insert(0, record);
    Ok(())
}

fn credit_teacher(state: &mut SchoolState, teacher_id: &str, kind: RecordType, count: u32) {
    if let Some(t) = state.teachers.iter_mut().find(|t| t.id == teacher_id) {
        match kind {
            RecordType::Merit => t.merits_given = t.merits_given.saturating_add(count),
            RecordType::Demerit => t.demerits_given = t.demerits_given.saturating_add(count),
        }
    }
}

/// Without an acting teacher this is a no-op.
pub fn apply_record(
    state: &SchoolState,
    actor: Option<&TeacherProfile>,
    student_id: &str,
    input: &RecordInput,
    now: DateTime<Utc>,
) -> Result<SchoolState, RosterError> {
    let Some(actor) = actor else {
        return Ok(state.clone());
    };
    input.validate()?;
    let mut next = state.clone();
    let student = next
        .students
        .iter_mut()
        .find(|s| s.id == student_id)
        .ok_or_else(|| RosterError::missing("student", student_id))?;
    push_record(student, input.build(&actor.name, now)?)?;
    credit_teacher(&mut next, &actor.id, input.kind, 1);
    Ok(next)
}

/// One independent record per student, each with its own id and timestamp.
pub fn apply_record_batch(
    state: &SchoolState,
    actor: Option<&TeacherProfile>,
    student_ids: &[String],
    input: &RecordInput,
    now: DateTime<Utc>,
) -> Result<SchoolState, RosterError> {
    let Some(actor) = actor else {
        return Ok(state.clone());
    };
    input.validate()?;
    let mut seen = HashSet::new();
    let targets: Vec<&String> = student_ids.iter().filter(|id| seen.insert(id.as_str())).collect();
    if targets.is_empty() {
        return Err(RosterError::invalid("select at least one student"));
    }
    if let Some(missing) = targets.iter().find(|id| state.student(id).is_none()) {
        return Err(RosterError::missing("student", missing));
    }


    // Every target must be able to take the points before any record is written.
    let delta = input.signed_points()?;
    for id in &targets {
        if let Some(s) = state.student(id) {
            let ok = s
                .total_points
                .checked_add(delta)
                .map_or(false, |t| t.unsigned_abs() <= MAX_TOTAL_POINTS.unsigned_abs());
            if !ok {
                return Err(RosterError::invalid(format!(
                    "point total for {} would leave the allowed range",
                    s.id
                )));
            }
        }
    }

    let mut next = state.clone();
    for (i, id) in targets.iter().enumerate() {
        let at = now + Duration::milliseconds(i as i64);
        let record = input.build(&actor.name, at)?;
        if let Some(student) = next.students.iter_mut().find(|s| &s.id == *id) {
            push_record(student, record)?;
        }
    }
    credit_teacher(&mut next, &actor.id, input.kind, targets.len() as u32);
    Ok(next)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub grade: u8,
    pub section: String,
    pub house: House,
}

fn check_grade(grade: u8) -> Result<(), RosterError> {
    if grade < MIN_GRADE {
        return Err(RosterError::invalid(format!("grade must be at least {}", MIN_GRADE)));
    }
    Ok(())
}

pub fn add_student(state: &SchoolState, input: NewStudent) -> Result<(SchoolState, String), RosterError> {
    if input.first_name.trim().is_empty() {
        return Err(RosterError::invalid("first name is required"));
    }
    check_grade(input.grade)?;
    let id = Uuid::new_v4().to_string();
    let student = Student {
        id: id.clone(),
        first_name: input.first_name.trim().to_string(),
        last_name: input.last_name.trim().to_string(),
        grade: input.grade,
        class_group: class_group(input.grade, &input.section),
        house: input.house,
        total_points: INITIAL_POINTS,
        avatar: seed::avatar_url(&id),
        records: Vec::new(),
    };
    let mut next = state.clone();
    next.students.insert(0, student);
    Ok((next, id))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub grade: Option<u8>,
    pub section: Option<String>,
    pub house: Option<House>,
}

/// Identity fields only; points and records are reachable solely through records.
pub fn update_student(
    state: &SchoolState,
    id: &str,
    patch: StudentPatch,
) -> Result<SchoolState, RosterError> {
    let mut next = state.clone();
    let s = next
        .students
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or_else(|| RosterError::missing("student", id))?;
    if let Some(v) = patch.first_name {
        if v.trim().is_empty() {
            return Err(RosterError::invalid("first name is required"));
        }
        s.first_name = v.trim().to_string();
    }
    if let Some(v) = patch.last_name {
        s.last_name = v.trim().to_string();
    }
    if let Some(h) = patch.house {
        s.house = h;
    }
    if patch.grade.is_some() || patch.section.is_some() {
        let grade = patch.grade.unwrap_or(s.grade);
        check_grade(grade)?;
        let section = patch.section.unwrap_or_else(|| s.section().to_string());
        s.grade = grade;
        s.class_group = class_group(grade, &section);
    }
    Ok(next)
}

/// Cases that reference the student keep the dangling id.
pub fn remove_student(state: &SchoolState, id: &str) -> Result<SchoolState, RosterError> {
    if state.student(id).is_none() {
        return Err(RosterError::missing("student", id));
    }
    let mut next = state.clone();
    next.students.retain(|s| s.id != id);
    Ok(next)
}

/// Year-end step: everyone moves up one grade, section kept. There is no
/// graduation cap; the only limit is the `u8` grade, and a roster holding a
/// student at grade 255 is rejected whole.
pub fn promote_all(state: &SchoolState) -> Result<SchoolState, RosterError> {
    let mut next = state.clone();
    for s in &mut next.students {
        let section = s.section().to_string();
        s.grade = s
            .grade
            .checked_add(1)
            .ok_or_else(|| RosterError::invalid(format!("grade of {} cannot go higher", s.id)))?;
        s.class_group = class_group(s.grade, &section);
    }
    Ok(next)
}

pub fn add_batch<R: Rng + ?Sized>(
    state: &SchoolState,
    n: usize,
    rng: &mut R,
) -> Result<SchoolState, RosterError> {
    if n == 0 || n > MAX_BATCH_STUDENTS {
        return Err(RosterError::invalid(format!(
            "batch size must be between 1 and {}",
            MAX_BATCH_STUDENTS
        )));
    }
    let mut next = state.clone();
    let mut generated = seed::generate_students(n, rng);
    generated.append(&mut next.students);
    next.students = generated;
    Ok(next)
}

pub fn clear_students(state: &SchoolState) -> SchoolState {
    let mut next = state.clone();
    next.students = Vec::new();
    next
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTeacher {
    pub name: String,
    pub staff_id: String,
    pub email: String,
    pub department: String,
    pub roles: Vec<String>,
    pub subjects: Vec<String>,
    pub is_admin: bool,
    pub password: Option<String>,
}

pub fn add_teacher(state: &SchoolState, input: NewTeacher) -> Result<(SchoolState, String), RosterError> {
    let name = input.name.trim();
    let staff_id = input.staff_id.trim();
    if name.is_empty() || staff_id.is_empty() {
        return Err(RosterError::invalid("name and staff id are required"));
    }
    // The staff id doubles as the record id unless it is already taken.
    let id = if state.teacher(staff_id).is_none() {
        staff_id.to_string()
    } else {
        Uuid::new_v4().to_string()
    };
    let password = input
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_TEACHER_PASSWORD);
    let teacher = TeacherProfile {
        avatar: seed::avatar_url(staff_id),
        id: id.clone(),
        name: name.to_string(),
        staff_id: staff_id.to_string(),
        email: input.email.trim().to_string(),
        department: input.department.trim().to_string(),
        roles: input.roles,
        subjects: input.subjects,
        is_admin: input.is_admin,
        password: Credential::new(password),
        merits_given: 0,
        demerits_given: 0,
    };
    let mut next = state.clone();
    next.teachers.push(teacher);
    Ok((next, id))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeacherPatch {
    pub name: Option<String>,
    pub staff_id: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
    pub roles: Option<Vec<String>>,
    pub subjects: Option<Vec<String>>,
    pub is_admin: Option<bool>,
    /// Absent keeps the stored credential.
    pub password: Option<String>,
}

pub fn update_teacher(
    state: &SchoolState,
    id: &str,
    patch: TeacherPatch,
) -> Result<SchoolState, RosterError> {
    let mut next = state.clone();
    let t = next
        .teachers
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| RosterError::missing("teacher", id))?;
    if let Some(v) = patch.name {
        if v.trim().is_empty() {
            return Err(RosterError::invalid("name is required"));
        }
        t.name = v.trim().to_string();
    }
    if let Some(v) = patch.staff_id {
        if v.trim().is_empty() {
            return Err(RosterError::invalid("staff id is required"));
        }
        t.staff_id = v.trim().to_string();
    }
    if let Some(v) = patch.email {
        t.email = v.trim().to_string();
    }
    if let Some(v) = patch.department {
        t.department = v.trim().to_string();
    }
    if let Some(v) = patch.roles {
        t.roles = v;
    }
    if let Some(v) = patch.subjects {
        t.subjects = v;
    }
    if let Some(v) = patch.is_admin {
        t.is_admin = v;
    }
    if let Some(p) = patch.password.filter(|p| !p.is_empty()) {
        t.password = Credential::new(&p);
    }
    Ok(next)
}

pub fn remove_teacher(
    state: &SchoolState,
    id: &str,
    session_teacher_id: Option<&str>,
) -> Result<SchoolState, RosterError> {
    if session_teacher_id == Some(id) {
        return Err(RosterError::SelfRemoval);
    }
    if state.teacher(id).is_none() {
        return Err(RosterError::missing("teacher", id));
    }
    let mut next = state.clone();
    next.teachers.retain(|t| t.id != id);
    Ok(next)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCase {
    pub title: String,
    pub category: String,
    pub description: String,
    pub location: String,
    pub severity: Severity,
    pub perpetrator_ids: Vec<String>,
    pub victim_ids: Vec<String>,
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| !id.trim().is_empty() && seen.insert(id.clone()))
        .collect()
}

pub fn add_case(
    state: &SchoolState,
    input: NewCase,
    logged_by: &str,
    now: DateTime<Utc>,
) -> Result<(SchoolState, String), RosterError> {
    if input.title.trim().is_empty() {
        return Err(RosterError::invalid("title is required"));
    }
    let perpetrator_ids = dedup(input.perpetrator_ids);
    if perpetrator_ids.is_empty() {
        return Err(RosterError::invalid("at least one perpetrator is required"));
    }
    let id = Uuid::new_v4().to_string();
    let case = DisciplinaryCase {
        id: id.clone(),
        title: input.title.trim().to_string(),
        category: input.category.trim().to_string(),
        description: input.description,
        location: input.location.trim().to_string(),
        severity: input.severity,
        status: CaseStatus::Pending,
        perpetrator_ids,
        victim_ids: dedup(input.victim_ids),
        decision: String::new(),
        date: now,
        logged_by: logged_by.to_string(),
    };
    let mut next = state.clone();
    next.cases.insert(0, case);
    Ok((next, id))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CasePatch {
    pub title: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub severity: Option<Severity>,
    pub perpetrator_ids: Option<Vec<String>>,
    pub victim_ids: Option<Vec<String>>,
    pub decision: Option<String>,
}

pub fn update_case(state: &SchoolState, id: &str, patch: CasePatch) -> Result<SchoolState, RosterError> {
    let mut next = state.clone();
    let c = next
        .cases
        .iter_mut()
        .find(|c| c.id == id)
        .ok_or_else(|| RosterError::missing("case", id))?;
    if let Some(v) = patch.title {
        if v.trim().is_empty() {
            return Err(RosterError::invalid("title is required"));
        }
        c.title = v.trim().to_string();
    }
    if let Some(v) = patch.category {
        c.category = v.trim().to_string();
    }
    if let Some(v) = patch.description {
        c.description = v;
    }
    if let Some(v) = patch.location {
        c.location = v.trim().to_string();
    }
    if let Some(v) = patch.severity {
        c.severity = v;
    }
    if let Some(v) = patch.perpetrator_ids {
        let v = dedup(v);
        if v.is_empty() {
            return Err(RosterError::invalid("at least one perpetrator is required"));
        }
        c.perpetrator_ids = v;
    }
    if let Some(v) = patch.victim_ids {
        c.victim_ids = dedup(v);
    }
    if let Some(v) = patch.decision {
        c.decision = v;
    }
    Ok(next)
}

/// Any status may follow any other; a resolved case can be reopened.
pub fn set_case_status(
    state: &SchoolState,
    id: &str,
    status: CaseStatus,
    decision: Option<String>,
) -> Result<SchoolState, RosterError> {
    let mut next = state.clone();
    let c = next
        .cases
        .iter_mut()
        .find(|c| c.id == id)
        .ok_or_else(|| RosterError::missing("case", id))?;
    c.status = status;
    if let Some(d) = decision {
        c.decision = d;
    }
    Ok(next)
}

pub fn remove_case(state: &SchoolState, id: &str) -> Result<SchoolState, RosterError> {
    if state.case(id).is_none() {
        return Err(RosterError::missing("case", id));
    }
    let mut next = state.clone();
    next.cases.retain(|c| c.id != id);
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{default_config, seed_teachers};
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).single().expect("valid time")
    }

    fn student(id: &str, grade: u8, section: &str) -> Student {
        Student {
            id: id.into(),
            first_name: "Aiman".into(),
            last_name: "bin Hassan".into(),
            grade,
            class_group: class_group(grade, section),
            house: House::Blue,
            total_points: INITIAL_POINTS,
            avatar: String::new(),
            records: vec![],
        }
    }

    fn state_with(students: Vec<Student>) -> SchoolState {
        SchoolState {
            students,
            teachers: seed_teachers(),
            cases: vec![],
            config: default_config(),
        }
    }

    fn merit(points: i64) -> RecordInput {
        RecordInput {
            kind: RecordType::Merit,
            category: Some("Academic".into()),
            reason: "Top score in class test".into(),
            points,
        }
    }

    #[test]
    fn merit_moves_total_and_prepends_record() {
        let state = state_with(vec![student("s1", 2, "Bestari")]);
        let actor = state.teachers[1].clone();
        let next = apply_record(&state, Some(&actor), "s1", &merit(5), now()).expect("apply");
        let s = next.student("s1").expect("student");
        assert_eq!(s.total_points, 105);
        assert_eq!(s.records.len(), 1);
        assert_eq!(s.records[0].points, 5);
        assert_eq!(s.records[0].teacher_name, actor.name);
        assert!(s.points_consistent());
        assert_eq!(next.teacher(&actor.id).map(|t| t.merits_given), Some(1));
        // Input snapshot untouched.
        assert_eq!(state.student("s1").map(|s| s.total_points), Some(100));
    }

    #[test]
    fn demerit_sign_follows_type_and_drops_category() {
        let state = state_with(vec![student("s1", 2, "Bestari")]);
        let actor = state.teachers[0].clone();
        let input = RecordInput {
            kind: RecordType::Demerit,
            category: Some("Academic".into()),
            reason: "Late to class".into(),
            points: 3,
        };
        let next = apply_record(&state, Some(&actor), "s1", &input, now()).expect("apply");
        let s = next.student("s1").expect("student");
        assert_eq!(s.total_points, 97);
        assert_eq!(s.records[0].points, -3);
        assert_eq!(s.records[0].category, None);
        assert!(s.points_consistent());
    }

    #[test]
    fn newest_record_comes_first() {
        let state = state_with(vec![student("s1", 1, "Amanah")]);
        let actor = state.teachers[0].clone();
        let a = apply_record(&state, Some(&actor), "s1", &merit(2), now()).expect("first");
        let b = apply_record(&a, Some(&actor), "s1", &merit(7), now() + Duration::seconds(1))
            .expect("second");
        let s = b.student("s1").expect("student");
        assert_eq!(s.records.iter().map(|r| r.points).collect::<Vec<_>>(), vec![7, 2]);
        assert_eq!(s.total_points, 109);
    }

    #[test]
    fn apply_without_actor_is_a_noop() {
        let state = state_with(vec![student("s1", 1, "Amanah")]);
        let next = apply_record(&state, None, "s1", &merit(5), now()).expect("noop");
        assert_eq!(next, state);
    }

    #[test]
    fn zero_points_and_unknown_student_are_rejected() {
        let state = state_with(vec![student("s1", 1, "Amanah")]);
        let actor = state.teachers[0].clone();
        assert!(matches!(
            apply_record(&state, Some(&actor), "s1", &merit(0), now()),
            Err(RosterError::Validation(_))
        ));
        assert!(matches!(
            apply_record(&state, Some(&actor), "nope", &merit(1), now()),
            Err(RosterError::NotFound { .. })
        ));
    }

    #[test]
    fn batch_records_are_distinct_and_scoped() {
        let state = state_with(vec![
            student("s1", 1, "Amanah"),
            student("s2", 1, "Amanah"),
            student("s3", 1, "Amanah"),
            student("s4", 1, "Amanah"),
        ]);
        let actor = state.teachers[0].clone();
        let ids: Vec<String> = vec!["s1".into(), "s2".into(), "s4".into()];
        let next = apply_record_batch(&state, Some(&actor), &ids, &merit(3), now()).expect("batch");

        let new_records: Vec<&StudentRecord> = ids
            .iter()
            .map(|id| &next.student(id).expect("student").records[0])
            .collect();
        let rec_ids: HashSet<_> = new_records.iter().map(|r| r.id.as_str()).collect();
        let stamps: HashSet<_> = new_records.iter().map(|r| r.timestamp).collect();
        assert_eq!(rec_ids.len(), 3);
        assert_eq!(stamps.len(), 3);
        for id in &ids {
            assert_eq!(next.student(id).map(|s| s.total_points), Some(103));
        }
        assert_eq!(next.student("s3").map(|s| s.total_points), Some(100));
        assert!(next.students.iter().all(|s| s.points_consistent()));
        assert_eq!(next.teacher(&actor.id).map(|t| t.merits_given), Some(3));
    }

    #[test]
    fn batch_with_unknown_id_changes_nothing() {
        let state = state_with(vec![student("s1", 1, "Amanah")]);
        let actor = state.teachers[0].clone();
        let ids = vec!["s1".to_string(), "ghost".to_string()];
        assert!(apply_record_batch(&state, Some(&actor), &ids, &merit(3), now()).is_err());
    }

    #[test]
    fn promotion_keeps_section_without_cap() {
        let state = state_with(vec![
            student("s1", 3, "Bestari"),
            student("s2", 3, "Cekal Jaya"),
            student("s3", 5, "Amanah"),
        ]);
        let next = promote_all(&state).expect("promote");
        assert_eq!(next.student("s1").map(|s| s.class_group.as_str()), Some("4 Bestari"));
        assert_eq!(next.student("s2").map(|s| s.class_group.as_str()), Some("4 Cekal Jaya"));
        assert_eq!(next.student("s3").map(|s| s.grade), Some(6));
        assert_eq!(next.student("s3").map(|s| s.section()), Some("Amanah"));
    }

    #[test]
    fn promotion_past_the_grade_limit_is_rejected() {
        let state = state_with(vec![student("s1", 3, "Amanah"), student("s2", u8::MAX, "Gigih")]);
        assert!(matches!(promote_all(&state), Err(RosterError::Validation(_))));
    }

    #[test]
    fn oversized_points_are_rejected_without_panicking() {
        let state = state_with(vec![student("s1", 1, "Amanah")]);
        let actor = state.teachers[0].clone();
        for points in [i64::MAX, i64::MIN, MAX_RECORD_POINTS + 1] {
            assert!(matches!(
                apply_record(&state, Some(&actor), "s1", &merit(points), now()),
                Err(RosterError::Validation(_))
            ));
        }
        let next = apply_record(&state, Some(&actor), "s1", &merit(MAX_RECORD_POINTS), now())
            .expect("largest allowed record");
        assert_eq!(
            next.student("s1").map(|s| s.total_points),
            Some(INITIAL_POINTS + MAX_RECORD_POINTS)
        );
    }

    #[test]
    fn total_at_the_limit_refuses_more_points() {
        let mut near = student("s1", 1, "Amanah");
        near.total_points = MAX_TOTAL_POINTS;
        let state = state_with(vec![near, student("s2", 1, "Amanah")]);
        let actor = state.teachers[0].clone();
        assert!(matches!(
            apply_record(&state, Some(&actor), "s1", &merit(1), now()),
            Err(RosterError::Validation(_))
        ));
        // One bad target fails the whole batch.
        let ids = vec!["s2".to_string(), "s1".to_string()];
        assert!(matches!(
            apply_record_batch(&state, Some(&actor), &ids, &merit(1), now()),
            Err(RosterError::Validation(_))
        ));
    }

    #[test]
    fn add_and_remove_student() {
        let state = state_with(vec![student("s1", 1, "Amanah")]);
        let (next, id) = add_student(
            &state,
            NewStudent {
                first_name: "Siti".into(),
                last_name: "binti Yusof".into(),
                grade: 2,
                section: "Gigih".into(),
                house: House::Green,
            },
        )
        .expect("add");
        let s = next.student(&id).expect("added");
        assert_eq!(next.students[0].id, id);
        assert_eq!(s.total_points, INITIAL_POINTS);
        assert_eq!(s.class_group, "2 Gigih");
        assert!(!s.avatar.is_empty());

        let removed = remove_student(&next, &id).expect("remove");
        assert!(removed.student(&id).is_none());
        assert!(remove_student(&removed, &id).is_err());
    }

    #[test]
    fn remove_student_leaves_case_references() {
        let state = state_with(vec![student("s1", 1, "Amanah")]);
        let (with_case, case_id) = add_case(
            &state,
            NewCase {
                title: "Scuffle at canteen".into(),
                category: "Fighting".into(),
                description: String::new(),
                location: "Canteen".into(),
                severity: Severity::Major,
                perpetrator_ids: vec!["s1".into()],
                victim_ids: vec![],
            },
            "Cikgu",
            now(),
        )
        .expect("case");
        let next = remove_student(&with_case, "s1").expect("remove");
        assert_eq!(
            next.case(&case_id).map(|c| c.perpetrator_ids.clone()),
            Some(vec!["s1".to_string()])
        );
    }

    #[test]
    fn update_student_rederives_class_group() {
        let state = state_with(vec![student("s1", 2, "Bestari")]);
        let next = update_student(
            &state,
            "s1",
            StudentPatch {
                grade: Some(3),
                ..Default::default()
            },
        )
        .expect("update");
        assert_eq!(next.student("s1").map(|s| s.class_group.as_str()), Some("3 Bestari"));
    }

    #[test]
    fn batch_add_prepends_and_bounds_size() {
        let state = state_with(vec![student("s1", 1, "Amanah")]);
        let mut rng = StdRng::seed_from_u64(1);
        let next = add_batch(&state, 4, &mut rng).expect("batch");
        assert_eq!(next.students.len(), 5);
        assert_eq!(next.students[4].id, "s1");
        assert!(add_batch(&state, 0, &mut rng).is_err());
        assert!(add_batch(&state, MAX_BATCH_STUDENTS + 1, &mut rng).is_err());
    }

    #[test]
    fn clear_students_empties_roster_only() {
        let state = state_with(vec![student("s1", 1, "Amanah")]);
        let next = clear_students(&state);
        assert!(next.students.is_empty());
        assert_eq!(next.teachers, state.teachers);
    }

    #[test]
    fn teacher_add_update_remove() {
        let state = state_with(vec![]);
        let (next, id) = add_teacher(
            &state,
            NewTeacher {
                name: "Encik Dinesh".into(),
                staff_id: "T2001".into(),
                ..Default::default()
            },
        )
        .expect("add");
        assert_eq!(id, "T2001");
        let t = next.teacher(&id).expect("teacher");
        assert!(t.password.verify(DEFAULT_TEACHER_PASSWORD));

        // Colliding staff id falls back to a generated id.
        let (again, id2) = add_teacher(
            &next,
            NewTeacher {
                name: "Another".into(),
                staff_id: "T2001".into(),
                password: Some("different1".into()),
                ..Default::default()
            },
        )
        .expect("add again");
        assert_ne!(id2, "T2001");

        let updated = update_teacher(
            &again,
            &id,
            TeacherPatch {
                department: Some("Mathematics".into()),
                ..Default::default()
            },
        )
        .expect("update");
        let t = updated.teacher(&id).expect("teacher");
        assert_eq!(t.department, "Mathematics");
        assert!(t.password.verify(DEFAULT_TEACHER_PASSWORD), "password preserved");

        assert_eq!(
            remove_teacher(&updated, &id, Some(&id)),
            Err(RosterError::SelfRemoval)
        );
        let removed = remove_teacher(&updated, &id, Some("ADMIN01")).expect("remove");
        assert!(removed.teacher(&id).is_none());
    }

    #[test]
    fn case_lifecycle() {
        let state = state_with(vec![student("s1", 1, "Amanah")]);
        let empty = NewCase {
            title: "Graffiti".into(),
            category: "Vandalism".into(),
            description: String::new(),
            location: "Block B".into(),
            severity: Severity::Minor,
            perpetrator_ids: vec![],
            victim_ids: vec![],
        };
        assert!(matches!(
            add_case(&state, empty.clone(), "Cikgu", now()),
            Err(RosterError::Validation(_))
        ));

        let (next, id) = add_case(
            &state,
            NewCase {
                perpetrator_ids: vec!["s1".into(), "s1".into()],
                ..empty
            },
            "Cikgu",
            now(),
        )
        .expect("add");
        let c = next.case(&id).expect("case");
        assert_eq!(c.status, CaseStatus::Pending);
        assert_eq!(c.perpetrator_ids, vec!["s1".to_string()]);

        let resolved = set_case_status(&next, &id, CaseStatus::Resolved, Some("Detention".into()))
            .expect("resolve");
        let c = resolved.case(&id).expect("case");
        assert_eq!((c.status, c.decision.as_str()), (CaseStatus::Resolved, "Detention"));

        let reopened = set_case_status(&resolved, &id, CaseStatus::Pending, None).expect("reopen");
        assert_eq!(reopened.case(&id).map(|c| c.status), Some(CaseStatus::Pending));
        assert_eq!(reopened.case(&id).map(|c| c.decision.as_str()), Some("Detention"));

        let gone = remove_case(&reopened, &id).expect("remove");
        assert!(gone.cases.is_empty());
    }
}
