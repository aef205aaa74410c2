use crate::auth::Credential;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Every student starts here; `total_points` is this plus the sum of record points.
pub const INITIAL_POINTS: i64 = 100;
/// Largest magnitude a single record may carry.
pub const MAX_RECORD_POINTS: i64 = 1_000;
/// Largest magnitude a student's running total may reach.
pub const MAX_TOTAL_POINTS: i64 = 1_000_000_000;

pub const MIN_GRADE: u8 = 1;
pub const MAX_GRADE: u8 = 5;

pub const CLASS_SECTIONS: &[&str] = &["Amanah", "Bestari", "Cekal", "Dedikasi", "Gigih"];

pub const TEACHER_ROLES: &[&str] = &[
    "Principal",
    "Senior Assistant",
    "Discipline Teacher",
    "Counsellor",
    "Class Teacher",
    "Subject Teacher",
    "House Master",
];

pub const SUBJECTS: &[&str] = &[
    "Bahasa Melayu",
    "English",
    "Mathematics",
    "Science",
    "History",
    "Geography",
    "Moral Education",
    "Islamic Education",
    "Physical Education",
    "Art",
];

pub const CASE_CATEGORIES: &[&str] = &[
    "Bullying",
    "Truancy",
    "Vandalism",
    "Fighting",
    "Cheating",
    "Smoking",
    "Disrespect",
    "Other",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum House {
    Red,
    Blue,
    Green,
    Yellow,
}

impl House {
    pub const ALL: [House; 4] = [House::Red, House::Blue, House::Green, House::Yellow];

    pub fn as_str(self) -> &'static str {
        match self {
            House::Red => "Red",
            House::Blue => "Blue",
            House::Green => "Green",
            House::Yellow => "Yellow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        House::ALL
            .into_iter()
            .find(|h| h.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for House {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    Merit,
    Demerit,
}

impl RecordType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MERIT" => Some(Self::Merit),
            "DEMERIT" => Some(Self::Demerit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MeritCategory {
    Academic,
    #[serde(rename = "Co-curricular")]
    CoCurricular,
    Personality,
    #[serde(rename = "3K")]
    ThreeK,
}

impl MeritCategory {
    pub const ALL: [MeritCategory; 4] = [
        MeritCategory::Academic,
        MeritCategory::CoCurricular,
        MeritCategory::Personality,
        MeritCategory::ThreeK,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MeritCategory::Academic => "Academic",
            MeritCategory::CoCurricular => "Co-curricular",
            MeritCategory::Personality => "Personality",
            MeritCategory::ThreeK => "3K",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        MeritCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

/// One entry of the fixed reason catalogue offered by the record form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonPreset {
    #[serde(rename = "type")]
    pub kind: RecordType,
    pub category: Option<MeritCategory>,
    pub reason: &'static str,
    pub points: i64,
}

pub fn reason_catalogue() -> Vec<ReasonPreset> {
    use MeritCategory::*;
    use RecordType::*;
    let merit = |category, reason, points| ReasonPreset {
        kind: Merit,
        category: Some(category),
        reason,
        points,
    };
    let demerit = |reason, points| ReasonPreset {
        kind: Demerit,
        category: None,
        reason,
        points,
    };
    vec![
        merit(Academic, "Top score in class test", 10),
        merit(Academic, "Completed homework consistently", 3),
        merit(CoCurricular, "Represented school in competition", 15),
        merit(CoCurricular, "Active club participation", 5),
        merit(Personality, "Helped a classmate", 2),
        merit(Personality, "Showed leadership", 5),
        merit(ThreeK, "Kept classroom clean", 2),
        merit(ThreeK, "Volunteered for gotong-royong", 5),
        demerit("Late to class", -2),
        demerit("Incomplete uniform", -2),
        demerit("Disrupting lesson", -5),
        demerit("Using phone in class", -5),
        demerit("Skipping class", -10),
        demerit("Fighting", -20),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RecordType,
    /// Raw category label; only meaningful on merits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub reason: String,
    pub points: i64,
    pub timestamp: DateTime<Utc>,
    pub teacher_name: String,
}

impl StudentRecord {
    /// Absent or unrecognised categories count as Personality.
    pub fn merit_category(&self) -> MeritCategory {
        self.category
            .as_deref()
            .and_then(MeritCategory::parse)
            .unwrap_or(MeritCategory::Personality)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub grade: u8,
    pub class_group: String,
    pub house: House,
    pub total_points: i64,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub records: Vec<StudentRecord>,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Token following the first space of `class_group`, kept verbatim.
    pub fn section(&self) -> &str {
        self.class_group
            .split_once(' ')
            .map(|(_, rest)| rest)
            .unwrap_or("")
    }

    pub fn points_consistent(&self) -> bool {
        self.records
            .iter()
            .try_fold(INITIAL_POINTS, |acc, r| acc.checked_add(r.points))
            == Some(self.total_points)
    }

    /// Record and total magnitudes stay inside what the engine can sum safely.
    pub fn points_in_range(&self) -> bool {
        self.total_points.unsigned_abs() <= MAX_TOTAL_POINTS.unsigned_abs()
            && self
                .records
                .iter()
                .all(|r| r.points.unsigned_abs() <= MAX_RECORD_POINTS.unsigned_abs())
    }
}

pub fn class_group(grade: u8, section: &str) -> String {
    let section = section.trim();
    if section.is_empty() {
        grade.to_string()
    } else {
        format!("{} {}", grade, section)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherProfile {
    pub id: String,
    pub name: String,
    pub staff_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub is_admin: bool,
    pub password: Credential,
    #[serde(default)]
    pub merits_given: u32,
    #[serde(default)]
    pub demerits_given: u32,
    #[serde(default)]
    pub avatar: String,
}

impl TeacherProfile {
    /// Everything except the credential, for responses and the remembered session.
    pub fn public_view(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "staffId": self.staff_id,
            "email": self.email,
            "department": self.department,
            "roles": self.roles,
            "subjects": self.subjects,
            "isAdmin": self.is_admin,
            "meritsGiven": self.merits_given,
            "demeritsGiven": self.demerits_given,
            "avatar": self.avatar,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Minor,
    Major,
    Severe,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MINOR" => Some(Self::Minor),
            "MAJOR" => Some(Self::Major),
            "SEVERE" => Some(Self::Severe),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaseStatus {
    Pending,
    Investigating,
    Resolved,
}

impl CaseStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "INVESTIGATING" => Some(Self::Investigating),
            "RESOLVED" => Some(Self::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisciplinaryCase {
    pub id: String,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    pub severity: Severity,
    pub status: CaseStatus,
    pub perpetrator_ids: Vec<String>,
    #[serde(default)]
    pub victim_ids: Vec<String>,
    #[serde(default)]
    pub decision: String,
    pub date: DateTime<Utc>,
    pub logged_by: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseBaseline {
    #[serde(default)]
    pub merits: u64,
    #[serde(default)]
    pub demerits: u64,
}

pub type HouseBaselines = BTreeMap<House, HouseBaseline>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolConfig {
    pub batch_colors: BTreeMap<String, String>,
    pub school_password: Credential,
    pub language: String,
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub house_baselines: HouseBaselines,
}

pub fn default_batch_colors() -> BTreeMap<String, String> {
    [
        ("1", "#3B82F6"),
        ("2", "#10B981"),
        ("3", "#F59E0B"),
        ("4", "#EF4444"),
        ("5", "#8B5CF6"),
    ]
    .into_iter()
    .map(|(g, c)| (g.to_string(), c.to_string()))
    .collect()
}

/// The whole dataset owned by the daemon. Operations replace it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolState {
    pub students: Vec<Student>,
    pub teachers: Vec<TeacherProfile>,
    pub cases: Vec<DisciplinaryCase>,
    pub config: SchoolConfig,
}

impl SchoolState {
    pub fn student(&self, id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn teacher(&self, id: &str) -> Option<&TeacherProfile> {
        self.teachers.iter().find(|t| t.id == id)
    }

    pub fn case(&self, id: &str) -> Option<&DisciplinaryCase> {
        self.cases.iter().find(|c| c.id == id)
    }
}
