use crate::auth::{Credential, DEFAULT_SCHOOL_PASSWORD, DEFAULT_TEACHER_PASSWORD};
use crate::model::{
    class_group, default_batch_colors, House, SchoolConfig, SchoolState, Student, TeacherProfile,
    CLASS_SECTIONS, INITIAL_POINTS, MAX_GRADE, MIN_GRADE,
};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use uuid::Uuid;

pub const SEED_STUDENT_COUNT: usize = 30;

const MALAY_MALE: &[&str] = &["Ahmad", "Muhammad", "Hafiz", "Irfan", "Danial", "Aiman", "Haziq"];
const MALAY_FEMALE: &[&str] = &["Nur", "Siti", "Aisyah", "Farah", "Alya", "Sofea", "Hani"];
const MALAY_FATHERS: &[&str] = &["Ismail", "Abdullah", "Rahman", "Hassan", "Yusof", "Kamal"];
const CHINESE_SURNAMES: &[&str] = &["Tan", "Lim", "Wong", "Lee", "Chong", "Ng", "Ooi"];
const CHINESE_GIVEN: &[&str] = &["Wei Jie", "Mei Ling", "Jia Hui", "Zhi Hao", "Xin Yi", "Kai Wen"];
const INDIAN_GIVEN: &[&str] = &["Arjun", "Kavitha", "Suresh", "Priya", "Dinesh", "Thivya"];
const INDIAN_FATHERS: &[&str] = &["Muthu", "Raman", "Krishnan", "Subramaniam", "Ganesan"];
const IBAN_GIVEN: &[&str] = &["Jenny", "Mark", "Elena", "Justin", "Agnes"];
const IBAN_FATHERS: &[&str] = &["Jugah", "Ningkan", "Linggi", "Sandah", "Unggat"];

/// Placeholder image for a seed value.
pub fn avatar_url(seed: &str) -> String {
    let cleaned: String = seed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    format!(
        "https://api.dicebear.com/7.x/avataaars/svg?seed={}",
        if cleaned.is_empty() { "anon" } else { &cleaned }
    )
}

fn pick<'a, R: Rng + ?Sized>(rng: &mut R, pool: &[&'a str]) -> &'a str {
    pool.choose(rng).copied().unwrap_or("")
}

/// First and last name; the linking particle stays part of the surname string.
fn generate_name<R: Rng + ?Sized>(rng: &mut R) -> (String, String) {
    match rng.gen_range(0..5) {
        0 => (
            pick(rng, MALAY_MALE).to_string(),
            format!("bin {}", pick(rng, MALAY_FATHERS)),
        ),
        1 => (
            pick(rng, MALAY_FEMALE).to_string(),
            format!("binti {}", pick(rng, MALAY_FATHERS)),
        ),
        2 => (
            pick(rng, CHINESE_GIVEN).to_string(),
            pick(rng, CHINESE_SURNAMES).to_string(),
        ),
        3 => {
            let particle = if rng.gen_bool(0.5) { "a/l" } else { "a/p" };
            (
                pick(rng, INDIAN_GIVEN).to_string(),
                format!("{} {}", particle, pick(rng, INDIAN_FATHERS)),
            )
        }
        _ => (
            pick(rng, IBAN_GIVEN).to_string(),
            format!("anak {}", pick(rng, IBAN_FATHERS)),
        ),
    }
}

pub fn generate_students<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<Student> {
    (0..n)
        .map(|_| {
            let id = Uuid::new_v4().to_string();
            let (first_name, last_name) = generate_name(rng);
            let grade = rng.gen_range(MIN_GRADE..=MAX_GRADE);
            let section = pick(rng, CLASS_SECTIONS);
            let house = House::ALL[rng.gen_range(0..House::ALL.len())];
            Student {
                avatar: avatar_url(&id),
                id,
                first_name,
                last_name,
                grade,
                class_group: class_group(grade, section),
                house,
                total_points: INITIAL_POINTS,
                records: Vec::new(),
            }
        })
        .collect()
}

fn teacher(
    staff_id: &str,
    name: &str,
    email: &str,
    department: &str,
    roles: &[&str],
    subjects: &[&str],
    is_admin: bool,
) -> TeacherProfile {
    TeacherProfile {
        id: staff_id.to_string(),
        name: name.to_string(),
        staff_id: staff_id.to_string(),
        email: email.to_string(),
        department: department.to_string(),
        roles: roles.iter().map(|s| s.to_string()).collect(),
        subjects: subjects.iter().map(|s| s.to_string()).collect(),
        is_admin,
        password: Credential::new(DEFAULT_TEACHER_PASSWORD),
        merits_given: 0,
        demerits_given: 0,
        avatar: avatar_url(staff_id),
    }
}

pub fn seed_teachers() -> Vec<TeacherProfile> {
    vec![
        teacher(
            "ADMIN01",
            "Puan Rosnah binti Ahmad",
            "admin@school.edu.my",
            "Administration",
            &["Principal"],
            &[],
            true,
        ),
        teacher(
            "T1001",
            "Encik Lim Chee Keong",
            "lim.ck@school.edu.my",
            "Science",
            &["Discipline Teacher", "Subject Teacher"],
            &["Science", "Mathematics"],
            false,
        ),
        teacher(
            "T1002",
            "Cik Kavitha a/p Raman",
            "kavitha@school.edu.my",
            "Languages",
            &["Class Teacher", "Subject Teacher"],
            &["English"],
            false,
        ),
    ]
}

pub fn default_config() -> SchoolConfig {
    SchoolConfig {
        batch_colors: default_batch_colors(),
        school_password: Credential::new(DEFAULT_SCHOOL_PASSWORD),
        language: "en".to_string(),
        last_sync: None,
        house_baselines: BTreeMap::new(),
    }
}

/// First-run dataset.
pub fn seed_state<R: Rng + ?Sized>(rng: &mut R) -> SchoolState {
    SchoolState {
        students: generate_students(SEED_STUDENT_COUNT, rng),
        teachers: seed_teachers(),
        cases: Vec::new(),
        config: default_config(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn generated_students_start_clean() {
        let mut rng = StdRng::seed_from_u64(7);
        let students = generate_students(50, &mut rng);
        assert_eq!(students.len(), 50);
        let ids: HashSet<_> = students.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), 50);
        for s in &students {
            assert_eq!(s.total_points, INITIAL_POINTS);
            assert!(s.records.is_empty());
            assert!((MIN_GRADE..=MAX_GRADE).contains(&s.grade));
            assert!(s.class_group.starts_with(&format!("{} ", s.grade)));
            assert!(CLASS_SECTIONS.contains(&s.section()));
            assert!(s.avatar.starts_with("https://"));
        }
    }

    #[test]
    fn seed_teachers_include_one_admin() {
        let teachers = seed_teachers();
        assert_eq!(teachers.iter().filter(|t| t.is_admin).count(), 1);
        assert!(teachers
            .iter()
            .all(|t| t.password.verify(DEFAULT_TEACHER_PASSWORD)));
    }

    #[test]
    fn avatar_url_sanitizes_seed() {
        assert!(avatar_url("a b/c").ends_with("seed=abc"));
        assert!(avatar_url("").ends_with("seed=anon"));
    }
}
