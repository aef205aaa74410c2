use crate::model::{House, HouseBaselines, MeritCategory, RecordType, Student};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_TOP_BOTTOM_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Grade(u8),
    House(House),
    ClassGroup(String),
}

impl Scope {
    pub fn includes(&self, s: &Student) -> bool {
        match self {
            Scope::All => true,
            Scope::Grade(g) => s.grade == *g,
            Scope::House(h) => s.house == *h,
            Scope::ClassGroup(c) => s.class_group == *c,
        }
    }

    pub fn parse(value: Option<&serde_json::Value>) -> Result<Self, String> {
        let Some(v) = value.filter(|v| !v.is_null()) else {
            return Ok(Scope::All);
        };
        let kind = v
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| "scope.kind must be a string".to_string())?;
        let raw = v.get("value");
        match kind {
            "all" => Ok(Scope::All),
            "grade" => raw
                .and_then(|x| x.as_u64())
                .and_then(|g| u8::try_from(g).ok())
                .map(Scope::Grade)
                .ok_or_else(|| "scope.value must be a grade number".into()),
            "house" => raw
                .and_then(|x| x.as_str())
                .and_then(House::parse)
                .map(Scope::House)
                .ok_or_else(|| "scope.value must be a house".into()),
            "classGroup" => raw
                .and_then(|x| x.as_str())
                .map(|c| Scope::ClassGroup(c.to_string()))
                .ok_or_else(|| "scope.value must be a class group".into()),
            other => Err(format!("unknown scope kind: {}", other)),
        }
    }
}

/// Absolute merit and demerit point sums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointTotals {
    pub merit: i64,
    pub demerit: i64,
}

impl PointTotals {
    fn add(&mut self, kind: RecordType, points: i64) {
        match kind {
            RecordType::Merit => self.merit = self.merit.saturating_add(points.saturating_abs()),
            RecordType::Demerit => self.demerit = self.demerit.saturating_add(points.saturating_abs()),
        }
    }

    pub fn net(&self) -> i64 {
        self.merit.saturating_sub(self.demerit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub id: String,
    pub name: String,
    pub class_group: String,
    pub house: House,
    pub total_points: i64,
}

impl RankedStudent {
    fn of(s: &Student) -> Self {
        Self {
            id: s.id.clone(),
            name: s.display_name(),
            class_group: s.class_group.clone(),
            house: s.house,
            total_points: s.total_points,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub no_data: bool,
    pub total_merits: u64,
    pub total_demerits: u64,
    pub houses: BTreeMap<House, PointTotals>,
    pub grades: BTreeMap<u8, PointTotals>,
    pub categories: BTreeMap<MeritCategory, i64>,
    pub top: Vec<RankedStudent>,
    pub bottom: Vec<RankedStudent>,
}

/// Single pass over the roster. Pure: same input, same output.
pub fn dashboard(
    students: &[Student],
    scope: &Scope,
    baselines: &HouseBaselines,
    top_n: usize,
) -> DashboardStats {
    let mut total_merits = baselines.values().fold(0u64, |acc, b| acc.saturating_add(b.merits));
    let mut total_demerits = baselines.values().fold(0u64, |acc, b| acc.saturating_add(b.demerits));
    let mut houses: BTreeMap<House, PointTotals> =
        House::ALL.iter().map(|h| (*h, PointTotals::default())).collect();
    let mut grades: BTreeMap<u8, PointTotals> = BTreeMap::new();
    let mut categories: BTreeMap<MeritCategory, i64> =
        MeritCategory::ALL.iter().map(|c| (*c, 0)).collect();

    for s in students {
        let grade = grades.entry(s.grade).or_default();
        let house = houses.entry(s.house).or_default();
        for r in &s.records {
            match r.kind {
                RecordType::Merit => {
                    total_merits = total_merits.saturating_add(1);
                    let sum = categories.entry(r.merit_category()).or_insert(0);
                    *sum = sum.saturating_add(r.points.saturating_abs());
                }
                RecordType::Demerit => total_demerits = total_demerits.saturating_add(1),
            }
            house.add(r.kind, r.points);
            grade.add(r.kind, r.points);
        }
    }

    let (top, bottom) = rank(students, scope, top_n);
    DashboardStats {
        no_data: students.is_empty(),
        total_merits,
        total_demerits,
        houses,
        grades,
        categories,
        top,
        bottom,
    }
}

/// Highest and lowest `top_n` by points inside the scope. Stable on ties.
pub fn rank(
    students: &[Student],
    scope: &Scope,
    top_n: usize,
) -> (Vec<RankedStudent>, Vec<RankedStudent>) {
    let in_scope: Vec<&Student> = students.iter().filter(|s| scope.includes(s)).collect();

    let mut desc = in_scope.clone();
    desc.sort_by(|a, b| b.total_points.cmp(&a.total_points));
    let mut asc = in_scope;
    asc.sort_by(|a, b| a.total_points.cmp(&b.total_points));

    (
        desc.into_iter().take(top_n).map(RankedStudent::of).collect(),
        asc.into_iter().take(top_n).map(RankedStudent::of).collect(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseStanding {
    pub house: House,
    pub merit: i64,
    pub demerit: i64,
    pub net: i64,
}

/// Leaderboard order: net points descending, house order on ties.
pub fn house_standings(stats: &DashboardStats) -> Vec<HouseStanding> {
    let mut rows: Vec<HouseStanding> = stats
        .houses
        .iter()
        .map(|(house, t)| HouseStanding {
            house: *house,
            merit: t.merit,
            demerit: t.demerit,
            net: t.net(),
        })
        .collect();
    rows.sort_by(|a, b| b.net.cmp(&a.net));
    rows
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StudentSort {
    #[default]
    Roster,
    Name,
    PointsDesc,
    PointsAsc,
}

impl StudentSort {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "roster" => Some(Self::Roster),
            "name" => Some(Self::Name),
            "pointsDesc" => Some(Self::PointsDesc),
            "pointsAsc" => Some(Self::PointsAsc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub query: Option<String>,
    pub grade: Option<u8>,
    pub house: Option<House>,
    pub class_group: Option<String>,
    pub sort: StudentSort,
}

/// Linear scan used by the roster list.
pub fn filter_students<'a>(students: &'a [Student], filter: &StudentFilter) -> Vec<&'a Student> {
    let needle = filter
        .query
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());
    let mut out: Vec<&Student> = students
        .iter()
        .filter(|s| filter.grade.map_or(true, |g| s.grade == g))
        .filter(|s| filter.house.map_or(true, |h| s.house == h))
        .filter(|s| {
            filter
                .class_group
                .as_deref()
                .map_or(true, |c| s.class_group == c)
        })
        .filter(|s| {
            needle
                .as_deref()
                .map_or(true, |n| s.display_name().to_lowercase().contains(n) || s.id == n)
        })
        .collect();
    match filter.sort {
        StudentSort::Roster => {}
        StudentSort::Name => out.sort_by_key(|s| s.display_name().to_lowercase()),
        StudentSort::PointsDesc => out.sort_by(|a, b| b.total_points.cmp(&a.total_points)),
        StudentSort::PointsAsc => out.sort_by(|a, b| a.total_points.cmp(&b.total_points)),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{class_group, HouseBaseline, StudentRecord, INITIAL_POINTS};
    use chrono::{TimeZone, Utc};

    fn rec(kind: RecordType, category: Option<&str>, points: i64) -> StudentRecord {
        StudentRecord {
            id: format!("r{}", points),
            kind,
            category: category.map(|c| c.to_string()),
            reason: "x".into(),
            points,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("time"),
            teacher_name: "T".into(),
        }
    }

    fn student(id: &str, grade: u8, house: House, records: Vec<StudentRecord>) -> Student {
        let total = INITIAL_POINTS + records.iter().map(|r| r.points).sum::<i64>();
        Student {
            id: id.into(),
            first_name: id.to_uppercase(),
            last_name: String::new(),
            grade,
            class_group: class_group(grade, "Amanah"),
            house,
            total_points: total,
            avatar: String::new(),
            records,
        }
    }

    fn roster() -> Vec<Student> {
        vec![
            student(
                "a",
                1,
                House::Red,
                vec![
                    rec(RecordType::Merit, Some("Academic"), 10),
                    rec(RecordType::Demerit, None, -3),
                ],
            ),
            student("b", 2, House::Blue, vec![rec(RecordType::Merit, Some("bogus"), 4)]),
            student("c", 2, House::Red, vec![rec(RecordType::Merit, None, 6)]),
            student("d", 3, House::Green, vec![rec(RecordType::Demerit, None, -8)]),
            student("e", 1, House::Yellow, vec![rec(RecordType::Merit, Some("3K"), 1)]),
            student("f", 3, House::Blue, vec![]),
        ]
    }

    #[test]
    fn empty_roster_is_all_zero() {
        let stats = dashboard(&[], &Scope::All, &HouseBaselines::new(), 5);
        assert!(stats.no_data);
        assert_eq!((stats.total_merits, stats.total_demerits), (0, 0));
        assert!(stats.houses.values().all(|t| *t == PointTotals::default()));
        assert!(stats.categories.values().all(|v| *v == 0));
        assert!(stats.grades.is_empty());
        assert!(stats.top.is_empty() && stats.bottom.is_empty());
    }

    #[test]
    fn extreme_imported_points_saturate_instead_of_panicking() {
        let mut s = student("x", 1, House::Red, vec![]);
        s.records = vec![
            rec(RecordType::Demerit, None, i64::MIN),
            rec(RecordType::Demerit, None, i64::MIN),
            rec(RecordType::Merit, Some("Academic"), i64::MAX),
            rec(RecordType::Merit, Some("Academic"), i64::MAX),
        ];
        s.total_points = i64::MIN;
        let mut baselines = HouseBaselines::new();
        baselines.insert(House::Red, HouseBaseline { merits: u64::MAX, demerits: 1 });
        baselines.insert(House::Blue, HouseBaseline { merits: 1, demerits: 0 });

        let stats = dashboard(&[s], &Scope::All, &baselines, 5);
        assert_eq!(stats.houses[&House::Red], PointTotals { merit: i64::MAX, demerit: i64::MAX });
        assert_eq!(stats.categories[&MeritCategory::Academic], i64::MAX);
        assert_eq!(stats.total_merits, u64::MAX);
        assert_eq!(house_standings(&stats).len(), 4);
    }

    #[test]
    fn sums_use_absolute_values_per_bucket() {
        let stats = dashboard(&roster(), &Scope::All, &HouseBaselines::new(), 5);
        assert!(!stats.no_data);
        assert_eq!(stats.total_merits, 4);
        assert_eq!(stats.total_demerits, 2);
        assert_eq!(stats.houses[&House::Red], PointTotals { merit: 16, demerit: 3 });
        assert_eq!(stats.houses[&House::Green], PointTotals { merit: 0, demerit: 8 });
        assert_eq!(stats.grades[&2], PointTotals { merit: 10, demerit: 0 });
        assert_eq!(stats.grades[&3], PointTotals { merit: 0, demerit: 8 });
        assert_eq!(stats.categories[&MeritCategory::Academic], 10);
        // "bogus" and missing categories both land in Personality.
        assert_eq!(stats.categories[&MeritCategory::Personality], 10);
        assert_eq!(stats.categories[&MeritCategory::ThreeK], 1);
        assert_eq!(stats.categories[&MeritCategory::CoCurricular], 0);
    }

    #[test]
    fn baselines_are_added_once() {
        let mut baselines = HouseBaselines::new();
        baselines.insert(House::Red, HouseBaseline { merits: 20, demerits: 5 });
        let students = roster();
        let first = dashboard(&students, &Scope::All, &baselines, 5);
        let second = dashboard(&students, &Scope::All, &baselines, 5);
        assert_eq!(first.total_merits, 24);
        assert_eq!(first.total_demerits, 7);
        assert_eq!(first, second);
    }

    #[test]
    fn shuffled_roster_aggregates_identically() {
        let students = roster();
        let mut shuffled = students.clone();
        shuffled.reverse();
        shuffled.swap(0, 3);
        let a = dashboard(&students, &Scope::All, &HouseBaselines::new(), 5);
        let b = dashboard(&shuffled, &Scope::All, &HouseBaselines::new(), 5);
        assert_eq!(a.houses, b.houses);
        assert_eq!(a.grades, b.grades);
        assert_eq!(a.categories, b.categories);
        let ids = |v: &[RankedStudent]| {
            let mut ids: Vec<String> = v.iter().map(|r| r.id.clone()).collect();
            ids.sort();
            ids
        };
        assert_eq!(ids(&a.top), ids(&b.top));
        assert_eq!(ids(&a.bottom), ids(&b.bottom));
    }

    #[test]
    fn ranking_respects_scope_and_ties() {
        let students = roster();
        let (top, bottom) = rank(&students, &Scope::All, 3);
        assert_eq!(
            top.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "c", "b"]
        );
        assert_eq!(bottom[0].id, "d");

        let (top, _) = rank(&students, &Scope::Grade(2), 5);
        assert_eq!(top.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["c", "b"]);

        let (top, _) = rank(&students, &Scope::House(House::Blue), 5);
        assert_eq!(top.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["b", "f"]);

        let (top, _) = rank(&students, &Scope::ClassGroup("9 Amanah".into()), 5);
        assert!(top.is_empty());
    }

    #[test]
    fn equal_points_keep_roster_order() {
        let students = vec![
            student("x", 1, House::Red, vec![]),
            student("y", 1, House::Red, vec![]),
            student("z", 1, House::Red, vec![]),
        ];
        let (top, bottom) = rank(&students, &Scope::All, 2);
        assert_eq!(top.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(bottom.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["x", "y"]);
    }

    #[test]
    fn house_standings_order_by_net() {
        let stats = dashboard(&roster(), &Scope::All, &HouseBaselines::new(), 5);
        let order: Vec<House> = house_standings(&stats).iter().map(|r| r.house).collect();
        assert_eq!(order, vec![House::Red, House::Blue, House::Yellow, House::Green]);
    }

    #[test]
    fn scope_parsing() {
        assert_eq!(Scope::parse(None), Ok(Scope::All));
        assert_eq!(
            Scope::parse(Some(&serde_json::json!({"kind": "grade", "value": 3}))),
            Ok(Scope::Grade(3))
        );
        assert_eq!(
            Scope::parse(Some(&serde_json::json!({"kind": "house", "value": "green"}))),
            Ok(Scope::House(House::Green))
        );
        assert!(Scope::parse(Some(&serde_json::json!({"kind": "planet"}))).is_err());
    }

    #[test]
    fn filter_matches_name_and_sorts() {
        let students = roster();
        let filter = StudentFilter {
            grade: Some(2),
            sort: StudentSort::PointsAsc,
            ..Default::default()
        };
        let ids: Vec<&str> = filter_students(&students, &filter)
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);

        let filter = StudentFilter {
            query: Some(" D ".into()),
            ..Default::default()
        };
        assert_eq!(filter_students(&students, &filter).len(), 1);
    }
}
