use crate::model::{House, RecordType, Student, StudentRecord};
use std::collections::HashMap;

pub const FALLBACK_SUMMARY: &str =
    "A behaviour summary is not available right now. Please review the record history directly.";

const RECENT_WINDOW: usize = 10;

/// Everything a summarizer is allowed to see about a student.
#[derive(Debug, Clone)]
pub struct SummaryRequest<'a> {
    pub student_id: &'a str,
    pub name: String,
    pub grade: u8,
    pub house: House,
    pub total_points: i64,
    pub records: &'a [StudentRecord],
}

impl<'a> SummaryRequest<'a> {
    pub fn for_student(s: &'a Student) -> Self {
        Self {
            student_id: &s.id,
            name: s.display_name(),
            grade: s.grade,
            house: s.house,
            total_points: s.total_points,
            records: &s.records,
        }
    }
}

pub trait SummaryProvider {
    fn summarize(&self, req: &SummaryRequest<'_>) -> anyhow::Result<String>;
}

/// Never fails: provider errors are logged and replaced with the fallback text.
pub fn summarize_or_fallback(provider: &dyn SummaryProvider, req: &SummaryRequest<'_>) -> (String, bool) {
    match provider.summarize(req) {
        Ok(text) if !text.trim().is_empty() => (text.trim().to_string(), false),
        Ok(_) => {
            tracing::warn!(student_id = req.student_id, "summary provider returned nothing");
            (FALLBACK_SUMMARY.to_string(), true)
        }
        Err(e) => {
            tracing::warn!(student_id = req.student_id, error = %format!("{e:#}"), "summary provider failed");
            (FALLBACK_SUMMARY.to_string(), true)
        }
    }
}

/// Offline summarizer built from the record history.
#[derive(Debug, Default)]
pub struct HistorySummary;

fn most_common<'r>(records: impl Iterator<Item = &'r StudentRecord>) -> Option<(&'r str, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for r in records {
        let c = counts.entry(r.reason.as_str()).or_insert(0);
        if *c == 0 {
            order.push(r.reason.as_str());
        }
        *c += 1;
    }
    // First-seen wins ties, so newer reasons lead.
    order
        .into_iter()
        .map(|reason| (reason, counts[reason]))
        .fold(None, |best: Option<(&str, usize)>, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        })
}

impl SummaryProvider for HistorySummary {
    fn summarize(&self, req: &SummaryRequest<'_>) -> anyhow::Result<String> {
        let merits: Vec<&StudentRecord> = req
            .records
            .iter()
            .filter(|r| r.kind == RecordType::Merit)
            .collect();
        let demerits: Vec<&StudentRecord> = req
            .records
            .iter()
            .filter(|r| r.kind == RecordType::Demerit)
            .collect();

        let mut parts = vec![format!(
            "{} (Form {}, {} House) currently holds {} points.",
            req.name, req.grade, req.house, req.total_points
        )];
        if req.records.is_empty() {
            parts.push("No merit or demerit records have been logged yet.".to_string());
            return Ok(parts.join(" "));
        }
        parts.push(format!(
            "The history shows {} merit and {} demerit record{}.",
            merits.len(),
            demerits.len(),
            if demerits.len() == 1 { "" } else { "s" }
        ));
        if let Some((reason, n)) = most_common(merits.iter().copied()) {
            parts.push(format!("Most often recognised for \"{}\" ({}x).", reason, n));
        }
        if let Some((reason, n)) = most_common(demerits.iter().copied()) {
            parts.push(format!("Most frequent concern: \"{}\" ({}x).", reason, n));
        }
        let recent: i128 = req.records.iter().take(RECENT_WINDOW).map(|r| i128::from(r.points)).sum();
        let trend = match recent {
            n if n > 0 => "positive",
            n if n < 0 => "a concern and worth a follow-up conversation",
            _ => "steady",
        };
        parts.push(format!("Recent behaviour is {}.", trend));
        Ok(parts.join(" "))
    }
}
