use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckInStatus {
    Present,
    Absent,
    Late,
    Leave,
    None,
    NotCheckIn,
}

/// The four disjoint id sets of one daily check-in record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInSets {
    #[serde(default)]
    pub present: Vec<String>,
    #[serde(default)]
    pub absent: Vec<String>,
    #[serde(default)]
    pub late: Vec<String>,
    #[serde(default)]
    pub leave: Vec<String>,
}

/// Activity check-ins only track presence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySets {
    #[serde(default)]
    pub present: Vec<String>,
    #[serde(default)]
    pub absent: Vec<String>,
}

fn contains(ids: &[String], student_id: &str) -> bool {
    ids.iter().any(|id| id == student_id)
}

/// First match wins in the order present, absent, late, leave. Without a
/// record every student is `NotCheckIn`.
pub fn classify(student_id: &str, record: Option<&CheckInSets>) -> CheckInStatus {
    let Some(sets) = record else {
        return CheckInStatus::NotCheckIn;
    };
    if contains(&sets.present, student_id) {
        CheckInStatus::Present
    } else if contains(&sets.absent, student_id) {
        CheckInStatus::Absent
    } else if contains(&sets.late, student_id) {
        CheckInStatus::Late
    } else if contains(&sets.leave, student_id) {
        CheckInStatus::Leave
    } else {
        CheckInStatus::None
    }
}

pub fn classify_activity(student_id: &str, record: Option<&ActivitySets>) -> CheckInStatus {
    let Some(sets) = record else {
        return CheckInStatus::NotCheckIn;
    };
    if contains(&sets.present, student_id) {
        CheckInStatus::Present
    } else if contains(&sets.absent, student_id) {
        CheckInStatus::Absent
    } else {
        CheckInStatus::None
    }
}

/// Two-decimal rounding used for every percentage in reports.
pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// `count / total * 100`, rounded; an empty denominator yields 0.
pub fn percent_of(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_2_decimals(count as f64 / total as f64 * 100.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketCounts {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub leave: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketBreakdown {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub leave: usize,
    pub total: usize,
    pub present_percent: f64,
    pub absent_percent: f64,
    pub late_percent: f64,
    pub leave_percent: f64,
}

impl BucketCounts {
    pub fn of_record(sets: &CheckInSets) -> Self {
        Self {
            present: sets.present.len(),
            absent: sets.absent.len(),
            late: sets.late.len(),
            leave: sets.leave.len(),
        }
    }

    pub fn total(&self) -> usize {
        self.present + self.absent + self.late + self.leave
    }

    /// Percentages are taken against the bucket total, not the roster size.
    pub fn breakdown(&self) -> BucketBreakdown {
        let total = self.total();
        BucketBreakdown {
            present: self.present,
            absent: self.absent,
            late: self.late,
            leave: self.leave,
            total,
            present_percent: percent_of(self.present, total),
            absent_percent: percent_of(self.absent, total),
            late_percent: percent_of(self.late, total),
            leave_percent: percent_of(self.leave, total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendanceSummary {
    pub total_records: usize,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub leave: usize,
    pub present_percent: f64,
    pub absent_percent: f64,
    pub late_percent: f64,
    pub leave_percent: f64,
}

/// Counts how many records list the student in each set. A student listed
/// twice in one record counts once per set it appears in.
pub fn summarize_student(student_id: &str, records: &[CheckInSets]) -> StudentAttendanceSummary {
    let mut counts = BucketCounts::default();
    for r in records {
        if contains(&r.present, student_id) {
            counts.present += 1;
        }
        if contains(&r.absent, student_id) {
            counts.absent += 1;
        }
        if contains(&r.late, student_id) {
            counts.late += 1;
        }
        if contains(&r.leave, student_id) {
            counts.leave += 1;
        }
    }
    let total_records = records.len();
    StudentAttendanceSummary {
        total_records,
        present: counts.present,
        absent: counts.absent,
        late: counts.late,
        leave: counts.leave,
        present_percent: percent_of(counts.present, total_records),
        absent_percent: percent_of(counts.absent, total_records),
        late_percent: percent_of(counts.late, total_records),
        leave_percent: percent_of(counts.leave, total_records),
    }
}

/// Sort key for classroom names shaped like `<prefix><major>/<minor>-<suffix>`.
/// Names that do not fit the shape sort by their full text as the prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClassroomNameKey {
    prefix: String,
    major: u64,
    minor: u64,
    suffix: String,
}

impl ClassroomNameKey {
    pub fn parse(name: &str) -> Self {
        parse_classroom_name(name).unwrap_or_else(|| ClassroomNameKey {
            prefix: name.to_string(),
            major: 0,
            minor: 0,
            suffix: String::new(),
        })
    }
}

fn parse_classroom_name(name: &str) -> Option<ClassroomNameKey> {
    let digits_at = name.find(|c: char| c.is_ascii_digit())?;
    if digits_at == 0 {
        return None;
    }
    let (prefix, rest) = name.split_at(digits_at);
    let (major_raw, rest) = take_digits(rest)?;
    let rest = rest.strip_prefix('/')?;
    let (minor_raw, rest) = take_digits(rest)?;
    let suffix = rest.strip_prefix('-')?;
    Some(ClassroomNameKey {
        prefix: prefix.to_string(),
        major: major_raw.parse().ok()?,
        minor: minor_raw.parse().ok()?,
        suffix: suffix.to_string(),
    })
}

fn take_digits(s: &str) -> Option<(&str, &str)> {
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    Some(s.split_at(end))
}

pub fn compare_classroom_names(a: &str, b: &str) -> Ordering {
    ClassroomNameKey::parse(a)
        .cmp(&ClassroomNameKey::parse(b))
        .then_with(|| a.cmp(b))
}

/// Natural order by name, then a stable pass by department so department
/// dominates and the natural order breaks ties inside it.
pub fn sort_classrooms_for_report<T>(
    items: &mut [T],
    name: impl Fn(&T) -> &str,
    department: impl Fn(&T) -> &str,
) {
    items.sort_by(|a, b| compare_classroom_names(name(a), name(b)));
    items.sort_by(|a, b| department(a).cmp(department(b)));
}
