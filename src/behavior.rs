use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorKind {
    Goodness,
    Badness,
}

impl BehaviorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BehaviorKind::Goodness => "goodness",
            BehaviorKind::Badness => "badness",
        }
    }

    /// Object-store prefix for evidence photos.
    pub fn object_prefix(self) -> &'static str {
        self.as_str()
    }

    /// Splits `goodness.search` into the kind and `search`.
    pub fn split_method(method: &str) -> Option<(Self, &str)> {
        let (family, action) = method.split_once('.')?;
        let kind = match family {
            "goodness" => BehaviorKind::Goodness,
            "badness" => BehaviorKind::Badness,
            _ => return None,
        };
        Some((kind, action))
    }
}

/// One behavior entry joined with its student's display data.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRow {
    pub id: String,
    pub student_code: String,
    pub student_key: String,
    pub first_name: String,
    pub last_name: String,
    pub classroom_name: String,
    pub score: i64,
    pub detail: String,
    pub date: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryInfo {
    pub id: String,
    pub detail: String,
    pub score: i64,
    pub date: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStudentScore {
    pub id: String,
    pub student_id: String,
    pub total_score: i64,
    pub full_name: String,
    pub classroom_name: String,
    pub running_number: i64,
    pub info: Vec<EntryInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorePage {
    pub total: usize,
    pub data: Vec<AggregatedStudentScore>,
}

/// Groups entries by student in first-seen order. Display names come from the
/// first entry seen for each student. Totals saturate at the `i64` bounds.
pub fn group_by_student(entries: &[EntryRow]) -> Vec<AggregatedStudentScore> {
    let mut out: Vec<AggregatedStudentScore> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for e in entries {
        let info = EntryInfo {
            id: e.id.clone(),
            detail: e.detail.clone(),
            score: e.score,
            date: e.date.clone(),
            image: e.image.clone(),
        };
        match index.get(e.student_key.as_str()) {
            Some(&i) => {
                out[i].total_score = out[i].total_score.saturating_add(e.score);
                out[i].info.push(info);
            }
            None => {
                index.insert(e.student_key.as_str(), out.len());
                out.push(AggregatedStudentScore {
                    id: e.student_key.clone(),
                    student_id: e.student_code.clone(),
                    total_score: e.score,
                    full_name: format!("{} {}", e.first_name, e.last_name)
                        .trim()
                        .to_string(),
                    classroom_name: e.classroom_name.clone(),
                    running_number: 0,
                    info: vec![info],
                });
            }
        }
    }
    out
}

/// Sorts by total score descending (ties keep first-seen order), then windows
/// with `skip`/`take`. Running numbers continue from `skip`.
pub fn rank_and_window(
    mut aggregates: Vec<AggregatedStudentScore>,
    skip: usize,
    take: usize,
) -> ScorePage {
    aggregates.sort_by(|a, b| b.total_score.cmp(&a.total_score));
    let total = aggregates.len();
    let data = aggregates
        .into_iter()
        .skip(skip)
        .take(take)
        .enumerate()
        .map(|(i, mut a)| {
            a.running_number = (skip + i + 1) as i64;
            a
        })
        .collect();
    ScorePage { total, data }
}

pub fn summarize(entries: &[EntryRow], skip: usize, take: usize) -> ScorePage {
    rank_and_window(group_by_student(entries), skip, take)
}

/// `"first last"` becomes `(first, Some(last))`; a single token is matched
/// against either name.
pub fn split_full_name(raw: &str) -> Option<(String, Option<String>)> {
    let mut parts = raw.split_whitespace();
    let first = parts.next()?.to_string();
    let rest: Vec<&str> = parts.collect();
    if rest.is_empty() {
        Some((first, None))
    } else {
        Some((first, Some(rest.join(" "))))
    }
}
