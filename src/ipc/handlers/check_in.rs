use crate::attendance::{
    classify, sort_classrooms_for_report, summarize_student, BucketCounts, CheckInSets,
};
use crate::dates::{self, DayRange};
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::handlers::roster::{
    self, classroom_from_row, require_classroom, require_teacher, teacher_profile, ClassroomRow,
    CLASSROOM_SELECT,
};
use crate::ipc::helpers::{db_conn, decode_ids, encode_ids, parse_params, respond};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRecord {
    pub id: String,
    pub teacher_id: String,
    pub classroom_id: String,
    pub check_in_date: String,
    #[serde(flatten)]
    pub sets: CheckInSets,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

const RECORD_SELECT: &str = "SELECT id, teacher_id, classroom_id, check_in_date,
       present, absent, late, leave,
       created_by, updated_by, created_at, updated_at
     FROM check_in_reports";

fn record_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<CheckInRecord> {
    let present: String = r.get(4)?;
    let absent: String = r.get(5)?;
    let late: String = r.get(6)?;
    let leave: String = r.get(7)?;
    Ok(CheckInRecord {
        id: r.get(0)?,
        teacher_id: r.get(1)?,
        classroom_id: r.get(2)?,
        check_in_date: r.get(3)?,
        sets: CheckInSets {
            present: decode_ids(4, &present)?,
            absent: decode_ids(5, &absent)?,
            late: decode_ids(6, &late)?,
            leave: decode_ids(7, &leave)?,
        },
        created_by: r.get(8)?,
        updated_by: r.get(9)?,
        created_at: r.get(10)?,
        updated_at: r.get(11)?,
    })
}

fn record_by_id(conn: &Connection, id: &str) -> ServiceResult<CheckInRecord> {
    let sql = format!("{} WHERE id = ?", RECORD_SELECT);
    conn.query_row(&sql, [id], record_from_row)
        .optional()?
        .ok_or_else(|| ServiceError::not_found(format!("check-in record not found: {}", id)))
}

/// First record for the teacher/classroom pair inside the range.
fn record_for_teacher(
    conn: &Connection,
    teacher_id: &str,
    classroom_id: &str,
    range: &DayRange,
) -> ServiceResult<Option<CheckInRecord>> {
    let sql = format!(
        "{} WHERE teacher_id = ? AND classroom_id = ?
           AND check_in_date >= ? AND check_in_date <= ?
         ORDER BY created_at, rowid
         LIMIT 1",
        RECORD_SELECT
    );
    Ok(conn
        .query_row(
            &sql,
            (teacher_id, classroom_id, &range.start, &range.end),
            record_from_row,
        )
        .optional()?)
}

/// First record for the classroom inside the range, whoever took it.
fn record_for_classroom(
    conn: &Connection,
    classroom_id: &str,
    range: &DayRange,
) -> ServiceResult<Option<CheckInRecord>> {
    let sql = format!(
        "{} WHERE classroom_id = ? AND check_in_date >= ? AND check_in_date <= ?
         ORDER BY created_at, rowid
         LIMIT 1",
        RECORD_SELECT
    );
    Ok(conn
        .query_row(&sql, (classroom_id, &range.start, &range.end), record_from_row)
        .optional()?)
}

fn teacher_classrooms(conn: &Connection, teacher_id: &str) -> ServiceResult<Vec<ClassroomRow>> {
    let sql = format!(
        "{} JOIN teacher_classrooms tc ON tc.classroom_id = c.id
         WHERE tc.teacher_id = ?
         ORDER BY p.name, c.name",
        CLASSROOM_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([teacher_id], classroom_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    teacher_id: String,
    classroom_id: String,
    date: Option<String>,
    #[serde(flatten)]
    sets: CheckInSets,
    created_by: Option<String>,
}

fn check_in_create(conn: &Connection, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: CreateParams = parse_params(params)?;
    require_teacher(conn, &p.teacher_id)?;
    require_classroom(conn, &p.classroom_id)?;
    let now = dates::now_timestamp();
    let check_in_date = match p.date.as_deref() {
        Some(raw) => dates::day_timestamp(dates::parse_day(raw)?),
        None => now.clone(),
    };
    let created_by = p.created_by.unwrap_or_else(|| p.teacher_id.clone());

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO check_in_reports(
            id, teacher_id, classroom_id, check_in_date,
            present, absent, late, leave, created_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &p.teacher_id,
            &p.classroom_id,
            &check_in_date,
            encode_ids(&p.sets.present),
            encode_ids(&p.sets.absent),
            encode_ids(&p.sets.late),
            encode_ids(&p.sets.leave),
            &created_by,
            &now,
        ),
    )
    .map_err(ServiceError::storage_in("check_in_reports"))?;
    tracing::info!(
        check_in_id = %id,
        teacher_id = %p.teacher_id,
        classroom_id = %p.classroom_id,
        "check-in recorded"
    );
    Ok(json!(record_by_id(conn, &id)?))
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

/// A missing record reads as an empty object rather than an error.
fn check_in_get(conn: &Connection, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: IdParams = parse_params(params)?;
    match record_by_id(conn, &p.id) {
        Ok(record) => Ok(json!(record)),
        Err(e) if e.is_not_found() => Ok(json!({})),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeacherDailyParams {
    teacher_id: String,
    classroom_id: Option<String>,
    date: String,
}

fn check_in_teacher_daily(
    conn: &Connection,
    params: &serde_json::Value,
) -> ServiceResult<serde_json::Value> {
    let p: TeacherDailyParams = parse_params(params)?;
    let day = dates::parse_day(&p.date)?;
    let range = DayRange::of(day);
    let teacher = require_teacher(conn, &p.teacher_id)?;

    let classrooms = match p.classroom_id.as_deref() {
        Some(id) => vec![require_classroom(conn, id)?],
        None => teacher_classrooms(conn, &teacher.id)?,
    };

    let mut out = Vec::with_capacity(classrooms.len());
    for c in classrooms {
        let record = record_for_teacher(conn, &teacher.id, &c.id, &range)?;
        let students: Vec<serde_json::Value> = roster::roster(conn, &c.id)?
            .into_iter()
            .map(|s| {
                let status = classify(&s.id, record.as_ref().map(|r| &r.sets));
                let mut v = json!(s);
                v["checkInStatus"] = json!(status);
                v["teacher"] = json!(teacher);
                v
            })
            .collect();
        let mut v = json!(c);
        v["checkIn"] = json!(record);
        v["students"] = json!(students);
        out.push(v);
    }

    Ok(json!({
        "teacher": teacher,
        "date": day.to_string(),
        "classrooms": out
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeacherSummaryParams {
    teacher_id: String,
    classroom_id: String,
}

fn check_in_teacher_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> ServiceResult<serde_json::Value> {
    let p: TeacherSummaryParams = parse_params(params)?;
    let teacher = require_teacher(conn, &p.teacher_id)?;
    let classroom = require_classroom(conn, &p.classroom_id)?;

    let sql = format!(
        "{} WHERE teacher_id = ? AND classroom_id = ? ORDER BY check_in_date, created_at",
        RECORD_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let records: Vec<CheckInSets> = stmt
        .query_map((&teacher.id, &classroom.id), record_from_row)?
        .map(|r| r.map(|rec| rec.sets))
        .collect::<Result<Vec<_>, _>>()?;

    let students: Vec<serde_json::Value> = roster::roster(conn, &classroom.id)?
        .into_iter()
        .map(|s| {
            let summary = summarize_student(&s.id, &records);
            let mut v = json!(s);
            v["summary"] = json!(summary);
            v
        })
        .collect();

    Ok(json!({
        "teacher": teacher,
        "classroom": classroom,
        "totalRecords": records.len(),
        "students": students
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminDailyParams {
    start_date: String,
    end_date: Option<String>,
}

fn check_in_admin_daily(
    conn: &Connection,
    params: &serde_json::Value,
) -> ServiceResult<serde_json::Value> {
    let p: AdminDailyParams = parse_params(params)?;
    let start = dates::parse_day(&p.start_date)?;
    let end = match p.end_date.as_deref() {
        Some(raw) => dates::parse_day(raw)?,
        None => start,
    };
    if end < start {
        return Err(ServiceError::bad_params_with(
            "endDate must not be before startDate",
            json!({ "startDate": start.to_string(), "endDate": end.to_string() }),
        ));
    }
    let range = DayRange::spanning(start, end);

    let mut stmt = conn.prepare(CLASSROOM_SELECT)?;
    let mut classrooms = stmt
        .query_map([], classroom_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    sort_classrooms_for_report(
        &mut classrooms,
        |c| c.name.as_str(),
        |c| c.department_name.as_deref().unwrap_or(""),
    );

    let total_students: i64 = conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;

    let mut out = Vec::with_capacity(classrooms.len());
    for c in classrooms {
        let record = record_for_classroom(conn, &c.id, &range)?;
        let checked_in_by = match record.as_ref().and_then(|r| r.created_by.as_deref()) {
            Some(user_id) => teacher_profile(conn, user_id)?,
            None => None,
        };
        let counts = record
            .as_ref()
            .map(|r| BucketCounts::of_record(&r.sets))
            .unwrap_or_default();
        let mut v = json!(c);
        v["checkInId"] = json!(record.as_ref().map(|r| r.id.clone()));
        v["checkedInBy"] = json!(checked_in_by);
        v["attendance"] = json!(counts.breakdown());
        out.push(v);
    }

    tracing::debug!(classrooms = out.len(), "admin daily report built");
    Ok(json!({
        "startDate": start.to_string(),
        "endDate": end.to_string(),
        "totalStudents": total_students,
        "classrooms": out
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    id: String,
    #[serde(flatten)]
    sets: CheckInSets,
    updated_by: Option<String>,
}

/// Replaces all four id sets; nothing is merged.
fn check_in_update(conn: &Connection, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: UpdateParams = parse_params(params)?;
    let changed = conn
        .execute(
            "UPDATE check_in_reports
             SET present = ?, absent = ?, late = ?, leave = ?,
                 updated_by = ?, updated_at = ?
             WHERE id = ?",
            (
                encode_ids(&p.sets.present),
                encode_ids(&p.sets.absent),
                encode_ids(&p.sets.late),
                encode_ids(&p.sets.leave),
                &p.updated_by,
                dates::now_timestamp(),
                &p.id,
            ),
        )
        .map_err(ServiceError::storage_in("check_in_reports"))?;
    if changed == 0 {
        return Err(ServiceError::not_found(format!(
            "check-in record not found: {}",
            p.id
        )));
    }
    tracing::info!(check_in_id = %p.id, "check-in corrected");
    Ok(json!(record_by_id(conn, &p.id)?))
}

fn check_in_delete(conn: &Connection, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: IdParams = parse_params(params)?;
    let changed = conn
        .execute("DELETE FROM check_in_reports WHERE id = ?", [&p.id])
        .map_err(ServiceError::storage_in("check_in_reports"))?;
    if changed == 0 {
        return Err(ServiceError::not_found(format!(
            "check-in record not found: {}",
            p.id
        )));
    }
    tracing::info!(check_in_id = %p.id, "check-in deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: fn(&Connection, &serde_json::Value) -> ServiceResult<serde_json::Value> =
        match req.method.as_str() {
            "checkIn.create" => check_in_create,
            "checkIn.get" => check_in_get,
            "checkIn.teacherDaily" => check_in_teacher_daily,
            "checkIn.teacherSummary" => check_in_teacher_summary,
            "checkIn.adminDaily" => check_in_admin_daily,
            "checkIn.update" => check_in_update,
            "checkIn.delete" => check_in_delete,
            _ => return None,
        };
    Some(respond(req, db_conn(state).and_then(|c| op(c, &req.params))))
}
