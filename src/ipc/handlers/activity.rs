use crate::attendance::{classify_activity, percent_of, ActivitySets};
use crate::dates::{self, DayRange};
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::handlers::roster::{self, require_classroom, require_teacher};
use crate::ipc::helpers::{db_conn, decode_ids, encode_ids, parse_params, respond};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityCheckIn {
    pub id: String,
    pub teacher_id: String,
    pub classroom_id: String,
    pub check_in_date: String,
    #[serde(flatten)]
    pub sets: ActivitySets,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

const ACTIVITY_SELECT: &str = "SELECT id, teacher_id, classroom_id, check_in_date,
       present, absent, created_by, updated_by, created_at, updated_at
     FROM activity_check_ins";

fn activity_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityCheckIn> {
    let present: String = r.get(4)?;
    let absent: String = r.get(5)?;
    Ok(ActivityCheckIn {
        id: r.get(0)?,
        teacher_id: r.get(1)?,
        classroom_id: r.get(2)?,
        check_in_date: r.get(3)?,
        sets: ActivitySets {
            present: decode_ids(4, &present)?,
            absent: decode_ids(5, &absent)?,
        },
        created_by: r.get(6)?,
        updated_by: r.get(7)?,
        created_at: r.get(8)?,
        updated_at: r.get(9)?,
    })
}

fn activity_by_id(conn: &Connection, id: &str) -> ServiceResult<ActivityCheckIn> {
    let sql = format!("{} WHERE id = ?", ACTIVITY_SELECT);
    conn.query_row(&sql, [id], activity_from_row)
        .optional()?
        .ok_or_else(|| ServiceError::not_found(format!("activity check-in not found: {}", id)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    teacher_id: String,
    classroom_id: String,
    date: Option<String>,
    #[serde(flatten)]
    sets: ActivitySets,
    created_by: Option<String>,
}

fn activity_create(conn: &Connection, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
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
        "INSERT INTO activity_check_ins(
            id, teacher_id, classroom_id, check_in_date,
            present, absent, created_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &p.teacher_id,
            &p.classroom_id,
            &check_in_date,
            encode_ids(&p.sets.present),
            encode_ids(&p.sets.absent),
            &created_by,
            &now,
        ),
    )
    .map_err(ServiceError::storage_in("activity_check_ins"))?;
    tracing::info!(activity_id = %id, classroom_id = %p.classroom_id, "activity check-in recorded");
    Ok(json!(activity_by_id(conn, &id)?))
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

fn activity_get(conn: &Connection, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: IdParams = parse_params(params)?;
    match activity_by_id(conn, &p.id) {
        Ok(record) => Ok(json!(record)),
        Err(e) if e.is_not_found() => Ok(json!({})),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeacherDailyParams {
    teacher_id: String,
    classroom_id: String,
    date: String,
}

fn activity_teacher_daily(
    conn: &Connection,
    params: &serde_json::Value,
) -> ServiceResult<serde_json::Value> {
    let p: TeacherDailyParams = parse_params(params)?;
    let day = dates::parse_day(&p.date)?;
    let range = DayRange::of(day);
    let teacher = require_teacher(conn, &p.teacher_id)?;
    let classroom = require_classroom(conn, &p.classroom_id)?;

    let sql = format!(
        "{} WHERE teacher_id = ? AND classroom_id = ?
           AND check_in_date >= ? AND check_in_date <= ?
         ORDER BY created_at, rowid
         LIMIT 1",
        ACTIVITY_SELECT
    );
    let record = conn
        .query_row(
            &sql,
            (&teacher.id, &classroom.id, &range.start, &range.end),
            activity_from_row,
        )
        .optional()?;

    let students: Vec<serde_json::Value> = roster::roster(conn, &classroom.id)?
        .into_iter()
        .map(|s| {
            let status = classify_activity(&s.id, record.as_ref().map(|r| &r.sets));
            let mut v = json!(s);
            v["checkInStatus"] = json!(status);
            v
        })
        .collect();

    let (present, absent) = record
        .as_ref()
        .map(|r| (r.sets.present.len(), r.sets.absent.len()))
        .unwrap_or((0, 0));
    let total = present + absent;

    Ok(json!({
        "teacher": teacher,
        "classroom": classroom,
        "date": day.to_string(),
        "checkIn": record,
        "present": present,
        "absent": absent,
        "presentPercent": percent_of(present, total),
        "absentPercent": percent_of(absent, total),
        "students": students
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    id: String,
    #[serde(flatten)]
    sets: ActivitySets,
    updated_by: Option<String>,
}

fn activity_update(conn: &Connection, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: UpdateParams = parse_params(params)?;
    let changed = conn
        .execute(
            "UPDATE activity_check_ins
             SET present = ?, absent = ?, updated_by = ?, updated_at = ?
             WHERE id = ?",
            (
                encode_ids(&p.sets.present),
                encode_ids(&p.sets.absent),
                &p.updated_by,
                dates::now_timestamp(),
                &p.id,
            ),
        )
        .map_err(ServiceError::storage_in("activity_check_ins"))?;
    if changed == 0 {
        return Err(ServiceError::not_found(format!(
            "activity check-in not found: {}",
            p.id
        )));
    }
    Ok(json!(activity_by_id(conn, &p.id)?))
}

fn activity_delete(conn: &Connection, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: IdParams = parse_params(params)?;
    let changed = conn
        .execute("DELETE FROM activity_check_ins WHERE id = ?", [&p.id])
        .map_err(ServiceError::storage_in("activity_check_ins"))?;
    if changed == 0 {
        return Err(ServiceError::not_found(format!(
            "activity check-in not found: {}",
            p.id
        )));
    }
    tracing::info!(activity_id = %p.id, "activity check-in deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: fn(&Connection, &serde_json::Value) -> ServiceResult<serde_json::Value> =
        match req.method.as_str() {
            "activityCheckIn.create" => activity_create,
            "activityCheckIn.get" => activity_get,
            "activityCheckIn.teacherDaily" => activity_teacher_daily,
            "activityCheckIn.update" => activity_update,
            "activityCheckIn.delete" => activity_delete,
            _ => return None,
        };
    Some(respond(req, db_conn(state).and_then(|c| op(c, &req.params))))
}
