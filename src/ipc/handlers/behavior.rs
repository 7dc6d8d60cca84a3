use crate::behavior::{self, split_full_name, BehaviorKind, EntryRow};
use crate::dates::{self, DayRange};
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::handlers::roster::{self, require_classroom, StudentRow};
use crate::ipc::helpers::{db_conn, object_store, parse_params, respond, PageParams};
use crate::ipc::types::{AppState, Request};
use crate::objects::{decode_image_payload, ObjectStore, StoredObject};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

struct BehaviorCtx<'a> {
    conn: &'a Connection,
    objects: &'a dyn ObjectStore,
    kind: BehaviorKind,
    default_take: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorEntry {
    pub id: String,
    pub kind: String,
    pub student_id: String,
    pub student_key: String,
    pub classroom_id: String,
    pub score: i64,
    pub detail: String,
    pub date: Option<String>,
    pub image: Option<String>,
    pub created_at: String,
}

const ENTRY_SELECT: &str = "SELECT id, kind, student_code, student_key, classroom_id,
       score, detail, entry_date, image, created_at
     FROM behavior_entries";

fn entry_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<BehaviorEntry> {
    Ok(BehaviorEntry {
        id: r.get(0)?,
        kind: r.get(1)?,
        student_id: r.get(2)?,
        student_key: r.get(3)?,
        classroom_id: r.get(4)?,
        score: r.get(5)?,
        detail: r.get(6)?,
        date: r.get(7)?,
        image: r.get(8)?,
        created_at: r.get(9)?,
    })
}

fn entry_by_id(ctx: &BehaviorCtx<'_>, id: &str) -> ServiceResult<BehaviorEntry> {
    let sql = format!("{} WHERE id = ? AND kind = ?", ENTRY_SELECT);
    ctx.conn
        .query_row(&sql, (id, ctx.kind.as_str()), entry_from_row)
        .optional()?
        .ok_or_else(|| {
            ServiceError::not_found(format!("{} entry not found: {}", ctx.kind.as_str(), id))
        })
}

fn image_references(conn: &Connection, url: &str) -> ServiceResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM behavior_entries WHERE image = ?",
        [url],
        |r| r.get(0),
    )?)
}

/// Releases an object uploaded for rows that were never written. Content
/// addressing means the same bytes may already back another entry.
fn release_unreferenced(ctx: &BehaviorCtx<'_>, stored: &StoredObject) {
    match image_references(ctx.conn, &stored.url) {
        Ok(0) => {
            if let Err(e) = ctx.objects.delete(&stored.key) {
                tracing::warn!(key = %stored.key, "orphaned object left behind: {e}");
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(key = %stored.key, "could not check object references: {e}"),
    }
}

fn upload_image(ctx: &BehaviorCtx<'_>, image: Option<&str>) -> ServiceResult<Option<StoredObject>> {
    let Some(raw) = image.filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };
    let payload = decode_image_payload(raw)?;
    let stored = ctx
        .objects
        .upload(&payload.bytes, ctx.kind.object_prefix(), payload.extension)?;
    Ok(Some(stored))
}

struct NewEntry<'a> {
    student: &'a StudentRow,
    classroom_id: &'a str,
    score: i64,
    detail: &'a str,
    date: Option<&'a str>,
    image: Option<&'a str>,
}

fn insert_entry(conn: &Connection, kind: BehaviorKind, e: &NewEntry<'_>) -> ServiceResult<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO behavior_entries(
            id, kind, student_code, student_key, classroom_id,
            score, detail, entry_date, image, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            kind.as_str(),
            &e.student.student_id,
            &e.student.id,
            e.classroom_id,
            e.score,
            e.detail,
            e.date,
            e.image,
            dates::now_timestamp(),
        ),
    )
    .map_err(ServiceError::storage_in("behavior_entries"))?;
    Ok(id)
}

fn require_student(conn: &Connection, student_key: &str) -> ServiceResult<StudentRow> {
    roster::student(conn, student_key)?
        .ok_or_else(|| ServiceError::not_found(format!("student not found: {}", student_key)))
}

fn parse_entry_date(raw: Option<&str>) -> ServiceResult<Option<String>> {
    match raw.filter(|s| !s.trim().is_empty()) {
        Some(s) => Ok(Some(dates::day_timestamp(dates::parse_day(s)?))),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    student_key: String,
    classroom_id: String,
    score: i64,
    #[serde(default)]
    detail: String,
    date: Option<String>,
    image: Option<String>,
}

fn behavior_create(ctx: &BehaviorCtx<'_>, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: CreateParams = parse_params(params)?;
    let student = require_student(ctx.conn, &p.student_key)?;
    require_classroom(ctx.conn, &p.classroom_id)?;
    let date = parse_entry_date(p.date.as_deref())?;

    let stored = upload_image(ctx, p.image.as_deref())?;
    let entry = NewEntry {
        student: &student,
        classroom_id: &p.classroom_id,
        score: p.score,
        detail: p.detail.trim(),
        date: date.as_deref(),
        image: stored.as_ref().map(|s| s.url.as_str()),
    };
    let id = match insert_entry(ctx.conn, ctx.kind, &entry) {
        Ok(id) => id,
        Err(e) => {
            if let Some(s) = stored.as_ref() {
                release_unreferenced(ctx, s);
            }
            return Err(e);
        }
    };
    tracing::info!(kind = ctx.kind.as_str(), entry_id = %id, student_key = %student.id, "behavior entry created");
    Ok(json!(entry_by_id(ctx, &id)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupParams {
    student_keys: Vec<String>,
    classroom_id: String,
    score: i64,
    #[serde(default)]
    detail: String,
    date: Option<String>,
    image: Option<String>,
}

/// One shared upload, one transaction, one row per student.
fn behavior_create_group(
    ctx: &BehaviorCtx<'_>,
    params: &serde_json::Value,
) -> ServiceResult<serde_json::Value> {
    let p: CreateGroupParams = parse_params(params)?;
    if p.student_keys.is_empty() {
        return Err(ServiceError::bad_params("studentKeys must not be empty"));
    }
    require_classroom(ctx.conn, &p.classroom_id)?;
    let mut students = Vec::with_capacity(p.student_keys.len());
    let mut missing = Vec::new();
    for key in &p.student_keys {
        match roster::student(ctx.conn, key)? {
            Some(s) => students.push(s),
            None => missing.push(key.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(ServiceError::not_found(format!(
            "students not found: {}",
            missing.join(", ")
        )));
    }
    let date = parse_entry_date(p.date.as_deref())?;
    let stored = upload_image(ctx, p.image.as_deref())?;

    let write = || -> ServiceResult<Vec<String>> {
        let tx = ctx.conn.unchecked_transaction()?;
        let mut ids = Vec::with_capacity(students.len());
        for student in &students {
            let entry = NewEntry {
                student,
                classroom_id: &p.classroom_id,
                score: p.score,
                detail: p.detail.trim(),
                date: date.as_deref(),
                image: stored.as_ref().map(|s| s.url.as_str()),
            };
            ids.push(insert_entry(&tx, ctx.kind, &entry)?);
        }
        tx.commit()?;
        Ok(ids)
    };
    let ids = match write() {
        Ok(ids) => ids,
        Err(e) => {
            if let Some(s) = stored.as_ref() {
                release_unreferenced(ctx, s);
            }
            return Err(e);
        }
    };

    let entries = ids
        .iter()
        .map(|id| entry_by_id(ctx, id))
        .collect::<ServiceResult<Vec<_>>>()?;
    tracing::info!(kind = ctx.kind.as_str(), count = entries.len(), "behavior group created");
    Ok(json!({ "count": entries.len(), "entries": entries }))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SortSpec {
    field: Option<String>,
    order: Option<String>,
}

impl SortSpec {
    fn order_by(&self) -> ServiceResult<String> {
        let column = match self.field.as_deref().unwrap_or("createdAt") {
            "createdAt" => "e.created_at",
            "date" => "COALESCE(e.entry_date, e.created_at)",
            "score" => "e.score",
            other => {
                return Err(ServiceError::bad_params_with(
                    "sort.field must be one of: createdAt, date, score",
                    json!({ "field": other }),
                ))
            }
        };
        let direction = match self
            .order
            .as_deref()
            .map(|s| s.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("desc") => "DESC",
            Some("asc") => "ASC",
            Some(other) => {
                return Err(ServiceError::bad_params_with(
                    "sort.order must be asc or desc",
                    json!({ "order": other }),
                ))
            }
        };
        Ok(format!("{} {}, e.rowid {}", column, direction, direction))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    full_name: Option<String>,
    classroom_id: Option<String>,
    date: Option<String>,
    student_id: Option<String>,
    #[serde(default)]
    sort: SortSpec,
    #[serde(flatten)]
    page: PageParams,
}

fn search_rows(ctx: &BehaviorCtx<'_>, p: &SearchParams) -> ServiceResult<Vec<EntryRow>> {
    let mut clauses: Vec<&str> = vec!["e.kind = ?"];
    let mut binds: Vec<Value> = vec![Value::Text(ctx.kind.as_str().to_string())];

    if let Some((first, last)) = p.full_name.as_deref().and_then(split_full_name) {
        match last {
            Some(last) => {
                clauses.push("instr(s.first_name, ?) > 0 AND instr(s.last_name, ?) > 0");
                binds.push(Value::Text(first));
                binds.push(Value::Text(last));
            }
            // One token matches either name (OR), not both. Callers wanting
            // first AND last pass two tokens.
            None => {
                clauses.push("(instr(s.first_name, ?) > 0 OR instr(s.last_name, ?) > 0)");
                binds.push(Value::Text(first.clone()));
                binds.push(Value::Text(first));
            }
        }
    }
    if let Some(classroom_id) = p.classroom_id.as_deref().filter(|s| !s.is_empty()) {
        clauses.push("e.classroom_id = ?");
        binds.push(Value::Text(classroom_id.to_string()));
    }
    if let Some(raw) = p.date.as_deref().filter(|s| !s.trim().is_empty()) {
        let range = DayRange::of(dates::parse_day(raw)?);
        clauses.push("COALESCE(e.entry_date, e.created_at) >= ? AND COALESCE(e.entry_date, e.created_at) <= ?");
        binds.push(Value::Text(range.start));
        binds.push(Value::Text(range.end));
    }
    if let Some(student_key) = p.student_id.as_deref().filter(|s| !s.is_empty()) {
        clauses.push("e.student_key = ?");
        binds.push(Value::Text(student_key.to_string()));
    }

    let sql = format!(
        "SELECT e.id, e.student_code, e.student_key, s.first_name, s.last_name,
                COALESCE(c.name, ''), e.score, e.detail, e.entry_date, e.image
         FROM behavior_entries e
         JOIN students s ON s.id = e.student_key
         LEFT JOIN classrooms c ON c.id = e.classroom_id
         WHERE {}
         ORDER BY {}",
        clauses.join(" AND "),
        p.sort.order_by()?
    );
    let mut stmt = ctx.conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(EntryRow {
                id: r.get(0)?,
                student_code: r.get(1)?,
                student_key: r.get(2)?,
                first_name: r.get(3)?,
                last_name: r.get(4)?,
                classroom_name: r.get(5)?,
                score: r.get(6)?,
                detail: r.get(7)?,
                date: r.get(8)?,
                image: r.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Aggregates every matching entry before windowing, so `total` and the
/// running numbers describe the whole filtered ranking.
fn behavior_search(ctx: &BehaviorCtx<'_>, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: SearchParams = parse_params(params)?;
    let (skip, take) = p.page.resolve(ctx.default_take)?;
    let rows = search_rows(ctx, &p)?;
    let page = behavior::summarize(&rows, skip, take);
    tracing::debug!(kind = ctx.kind.as_str(), entries = rows.len(), students = page.total, "behavior search");
    Ok(json!(page))
}

fn behavior_summary(ctx: &BehaviorCtx<'_>, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let page: PageParams = parse_params(params)?;
    let p = SearchParams {
        page,
        ..SearchParams::default()
    };
    let (skip, take) = p.page.resolve(ctx.default_take)?;
    let rows = search_rows(ctx, &p)?;
    Ok(json!(behavior::summarize(&rows, skip, take)))
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

fn behavior_get(ctx: &BehaviorCtx<'_>, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: IdParams = parse_params(params)?;
    Ok(json!(entry_by_id(ctx, &p.id)?))
}

/// The row is committed first; the photo goes afterwards once no other row
/// references it. A failed object delete leaves an orphan and is logged.
fn behavior_delete(ctx: &BehaviorCtx<'_>, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: IdParams = parse_params(params)?;
    let entry = entry_by_id(ctx, &p.id)?;

    ctx.conn
        .execute("DELETE FROM behavior_entries WHERE id = ?", [&entry.id])
        .map_err(ServiceError::storage_in("behavior_entries"))?;

    if let Some(url) = entry.image.as_deref() {
        match ctx.objects.key_from_url(url) {
            Some(key) => {
                if image_references(ctx.conn, url)? == 0 {
                    if let Err(e) = ctx.objects.delete(&key) {
                        tracing::warn!(entry_id = %entry.id, key = %key, "orphaned image left behind: {e}");
                    }
                }
            }
            None => tracing::warn!(entry_id = %entry.id, url = %url, "image is not in this object store; leaving it"),
        }
    }

    tracing::info!(kind = ctx.kind.as_str(), entry_id = %entry.id, "behavior entry deleted");
    Ok(json!({ "ok": true, "id": entry.id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    student_key: String,
    #[serde(flatten)]
    page: PageParams,
}

fn behavior_student_history(
    ctx: &BehaviorCtx<'_>,
    params: &serde_json::Value,
) -> ServiceResult<serde_json::Value> {
    let p: HistoryParams = parse_params(params)?;
    let (skip, take) = p.page.resolve(ctx.default_take)?;
    let student = require_student(ctx.conn, &p.student_key)?;

    let sql = format!(
        "{} WHERE kind = ? AND student_key = ?
         ORDER BY COALESCE(entry_date, created_at) DESC, rowid DESC
         LIMIT ? OFFSET ?",
        ENTRY_SELECT
    );
    let mut stmt = ctx.conn.prepare(&sql)?;
    let entries = stmt
        .query_map(
            (ctx.kind.as_str(), &student.id, take as i64, skip as i64),
            entry_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    let total: i64 = ctx.conn.query_row(
        "SELECT COUNT(*) FROM behavior_entries WHERE kind = ? AND student_key = ?",
        (ctx.kind.as_str(), &student.id),
        |r| r.get(0),
    )?;

    Ok(json!({
        "student": student,
        "total": total,
        "data": entries
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (kind, action) = BehaviorKind::split_method(&req.method)?;
    let op: fn(&BehaviorCtx<'_>, &serde_json::Value) -> ServiceResult<serde_json::Value> =
        match action {
            "create" => behavior_create,
            "createGroup" => behavior_create_group,
            "search" => behavior_search,
            "summary" => behavior_summary,
            "get" => behavior_get,
            "delete" => behavior_delete,
            "studentHistory" => behavior_student_history,
            _ => return None,
        };
    let result = db_conn(state).and_then(|conn| {
        let ctx = BehaviorCtx {
            conn,
            objects: object_store(state)?,
            kind,
            default_take: state.config.default_take,
        };
        op(&ctx, &req.params)
    });
    Some(respond(req, result))
}
