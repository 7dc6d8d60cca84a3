use crate::attendance::compare_classroom_names;
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::helpers::{db_conn, parse_params, required_non_empty, respond};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherProfile {
    pub id: String,
    pub prefix: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    pub classroom_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomRow {
    pub id: String,
    pub name: String,
    pub program_id: Option<String>,
    pub program_name: Option<String>,
    pub department_id: Option<String>,
    pub department_name: Option<String>,
    pub level_id: Option<String>,
    pub level_name: Option<String>,
}

pub(crate) const CLASSROOM_SELECT: &str = "SELECT c.id, c.name,
       c.program_id, p.name,
       c.department_id, d.name,
       c.level_id, l.name
     FROM classrooms c
     LEFT JOIN programs p ON p.id = c.program_id
     LEFT JOIN departments d ON d.id = c.department_id
     LEFT JOIN levels l ON l.id = c.level_id";

pub(crate) fn classroom_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ClassroomRow> {
    Ok(ClassroomRow {
        id: r.get(0)?,
        name: r.get(1)?,
        program_id: r.get(2)?,
        program_name: r.get(3)?,
        department_id: r.get(4)?,
        department_name: r.get(5)?,
        level_id: r.get(6)?,
        level_name: r.get(7)?,
    })
}

pub(crate) fn teacher_profile(
    conn: &Connection,
    teacher_id: &str,
) -> ServiceResult<Option<TeacherProfile>> {
    Ok(conn
        .query_row(
            "SELECT id, prefix, first_name, last_name, role FROM users WHERE id = ?",
            [teacher_id],
            |r| {
                Ok(TeacherProfile {
                    id: r.get(0)?,
                    prefix: r.get(1)?,
                    first_name: r.get(2)?,
                    last_name: r.get(3)?,
                    role: r.get(4)?,
                })
            },
        )
        .optional()?)
}

pub(crate) fn require_teacher(conn: &Connection, teacher_id: &str) -> ServiceResult<TeacherProfile> {
    teacher_profile(conn, teacher_id)?
        .ok_or_else(|| ServiceError::not_found(format!("teacher not found: {}", teacher_id)))
}

pub(crate) fn classroom(conn: &Connection, classroom_id: &str) -> ServiceResult<Option<ClassroomRow>> {
    let sql = format!("{} WHERE c.id = ?", CLASSROOM_SELECT);
    Ok(conn
        .query_row(&sql, [classroom_id], classroom_from_row)
        .optional()?)
}

pub(crate) fn require_classroom(conn: &Connection, classroom_id: &str) -> ServiceResult<ClassroomRow> {
    classroom(conn, classroom_id)?
        .ok_or_else(|| ServiceError::not_found(format!("classroom not found: {}", classroom_id)))
}

/// Students of one classroom ordered by first name, then last name.
pub(crate) fn roster(conn: &Connection, classroom_id: &str) -> ServiceResult<Vec<StudentRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_code, first_name, last_name, classroom_id
         FROM students
         WHERE classroom_id = ?
         ORDER BY first_name, last_name",
    )?;
    let rows = stmt
        .query_map([classroom_id], |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                student_id: r.get(1)?,
                first_name: r.get(2)?,
                last_name: r.get(3)?,
                classroom_id: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn student(conn: &Connection, student_key: &str) -> ServiceResult<Option<StudentRow>> {
    Ok(conn
        .query_row(
            "SELECT id, student_code, first_name, last_name, classroom_id
             FROM students WHERE id = ?",
            [student_key],
            |r| {
                Ok(StudentRow {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    first_name: r.get(2)?,
                    last_name: r.get(3)?,
                    classroom_id: r.get(4)?,
                })
            },
        )
        .optional()?)
}

fn row_exists(conn: &Connection, table: &'static str, id: &str) -> ServiceResult<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    Ok(conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map_err(ServiceError::storage_in(table))?
        .is_some())
}

fn ensure_reference(
    conn: &Connection,
    table: &'static str,
    label: &str,
    id: Option<&str>,
) -> ServiceResult<()> {
    let Some(id) = id else { return Ok(()) };
    if row_exists(conn, table, id)? {
        Ok(())
    } else {
        Err(ServiceError::not_found(format!("{} not found: {}", label, id)))
    }
}

#[derive(Debug, Deserialize)]
struct NameParams {
    name: String,
}

fn create_named(
    conn: &Connection,
    table: &'static str,
    params: &serde_json::Value,
) -> ServiceResult<serde_json::Value> {
    let p: NameParams = parse_params(params)?;
    let name = required_non_empty(&p.name, "name")?;
    let id = Uuid::new_v4().to_string();
    let sql = format!("INSERT INTO {}(id, name) VALUES(?, ?)", table);
    conn.execute(&sql, (&id, &name))
        .map_err(ServiceError::storage_in(table))?;
    Ok(json!({ "id": id, "name": name }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassroomCreateParams {
    name: String,
    program_id: Option<String>,
    department_id: Option<String>,
    level_id: Option<String>,
}

fn classrooms_create(conn: &Connection, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: ClassroomCreateParams = parse_params(params)?;
    let name = required_non_empty(&p.name, "name")?;
    ensure_reference(conn, "programs", "program", p.program_id.as_deref())?;
    ensure_reference(conn, "departments", "department", p.department_id.as_deref())?;
    ensure_reference(conn, "levels", "level", p.level_id.as_deref())?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classrooms(id, name, program_id, department_id, level_id)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &name, &p.program_id, &p.department_id, &p.level_id),
    )
    .map_err(ServiceError::storage_in("classrooms"))?;
    Ok(json!({ "classroomId": id, "name": name }))
}

fn classrooms_list(conn: &Connection) -> ServiceResult<serde_json::Value> {
    let mut stmt = conn.prepare(CLASSROOM_SELECT)?;
    let mut rows = stmt
        .query_map([], classroom_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.sort_by(|a, b| compare_classroom_names(&a.name, &b.name));

    let mut count_stmt = conn.prepare("SELECT COUNT(*) FROM students WHERE classroom_id = ?")?;
    let mut out = Vec::with_capacity(rows.len());
    for c in rows {
        let student_count: i64 = count_stmt.query_row([&c.id], |r| r.get(0))?;
        let mut v = json!(c);
        v["studentCount"] = json!(student_count);
        out.push(v);
    }
    Ok(json!({ "classrooms": out }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeacherCreateParams {
    #[serde(default)]
    prefix: String,
    first_name: String,
    last_name: String,
    role: Option<String>,
}

fn teachers_create(conn: &Connection, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: TeacherCreateParams = parse_params(params)?;
    let first_name = required_non_empty(&p.first_name, "firstName")?;
    let last_name = p.last_name.trim().to_string();
    let role = match p.role.as_deref().map(str::trim) {
        None | Some("") | Some("teacher") => "teacher",
        Some("admin") => "admin",
        Some(other) => {
            return Err(ServiceError::bad_params_with(
                "role must be one of: teacher, admin",
                json!({ "role": other }),
            ))
        }
    };
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, prefix, first_name, last_name, role) VALUES(?, ?, ?, ?, ?)",
        (&id, p.prefix.trim(), &first_name, &last_name, role),
    )
    .map_err(ServiceError::storage_in("users"))?;
    Ok(json!({ "teacherId": id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignParams {
    teacher_id: String,
    classroom_id: String,
}

fn teachers_assign_classroom(
    conn: &Connection,
    params: &serde_json::Value,
) -> ServiceResult<serde_json::Value> {
    let p: AssignParams = parse_params(params)?;
    require_teacher(conn, &p.teacher_id)?;
    require_classroom(conn, &p.classroom_id)?;
    conn.execute(
        "INSERT OR IGNORE INTO teacher_classrooms(teacher_id, classroom_id) VALUES(?, ?)",
        (&p.teacher_id, &p.classroom_id),
    )
    .map_err(ServiceError::storage_in("teacher_classrooms"))?;
    Ok(json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentCreateParams {
    student_code: String,
    first_name: String,
    last_name: String,
    classroom_id: String,
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: StudentCreateParams = parse_params(params)?;
    let student_code = required_non_empty(&p.student_code, "studentCode")?;
    let first_name = required_non_empty(&p.first_name, "firstName")?;
    require_classroom(conn, &p.classroom_id)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, student_code, first_name, last_name, classroom_id)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &student_code, &first_name, p.last_name.trim(), &p.classroom_id),
    )
    .map_err(ServiceError::storage_in("students"))?;
    Ok(json!({ "studentId": id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassroomParams {
    classroom_id: String,
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: ClassroomParams = parse_params(params)?;
    require_classroom(conn, &p.classroom_id)?;
    Ok(json!({ "students": roster(conn, &p.classroom_id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "departments.create" => db_conn(state).and_then(|c| create_named(c, "departments", &req.params)),
        "programs.create" => db_conn(state).and_then(|c| create_named(c, "programs", &req.params)),
        "levels.create" => db_conn(state).and_then(|c| create_named(c, "levels", &req.params)),
        "classrooms.create" => db_conn(state).and_then(|c| classrooms_create(c, &req.params)),
        "classrooms.list" => match state.db.as_ref() {
            Some(c) => classrooms_list(c),
            None => Ok(json!({ "classrooms": [] })),
        },
        "teachers.create" => db_conn(state).and_then(|c| teachers_create(c, &req.params)),
        "teachers.assignClassroom" => {
            db_conn(state).and_then(|c| teachers_assign_classroom(c, &req.params))
        }
        "students.create" => db_conn(state).and_then(|c| students_create(c, &req.params)),
        "students.list" => db_conn(state).and_then(|c| students_list(c, &req.params)),
        _ => return None,
    };
    Some(respond(req, result))
}
