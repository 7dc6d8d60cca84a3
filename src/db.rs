use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "school.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS levels(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            program_id TEXT,
            department_id TEXT,
            level_id TEXT,
            FOREIGN KEY(program_id) REFERENCES programs(id),
            FOREIGN KEY(department_id) REFERENCES departments(id),
            FOREIGN KEY(level_id) REFERENCES levels(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            prefix TEXT NOT NULL DEFAULT '',
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'teacher'
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_classrooms(
            teacher_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            PRIMARY KEY(teacher_id, classroom_id),
            FOREIGN KEY(teacher_id) REFERENCES users(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_code TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_classroom ON students(classroom_id)",
        [],
    )?;

    // Id sets are JSON arrays of student ids. No uniqueness on
    // (teacher, classroom, day): duplicates are the caller's concern.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS check_in_reports(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            check_in_date TEXT NOT NULL,
            present TEXT NOT NULL DEFAULT '[]',
            absent TEXT NOT NULL DEFAULT '[]',
            late TEXT NOT NULL DEFAULT '[]',
            leave TEXT NOT NULL DEFAULT '[]',
            created_by TEXT,
            updated_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(teacher_id) REFERENCES users(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_check_in_reports_key
         ON check_in_reports(teacher_id, classroom_id, check_in_date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_check_in_reports_date ON check_in_reports(check_in_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_check_ins(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            check_in_date TEXT NOT NULL,
            present TEXT NOT NULL DEFAULT '[]',
            absent TEXT NOT NULL DEFAULT '[]',
            created_by TEXT,
            updated_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(teacher_id) REFERENCES users(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activity_check_ins_key
         ON activity_check_ins(teacher_id, classroom_id, check_in_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS behavior_entries(
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL CHECK(kind IN ('goodness', 'badness')),
            student_code TEXT NOT NULL,
            student_key TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            score INTEGER NOT NULL,
            detail TEXT NOT NULL DEFAULT '',
            entry_date TEXT,
            image TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_key) REFERENCES students(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_behavior_entries_kind_student
         ON behavior_entries(kind, student_key)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_behavior_entries_image ON behavior_entries(image)",
        [],
    )?;

    Ok(conn)
}
