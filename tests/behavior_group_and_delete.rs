use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const OBJECT_BASE_URL: &str = "http://objects.test/school";
// "hello" as a PNG-labelled data URI.
const IMAGE: &str = "data:image/png;base64,aGVsbG8=";

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .env_remove("SCHOOLD_WORKSPACE")
        .env("SCHOOLD_OBJECT_BASE_URL", OBJECT_BASE_URL)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

fn object_path(workspace: &Path, url: &str) -> PathBuf {
    let key = url
        .strip_prefix(OBJECT_BASE_URL)
        .and_then(|k| k.strip_prefix('/'))
        .unwrap_or_else(|| panic!("url outside object store: {}", url));
    workspace.join("objects").join(key)
}

struct Fixture {
    room: String,
    students: Vec<String>,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &Path) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let room = str_field(
        &request_ok(stdin, reader, "s2", "classrooms.create", json!({ "name": "M5/1-B" })),
        "classroomId",
    );
    let mut students = Vec::new();
    for (i, first) in ["Fah", "Fon"].iter().enumerate() {
        let created = request_ok(
            stdin,
            reader,
            &format!("s3-{}", i),
            "students.create",
            json!({
                "studentCode": format!("F{}", i),
                "firstName": first,
                "lastName": "Group",
                "classroomId": room
            }),
        );
        students.push(str_field(&created, "studentId"));
    }
    Fixture { room, students }
}

#[test]
fn group_create_shares_one_image_until_last_entry_is_deleted() {
    let workspace = temp_dir("schoold-group");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let group = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "goodness.createGroup",
        json!({
            "studentKeys": fx.students,
            "classroomId": fx.room,
            "score": 2,
            "detail": "helped clean the lab",
            "date": "2024-09-02",
            "image": IMAGE
        }),
    );
    assert_eq!(group["count"], json!(2));
    let entries = group["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 2);
    for e in entries {
        assert_eq!(e["score"], json!(2));
        assert_eq!(e["detail"], json!("helped clean the lab"));
        assert_eq!(e["date"], json!("2024-09-02T00:00:00.000"));
    }
    let keys: Vec<String> = entries.iter().map(|e| str_field(e, "studentKey")).collect();
    assert_eq!(keys, fx.students);
    let url = str_field(&entries[0], "image");
    assert_eq!(entries[1]["image"], json!(url));
    assert!(url.ends_with(".png"), "{}", url);
    let file = object_path(&workspace, &url);
    assert_eq!(std::fs::read(&file).expect("stored image"), b"hello");

    let first_id = str_field(&entries[0], "id");
    let second_id = str_field(&entries[1], "id");
    let deleted = request_ok(&mut stdin, &mut reader, "2", "goodness.delete", json!({ "id": first_id }));
    assert_eq!(deleted["id"], json!(first_id));
    assert!(file.is_file(), "shared image removed while still referenced");

    let gone = request(&mut stdin, &mut reader, "3", "goodness.get", json!({ "id": first_id }));
    assert_eq!(gone["ok"], json!(false));
    assert_eq!(gone["error"]["code"], json!("not_found"));
    let remaining = request_ok(&mut stdin, &mut reader, "4", "goodness.get", json!({ "id": second_id }));
    assert_eq!(remaining["image"], json!(url));

    let _ = request_ok(&mut stdin, &mut reader, "5", "goodness.delete", json!({ "id": second_id }));
    assert!(!file.exists(), "image should be removed with its last entry");

    let summary = request_ok(&mut stdin, &mut reader, "6", "goodness.summary", json!({}));
    assert_eq!(summary["total"], json!(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn delete_of_missing_entry_is_not_found() {
    let workspace = temp_dir("schoold-delete-missing");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = seed(&mut stdin, &mut reader, &workspace);

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "badness.delete",
        json!({ "id": "00000000-0000-0000-0000-000000000000" }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("not_found"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn delete_commits_even_when_the_image_cannot_be_removed() {
    let workspace = temp_dir("schoold-delete-orphan");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "badness.create",
        json!({
            "studentKey": fx.students[0],
            "classroomId": fx.room,
            "score": 3,
            "detail": "late to assembly",
            "image": IMAGE
        }),
    );
    let id = str_field(&created, "id");
    let file = object_path(&workspace, &str_field(&created, "image"));
    // A directory in place of the object makes the file removal fail.
    std::fs::remove_file(&file).expect("remove stored image");
    std::fs::create_dir_all(file.join("blocker")).expect("block object path");

    let deleted = request_ok(&mut stdin, &mut reader, "2", "badness.delete", json!({ "id": id }));
    assert_eq!(deleted["id"], json!(id));
    let gone = request(&mut stdin, &mut reader, "3", "badness.get", json!({ "id": id }));
    assert_eq!(gone["error"]["code"], json!("not_found"));
    assert!(file.is_dir());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn kinds_do_not_see_each_others_entries() {
    let workspace = temp_dir("schoold-kinds");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "badness.create",
        json!({ "studentKey": fx.students[0], "classroomId": fx.room, "score": 5 }),
    );
    let id = str_field(&created, "id");
    assert_eq!(created["kind"], json!("badness"));
    assert!(created["image"].is_null());

    let wrong_kind = request(&mut stdin, &mut reader, "2", "goodness.get", json!({ "id": id }));
    assert_eq!(wrong_kind["error"]["code"], json!("not_found"));
    let wrong_delete = request(&mut stdin, &mut reader, "3", "goodness.delete", json!({ "id": id }));
    assert_eq!(wrong_delete["error"]["code"], json!("not_found"));
    let _ = request_ok(&mut stdin, &mut reader, "4", "badness.delete", json!({ "id": id }));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn failed_creates_leave_no_rows_behind() {
    let workspace = temp_dir("schoold-create-failures");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let unknown_student = request(
        &mut stdin,
        &mut reader,
        "1",
        "goodness.createGroup",
        json!({
            "studentKeys": [fx.students[0], "ghost"],
            "classroomId": fx.room,
            "score": 1,
            "image": IMAGE
        }),
    );
    assert_eq!(unknown_student["error"]["code"], json!("not_found"));

    let empty_group = request(
        &mut stdin,
        &mut reader,
        "2",
        "goodness.createGroup",
        json!({ "studentKeys": [], "classroomId": fx.room, "score": 1 }),
    );
    assert_eq!(empty_group["error"]["code"], json!("bad_params"));

    let bad_image = request(
        &mut stdin,
        &mut reader,
        "3",
        "goodness.create",
        json!({
            "studentKey": fx.students[0],
            "classroomId": fx.room,
            "score": 1,
            "image": "not base64 at all!"
        }),
    );
    assert_eq!(bad_image["error"]["code"], json!("bad_params"));

    let unknown_room = request(
        &mut stdin,
        &mut reader,
        "4",
        "goodness.create",
        json!({ "studentKey": fx.students[0], "classroomId": "nowhere", "score": 1 }),
    );
    assert_eq!(unknown_room["error"]["code"], json!("not_found"));

    let summary = request_ok(&mut stdin, &mut reader, "5", "goodness.summary", json!({}));
    assert_eq!(summary["total"], json!(0));
    let objects = workspace.join("objects").join("goodness");
    let stored = std::fs::read_dir(&objects).map(|d| d.count()).unwrap_or(0);
    assert_eq!(stored, 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn identical_images_from_separate_creates_share_storage() {
    let workspace = temp_dir("schoold-dedupe");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let mut ids = Vec::new();
    let mut urls = Vec::new();
    for (i, student) in fx.students.iter().enumerate() {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "goodness.create",
            json!({
                "studentKey": student,
                "classroomId": fx.room,
                "score": 1,
                "image": IMAGE
            }),
        );
        ids.push(str_field(&created, "id"));
        urls.push(str_field(&created, "image"));
    }
    assert_eq!(urls[0], urls[1]);
    let file = object_path(&workspace, &urls[0]);

    let _ = request_ok(&mut stdin, &mut reader, "d0", "goodness.delete", json!({ "id": ids[0] }));
    assert!(file.is_file());
    let _ = request_ok(&mut stdin, &mut reader, "d1", "goodness.delete", json!({ "id": ids[1] }));
    assert!(!file.exists());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
