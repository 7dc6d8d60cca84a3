use anyhow::{anyhow, Context};
use serde_json::json;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_FILE: &str = "school.sqlite3";
const DB_ENTRY: &str = "db/school.sqlite3";
const OBJECTS_DIR: &str = "objects";
const OBJECTS_ENTRY_PREFIX: &str = "objects/";
pub const BUNDLE_FORMAT_V1: &str = "school-workspace-v1";
pub const LEGACY_SQLITE_FORMAT: &str = "legacy-sqlite3";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub object_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub objects_restored: usize,
}

/// Relative paths of every file under `root`, with `/` separators, sorted.
fn collect_files(root: &Path) -> anyhow::Result<Vec<String>> {
    let mut out = Vec::new();
    if !root.is_dir() {
        return Ok(out);
    }
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to list {}", dir.to_string_lossy()))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to read entry in {}", dir.to_string_lossy()))?
                .path();
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() {
                let rel = path
                    .strip_prefix(root)
                    .context("object path escaped its root")?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(rel);
            }
        }
    }
    out.sort();
    Ok(out)
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let objects_root = workspace_path.join(OBJECTS_DIR);
    let objects = collect_files(&objects_root)?;

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
        "objectCount": objects.len(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    for rel in &objects {
        let entry_name = format!("{}{}", OBJECTS_ENTRY_PREFIX, rel);
        zip.start_file(entry_name.as_str(), opts)
            .with_context(|| format!("failed to start entry {}", entry_name))?;
        let src = objects_root.join(rel);
        let mut f = File::open(&src)
            .with_context(|| format!("failed to open object {}", src.to_string_lossy()))?;
        std::io::copy(&mut f, &mut zip)
            .with_context(|| format!("failed to write entry {}", entry_name))?;
    }

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 2 + objects.len(),
        object_count: objects.len(),
    })
}

/// Maps a bundle entry under `objects/` to a path inside `objects_root`.
/// Entries that would land outside it are rejected.
fn object_destination(objects_root: &Path, entry_name: &str) -> Option<PathBuf> {
    let rel = entry_name.strip_prefix(OBJECTS_ENTRY_PREFIX)?;
    if rel.is_empty() || rel.ends_with('/') {
        return None;
    }
    let rel = Path::new(rel);
    if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
        return None;
    }
    Some(objects_root.join(rel))
}

pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join(DB_FILE);

    if !is_zip_file(in_path)? {
        std::fs::copy(in_path, &dst).with_context(|| {
            format!(
                "failed to copy legacy sqlite backup from {} to {}",
                in_path.to_string_lossy(),
                dst.to_string_lossy()
            )
        })?;
        return Ok(ImportSummary {
            bundle_format_detected: LEGACY_SQLITE_FORMAT.to_string(),
            objects_restored: 0,
        });
    }

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }

    let objects_root = workspace_path.join(OBJECTS_DIR);
    let objects = object_entries(&mut archive, &objects_root)?;

    let tmp_dst = workspace_path.join(format!("{}.importing", DB_FILE));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }
    if let Err(e) = extract_bundle(&mut archive, &tmp_dst, &objects) {
        let _ = std::fs::remove_file(&tmp_dst);
        return Err(e);
    }

    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        objects_restored: objects.len(),
    })
}

/// Index and destination of every object entry. Fails before anything is
/// written if any entry would land outside `objects_root`.
fn object_entries<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    objects_root: &Path,
) -> anyhow::Result<Vec<(usize, PathBuf)>> {
    let mut out = Vec::new();
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .with_context(|| format!("failed to read bundle entry #{}", i))?;
        let name = entry.name();
        if !name.starts_with(OBJECTS_ENTRY_PREFIX) || entry.is_dir() {
            continue;
        }
        let Some(target) = object_destination(objects_root, name) else {
            return Err(anyhow!("bundle entry escapes the objects directory: {}", name));
        };
        out.push((i, target));
    }
    Ok(out)
}

fn extract_bundle<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    tmp_db: &Path,
    objects: &[(usize, PathBuf)],
) -> anyhow::Result<()> {
    let mut db_out = File::create(tmp_db).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_db.to_string_lossy()
        )
    })?;
    {
        let mut db_entry = archive
            .by_name(DB_ENTRY)
            .with_context(|| format!("bundle missing {}", DB_ENTRY))?;
        std::io::copy(&mut db_entry, &mut db_out).context("failed to extract database entry")?;
    }
    db_out
        .flush()
        .context("failed to flush extracted database")?;

    for (i, target) in objects {
        let mut entry = archive
            .by_index(*i)
            .with_context(|| format!("failed to read bundle entry #{}", i))?;
        let name = entry.name().to_string();
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
        let mut out = File::create(target)
            .with_context(|| format!("failed to create object {}", target.to_string_lossy()))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract {}", name))?;
    }
    Ok(())
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}
