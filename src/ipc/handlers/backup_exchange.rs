use crate::backup;
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::helpers::{parse_params, required_non_empty, respond};
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};

fn target_workspace(state: &AppState, explicit: Option<String>) -> ServiceResult<PathBuf> {
    explicit
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or(ServiceError::NoWorkspace)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportParams {
    out_path: String,
    workspace_path: Option<String>,
}

fn backup_export(state: &mut AppState, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: ExportParams = parse_params(params)?;
    let out_path = required_non_empty(&p.out_path, "outPath")?;
    let workspace_path = target_workspace(state, p.workspace_path)?;

    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(FULL)") {
            tracing::warn!("wal checkpoint before export failed: {e}");
        }
    }

    let export = backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path))
        .map_err(ServiceError::Bundle)?;
    tracing::info!(
        path = %out_path,
        objects = export.object_count,
        "workspace bundle exported"
    );

    Ok(json!({
        "ok": true,
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "objectCount": export.object_count
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportParams {
    in_path: String,
    workspace_path: Option<String>,
}

fn backup_import(state: &mut AppState, params: &serde_json::Value) -> ServiceResult<serde_json::Value> {
    let p: ImportParams = parse_params(params)?;
    let in_path = required_non_empty(&p.in_path, "inPath")?;
    let workspace_path = target_workspace(state, p.workspace_path)?;

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(ServiceError::not_found(format!(
            "bundle file not found: {}",
            in_path
        )));
    }
    std::fs::create_dir_all(&workspace_path)?;

    // Release open handles before the database file is replaced.
    let previous = state.workspace.clone();
    state.db = None;
    state.objects = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(import) => import,
        Err(e) => {
            reopen_previous(state, previous.as_deref());
            return Err(ServiceError::Bundle(e));
        }
    };
    if let Err(e) = open_workspace(state, &workspace_path) {
        state.workspace = None;
        return Err(e);
    }
    tracing::info!(
        path = %in_path,
        format = %import.bundle_format_detected,
        objects = import.objects_restored,
        "workspace bundle imported"
    );

    Ok(json!({
        "ok": true,
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected,
        "objectsRestored": import.objects_restored
    }))
}

fn reopen_previous(state: &mut AppState, previous: Option<&Path>) {
    let Some(path) = previous else {
        return;
    };
    if let Err(e) = open_workspace(state, path) {
        tracing::warn!(workspace = %path.display(), "reopen after failed import failed: {e}");
        state.workspace = None;
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => backup_export(state, &req.params),
        "backup.importWorkspaceBundle" => backup_import(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
