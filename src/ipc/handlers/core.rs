use crate::db;
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::{err, fail, ok};
use crate::ipc::types::{AppState, Request};
use crate::objects::LocalObjectStore;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Opens (or creates) the workspace database and its object store.
pub fn open_workspace(state: &mut AppState, path: &Path) -> ServiceResult<()> {
    let conn = db::open_db(path).map_err(ServiceError::Workspace)?;
    let objects = LocalObjectStore::open(path, &state.config.object_base_url)?;
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    state.objects = Some(objects);
    tracing::info!(workspace = %path.display(), "workspace opened");
    Ok(())
}

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match open_workspace(state, &path) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => {
            tracing::error!(workspace = %path.display(), "workspace open failed: {e}");
            fail(&req.id, &e)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
