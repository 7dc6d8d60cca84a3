use rusqlite::types::Type;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::{fail, ok};
use crate::ipc::types::{AppState, Request};
use crate::objects::LocalObjectStore;

/// Deserializes `params` into a typed shape; a missing params object is `{}`.
pub fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> ServiceResult<T> {
    let value = if params.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(value).map_err(|e| ServiceError::bad_params(e.to_string()))
}

pub fn db_conn(state: &AppState) -> ServiceResult<&Connection> {
    state.db.as_ref().ok_or(ServiceError::NoWorkspace)
}

pub fn object_store(state: &AppState) -> ServiceResult<&LocalObjectStore> {
    state.objects.as_ref().ok_or(ServiceError::NoWorkspace)
}

pub fn respond(req: &Request, result: ServiceResult<serde_json::Value>) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            match &e {
                ServiceError::BadParams { .. }
                | ServiceError::NotFound { .. }
                | ServiceError::NoWorkspace => {
                    tracing::info!(method = %req.method, request_id = %req.id, code = e.code(), "{e}");
                }
                _ => {
                    tracing::error!(method = %req.method, request_id = %req.id, code = e.code(), "{e}");
                }
            }
            fail(&req.id, &e)
        }
    }
}

pub fn required_non_empty(value: &str, key: &str) -> ServiceResult<String> {
    let t = value.trim();
    if t.is_empty() {
        return Err(ServiceError::bad_params(format!("{} must not be empty", key)));
    }
    Ok(t.to_string())
}

pub fn encode_ids(ids: &[String]) -> String {
    serde_json::Value::from(ids.to_vec()).to_string()
}

/// Column decoder for id sets stored as JSON arrays.
pub fn decode_ids(col: usize, raw: &str) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(e)))
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageParams {
    pub skip: Option<i64>,
    pub take: Option<i64>,
}

impl PageParams {
    pub fn resolve(&self, default_take: i64) -> ServiceResult<(usize, usize)> {
        let skip = self.skip.unwrap_or(0);
        let take = self.take.unwrap_or(default_take);
        if skip < 0 || take < 0 {
            return Err(ServiceError::bad_params_with(
                "skip and take must be non-negative",
                serde_json::json!({ "skip": skip, "take": take }),
            ));
        }
        Ok((skip as usize, take as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Sample {
        classroom_id: String,
        #[serde(default)]
        note: Option<String>,
    }

    #[test]
    fn parse_params_reports_missing_fields_as_bad_params() {
        let e = parse_params::<Sample>(&json!({})).expect_err("missing field");
        assert_eq!(e.code(), "bad_params");
        assert!(e.to_string().contains("classroomId"));

        let s: Sample = parse_params(&json!({ "classroomId": "c1" })).expect("parse");
        assert_eq!(s.classroom_id, "c1");
        assert!(s.note.is_none());
    }

    #[test]
    fn null_params_behave_like_empty_object() {
        let p: PageParams = parse_params(&serde_json::Value::Null).expect("parse");
        assert_eq!(p.resolve(1000).expect("resolve"), (0, 1000));
    }

    #[test]
    fn negative_paging_is_rejected() {
        let p = PageParams {
            skip: Some(-1),
            take: None,
        };
        assert!(p.resolve(10).is_err());
    }

    #[test]
    fn ids_roundtrip_through_json_text() {
        let ids = vec!["a".to_string(), "ข".to_string()];
        let raw = encode_ids(&ids);
        assert_eq!(decode_ids(0, &raw).expect("decode"), ids);
        assert!(decode_ids(0, "not json").is_err());
    }
}
