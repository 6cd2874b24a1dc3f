//! JSON shapes exchanged with the remote script endpoint.

use serde::{Deserialize, Serialize};

use crate::{Fields, SyncError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Body of a `action=read` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub data: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ReadResponse {
    /// Header row plus data rows, or `Remote` when the store reported an error
    pub fn into_rows(self) -> Result<Vec<Vec<Value>>, SyncError> {
        match self.status {
            ResponseStatus::Success => Ok(self.data.unwrap_or_default()),
            ResponseStatus::Error => Err(SyncError::remote(
                self.message
                    .unwrap_or_else(|| "read failed without a message".to_string()),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Add,
    Update,
    Delete,
}

impl MutationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationAction::Add => "add",
            MutationAction::Update => "update",
            MutationAction::Delete => "delete",
        }
    }
}

/// POST body of a write call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequest {
    pub action: MutationAction,
    pub sheet_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl MutationRequest {
    pub fn add(sheet_name: impl Into<String>, data: Fields) -> Self {
        Self {
            action: MutationAction::Add,
            sheet_name: sheet_name.into(),
            data: Some(data),
            row_id: None,
            user: None,
        }
    }

    pub fn update(sheet_name: impl Into<String>, row_id: impl Into<String>, data: Fields) -> Self {
        Self {
            action: MutationAction::Update,
            sheet_name: sheet_name.into(),
            data: Some(data),
            row_id: Some(row_id.into()),
            user: None,
        }
    }

    pub fn delete(sheet_name: impl Into<String>, row_id: impl Into<String>) -> Self {
        Self {
            action: MutationAction::Delete,
            sheet_name: sheet_name.into(),
            data: None,
            row_id: Some(row_id.into()),
            user: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Reply to a write call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl MutationResponse {
    pub fn success(id: Option<&str>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: None,
            data: id.map(|id| serde_json::json!({ "id": id })),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Server-issued identifier from `data.id`, numeric or textual
    pub fn issued_id(&self) -> Option<String> {
        let id = self.data.as_ref()?.get("id")?.clone();
        let id = Value::from_json_value(id);
        if id.is_blank() {
            None
        } else {
            Some(id.as_key())
        }
    }

    /// Turn an `"error"` status into `SyncError::Remote`
    pub fn into_result(self) -> Result<Self, SyncError> {
        match self.status {
            ResponseStatus::Success => Ok(self),
            ResponseStatus::Error => Err(SyncError::remote(
                self.message
                    .clone()
                    .unwrap_or_else(|| "write rejected without a message".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mutation_request_uses_script_field_names() {
        let request = MutationRequest::delete("Clientes", "42").with_user("Web App User");
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({
                "action": "delete",
                "sheetName": "Clientes",
                "rowId": "42",
                "user": "Web App User"
            })
        );
    }

    #[test]
    fn issued_id_accepts_numbers_and_strings() {
        let response: MutationResponse =
            serde_json::from_value(json!({"status": "success", "data": {"id": 42}})).unwrap();
        assert_eq!(response.issued_id().as_deref(), Some("42"));

        let response: MutationResponse =
            serde_json::from_value(json!({"status": "success", "data": {"id": "B-7"}})).unwrap();
        assert_eq!(response.issued_id().as_deref(), Some("B-7"));

        let response: MutationResponse =
            serde_json::from_value(json!({"status": "success"})).unwrap();
        assert_eq!(response.issued_id(), None);
    }

    #[test]
    fn error_status_is_never_a_success() {
        let response: MutationResponse =
            serde_json::from_value(json!({"status": "error", "message": "locked"})).unwrap();
        assert_eq!(
            response.into_result(),
            Err(SyncError::remote("locked"))
        );

        let read: ReadResponse =
            serde_json::from_value(json!({"status": "error", "message": "no sheet"})).unwrap();
        assert!(matches!(read.into_rows(), Err(SyncError::Remote { .. })));
    }

    #[test]
    fn read_response_keeps_mixed_cells() {
        let read: ReadResponse = serde_json::from_value(json!({
            "status": "success",
            "data": [["ID_Cliente", "Nombre_Cliente"], [1, "ACME"]]
        }))
        .unwrap();
        let rows = read.into_rows().unwrap();
        assert_eq!(rows[1][0], Value::Integer(1));
    }
}
