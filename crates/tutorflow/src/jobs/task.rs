//! Task kinds of the tutoring platform and their payload shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jobs::handler::HandlerOptions;

pub const CENSOR: &str = "censor";
pub const GRADE: &str = "grade";
pub const REPORT: &str = "report";
pub const REMOVE_OBJECT: &str = "removeObject";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CensorPayload {
    pub tenant_id: String,
    pub user_locale: String,
    pub parent: String,
    pub content_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GradePayload {
    pub tenant_id: String,
    pub assignment_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReportPayload {
    pub tenant_id: String,
    pub file: String,
    #[serde(default)]
    pub arg: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoveObjectPayload {
    pub url: String,
}

/// Registration options for the platform's kinds. Only grading and report
/// jobs may be canceled while queued.
pub fn handler_options(task_kind: &str) -> HandlerOptions {
    HandlerOptions::new().cancelable(matches!(task_kind, GRADE | REPORT))
}

/// A payload tagged with the task kind that consumes it.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    Censor(CensorPayload),
    Grade(GradePayload),
    Report(ReportPayload),
    RemoveObject(RemoveObjectPayload),
}

impl TaskPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskPayload::Censor(_) => CENSOR,
            TaskPayload::Grade(_) => GRADE,
            TaskPayload::Report(_) => REPORT,
            TaskPayload::RemoveObject(_) => REMOVE_OBJECT,
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            TaskPayload::Censor(p) => serde_json::to_value(p),
            TaskPayload::Grade(p) => serde_json::to_value(p),
            TaskPayload::Report(p) => serde_json::to_value(p),
            TaskPayload::RemoveObject(p) => serde_json::to_value(p),
        }
    }

    /// Parse a stored `(task_kind, payload)` pair. `None` for kinds outside this set.
    pub fn from_parts(kind: &str, payload: &Value) -> Option<Result<Self, serde_json::Error>> {
        let parsed = match kind {
            CENSOR => serde_json::from_value(payload.clone()).map(TaskPayload::Censor),
            GRADE => serde_json::from_value(payload.clone()).map(TaskPayload::Grade),
            REPORT => serde_json::from_value(payload.clone()).map(TaskPayload::Report),
            REMOVE_OBJECT => {
                serde_json::from_value(payload.clone()).map(TaskPayload::RemoveObject)
            }
            _ => return None,
        };
        Some(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_uses_camel_case_keys() {
        let task = TaskPayload::Grade(GradePayload {
            tenant_id: "t1".into(),
            assignment_id: "a1".into(),
        });
        assert_eq!(task.kind(), "grade");
        assert_eq!(
            task.to_value().unwrap(),
            json!({"tenantId": "t1", "assignmentId": "a1"})
        );
    }

    #[test]
    fn from_parts_rejects_wrong_shape() {
        let bad = TaskPayload::from_parts(GRADE, &json!({"url": "s3://x"})).unwrap();
        assert!(bad.is_err());

        let ok = TaskPayload::from_parts(REMOVE_OBJECT, &json!({"url": "s3://x"}))
            .unwrap()
            .unwrap();
        assert_eq!(
            ok,
            TaskPayload::RemoveObject(RemoveObjectPayload {
                url: "s3://x".into()
            })
        );

        assert!(TaskPayload::from_parts("sync", &json!({})).is_none());
    }
}
