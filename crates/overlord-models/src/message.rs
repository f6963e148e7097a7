//! Job queue message body.

use serde::{Deserialize, Serialize};

/// Body of a job notification: points at the persisted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub job_request_id: String,
}

impl MessageBody {
    pub fn new(job_request_id: impl Into<String>) -> Self {
        Self {
            job_request_id: job_request_id.into(),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "job_request_id": self.job_request_id })
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_body_without_request_id() {
        let value = serde_json::json!({ "something": "else" });
        assert!(MessageBody::from_value(&value).is_err());
    }

    #[test]
    fn test_extracts_request_id() {
        let value = serde_json::json!({ "job_request_id": "req-7", "extra": 1 });
        assert_eq!(MessageBody::from_value(&value).unwrap().job_request_id, "req-7");
    }
}
