//! CRM lead creation (Bitrix24 inbound webhook, `crm.lead.add`).
//!
//! One POST per submission, bounded by a timeout, no retries. The reply is only inspected
//! for `error` / `result`.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::submission::SubmissionRequest;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("CRM request timed out after {0:?}")]
    Timeout(Duration),

    #[error("CRM transport error: {0}")]
    Transport(String),

    #[error("CRM response could not be parsed: {0}")]
    Malformed(String),

    /// The CRM answered with an `error` field.
    #[error("CRM rejected the lead: {0}")]
    Rejected(String),
}

impl CrmError {
    /// True when the CRM could not be reached or answered garbage, as opposed to a rejection.
    pub fn is_upstream(&self) -> bool {
        !matches!(self, CrmError::Rejected(_))
    }
}

/// Lead data as it goes to the CRM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lead {
    pub name: String,
    pub email: String,
    /// Free-text contact the submitter typed (handle or phone).
    pub contact: Option<String>,
    pub scenario_title: String,
}

#[derive(Serialize)]
struct MultiField<'a> {
    #[serde(rename = "VALUE")]
    value: &'a str,
    #[serde(rename = "VALUE_TYPE")]
    value_type: &'static str,
}

impl Lead {
    pub fn new(request: &SubmissionRequest, scenario_title: &str) -> Self {
        Self {
            name: request.name.clone(),
            email: request.email.clone(),
            contact: request.raw_identity_hint.clone(),
            scenario_title: scenario_title.to_string(),
        }
    }

    /// `crm.lead.add` body.
    pub fn to_payload(&self) -> serde_json::Value {
        let phone: Vec<MultiField<'_>> = self
            .contact
            .as_deref()
            .map(|c| {
                vec![MultiField {
                    value: c,
                    value_type: "WORK",
                }]
            })
            .unwrap_or_default();

        serde_json::json!({
            "fields": {
                "TITLE": format!("Диагностика ИТ-рисков — {}", self.scenario_title),
                "NAME": self.name,
                "EMAIL": [MultiField { value: &self.email, value_type: "WORK" }],
                "PHONE": phone,
                "COMMENTS": format!(
                    "Сценарий: {}\nTelegram/Phone: {}\nEmail: {}",
                    self.scenario_title,
                    self.contact.as_deref().unwrap_or("не указан"),
                    self.email
                ),
                "SOURCE_ID": "WEB",
            },
            "params": { "REGISTER_SONET_EVENT": "Y" }
        })
    }
}

/// Where leads go. `create_lead` returns the CRM's `result` value (the new lead id).
#[async_trait::async_trait]
pub trait LeadSink: Send + Sync {
    async fn create_lead(&self, lead: &Lead) -> Result<serde_json::Value, CrmError>;
}

/// Bitrix24 inbound webhook client.
#[derive(Debug, Clone)]
pub struct BitrixCrm {
    client: reqwest::Client,
    webhook_url: String,
    timeout: Duration,
}

impl BitrixCrm {
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Result<Self, CrmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CrmError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            timeout,
        })
    }

    fn classify(&self, err: reqwest::Error) -> CrmError {
        if err.is_timeout() {
            CrmError::Timeout(self.timeout)
        } else if err.is_decode() {
            CrmError::Malformed(err.to_string())
        } else {
            CrmError::Transport(err.to_string())
        }
    }
}

/// Interprets a CRM reply body: an `error` field is a rejection, otherwise `result` is the id.
pub fn interpret_reply(reply: &serde_json::Value) -> Result<serde_json::Value, CrmError> {
    if !reply.is_object() {
        return Err(CrmError::Malformed(format!("expected an object, got {}", reply)));
    }
    if let Some(error) = reply.get("error") {
        let detail = reply
            .get("error_description")
            .and_then(|d| d.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| match error {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        return Err(CrmError::Rejected(detail));
    }
    Ok(reply.get("result").cloned().unwrap_or(serde_json::Value::Null))
}

#[async_trait::async_trait]
impl LeadSink for BitrixCrm {
    async fn create_lead(&self, lead: &Lead) -> Result<serde_json::Value, CrmError> {
        let reply: serde_json::Value = self
            .client
            .post(&self.webhook_url)
            .json(&lead.to_payload())
            .send()
            .await
            .map_err(|e| self.classify(e))?
            .json()
            .await
            .map_err(|e| self.classify(e))?;

        match interpret_reply(&reply) {
            Ok(id) => {
                tracing::info!(lead_id = %id, scenario = %lead.scenario_title, "CRM lead created");
                Ok(id)
            }
            Err(e) => {
                tracing::warn!(error = %e, reply = %reply, "CRM did not create the lead");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(contact: Option<&str>) -> Lead {
        Lead {
            name: "Alice".into(),
            email: "alice@x.com".into(),
            contact: contact.map(str::to_string),
            scenario_title: "Подготовка запуска ИТ-проекта".into(),
        }
    }

    #[test]
    fn payload_matches_lead_add_shape() {
        let payload = lead(Some("@alice_w")).to_payload();
        let fields = &payload["fields"];

        assert_eq!(fields["TITLE"], "Диагностика ИТ-рисков — Подготовка запуска ИТ-проекта");
        assert_eq!(fields["NAME"], "Alice");
        assert_eq!(fields["EMAIL"][0]["VALUE"], "alice@x.com");
        assert_eq!(fields["EMAIL"][0]["VALUE_TYPE"], "WORK");
        assert_eq!(fields["PHONE"][0]["VALUE"], "@alice_w");
        assert_eq!(fields["SOURCE_ID"], "WEB");
        assert_eq!(payload["params"]["REGISTER_SONET_EVENT"], "Y");
        assert!(fields["COMMENTS"]
            .as_str()
            .unwrap()
            .contains("Telegram/Phone: @alice_w"));
    }

    #[test]
    fn payload_without_contact() {
        let payload = lead(None).to_payload();
        assert_eq!(payload["fields"]["PHONE"], serde_json::json!([]));
        assert!(payload["fields"]["COMMENTS"]
            .as_str()
            .unwrap()
            .contains("Telegram/Phone: не указан"));
    }

    #[test]
    fn reply_interpretation() {
        assert_eq!(
            interpret_reply(&serde_json::json!({"result": 9001, "time": {}})).unwrap(),
            serde_json::json!(9001)
        );
        match interpret_reply(&serde_json::json!({
            "error": "INVALID_CREDENTIALS",
            "error_description": "Invalid request credentials"
        })) {
            Err(CrmError::Rejected(detail)) => assert_eq!(detail, "Invalid request credentials"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            interpret_reply(&serde_json::json!({"error": "QUERY_LIMIT_EXCEEDED"})),
            Err(CrmError::Rejected(d)) if d == "QUERY_LIMIT_EXCEEDED"
        ));
        assert!(matches!(
            interpret_reply(&serde_json::json!("nope")),
            Err(CrmError::Malformed(_))
        ));
    }

    #[test]
    fn rejection_is_not_an_upstream_failure() {
        assert!(!CrmError::Rejected("x".into()).is_upstream());
        assert!(CrmError::Timeout(Duration::from_secs(10)).is_upstream());
        assert!(CrmError::Malformed("x".into()).is_upstream());
    }

    #[tokio::test]
    async fn unreachable_crm_is_a_transport_error() {
        let crm = BitrixCrm::new("http://127.0.0.1:9/rest/crm.lead.add", Duration::from_secs(2))
            .unwrap();
        let err = crm.create_lead(&lead(None)).await.unwrap_err();
        assert!(err.is_upstream());
    }
}
