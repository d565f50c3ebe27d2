//! Request-scoped context objects: the form field, the enclosing project, and
//! the inbound answer request that carries them.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::message::ChatMessage;
use crate::schema::SchemaKind;

/// The specific form input the user is asking about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldContext {
    pub label: String,

    /// Input type as declared by the form (e.g. "currency", "text")
    #[serde(rename = "type")]
    pub field_type: String,

    pub section: String,

    #[serde(default)]
    pub current_value: Option<String>,
}

/// The project record the form belongs to.
///
/// Financial figures are opaque inputs; the engine only formats them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectContext {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub project_name: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub asset_type: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub project_phase: String,

    #[serde(default)]
    pub loan_amount_requested: Option<f64>,

    #[serde(default)]
    pub target_ltv_percent: Option<f64>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub property_address_city: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub property_address_state: String,
}

/// Project records often carry `null` for fields nobody filled in.
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// The inbound request body of `POST /answer`.
///
/// Both contexts are optional at the wire level so that their absence can be
/// reported as an `InvalidRequest` instead of a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    #[serde(default)]
    pub field_context: Option<FieldContext>,

    #[serde(default)]
    pub project_context: Option<ProjectContext>,

    /// Absent means "give general guidance on this field".
    #[serde(default)]
    pub question: Option<String>,

    #[serde(default)]
    pub chat_history: Option<Vec<ChatMessage>>,

    /// Output shape override; the engine default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<SchemaKind>,
}

impl AnswerRequest {
    /// Borrow both required contexts, or fail without side effects.
    pub fn contexts(&self) -> Result<(&FieldContext, &ProjectContext)> {
        match (&self.field_context, &self.project_context) {
            (Some(field), Some(project)) => Ok((field, project)),
            (None, _) => Err(Error::InvalidRequest("fieldContext is missing".into())),
            (_, None) => Err(Error::InvalidRequest("projectContext is missing".into())),
        }
    }

    /// The chat history, or an empty slice.
    pub fn history(&self) -> &[ChatMessage] {
        self.chat_history.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_REQUEST: &str = r#"{
        "fieldContext": {"label": "Loan Amount", "type": "currency", "section": "Loan Terms", "currentValue": null},
        "projectContext": {
            "projectName": "Riverside Apartments",
            "assetType": "Multifamily",
            "projectPhase": "Acquisition",
            "loanAmountRequested": 5000000,
            "targetLtvPercent": 70,
            "propertyAddressCity": "Austin",
            "propertyAddressState": "TX"
        },
        "question": "What loan amount should I request?",
        "chatHistory": null
    }"#;

    #[test]
    fn parses_full_request() {
        let req: AnswerRequest = serde_json::from_str(FULL_REQUEST).unwrap();
        let (field, project) = req.contexts().unwrap();
        assert_eq!(field.label, "Loan Amount");
        assert_eq!(field.field_type, "currency");
        assert!(field.current_value.is_none());
        assert_eq!(project.loan_amount_requested, Some(5_000_000.0));
        assert_eq!(project.target_ltv_percent, Some(70.0));
        assert!(req.history().is_empty());
        assert!(req.output_schema.is_none());
    }

    #[test]
    fn missing_field_context_is_invalid() {
        let req: AnswerRequest =
            serde_json::from_str(r#"{"projectContext": {"projectName": "X"}}"#).unwrap();
        assert!(matches!(req.contexts(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn missing_project_context_is_invalid() {
        let req: AnswerRequest = serde_json::from_str(
            r#"{"fieldContext": {"label": "NOI", "type": "currency", "section": "Financials"}}"#,
        )
        .unwrap();
        assert!(matches!(req.contexts(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn null_project_strings_read_as_empty() {
        let req: AnswerRequest = serde_json::from_str(
            r#"{
                "fieldContext": {"label": "Loan Amount", "type": "currency", "section": "Loan Terms"},
                "projectContext": {
                    "projectName": "Riverside Apartments",
                    "assetType": null,
                    "projectPhase": null,
                    "loanAmountRequested": null,
                    "propertyAddressCity": null,
                    "propertyAddressState": "TX"
                }
            }"#,
        )
        .unwrap();
        let (_, project) = req.contexts().unwrap();
        assert_eq!(project.project_name, "Riverside Apartments");
        assert!(project.asset_type.is_empty());
        assert!(project.property_address_city.is_empty());
        assert_eq!(project.property_address_state, "TX");
        assert!(project.loan_amount_requested.is_none());
    }

    #[test]
    fn schema_override_parses() {
        let req: AnswerRequest =
            serde_json::from_str(r#"{"outputSchema": "with_assumptions"}"#).unwrap();
        assert_eq!(req.output_schema, Some(SchemaKind::WithAssumptions));
    }
}
