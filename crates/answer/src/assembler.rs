//! Context assembler: turns an answer request into a deterministic prompt.
//!
//! The same request always renders the same bytes. Numbers are formatted
//! with US grouping independent of the host locale.

use fieldsage_core::context::{AnswerRequest, FieldContext, ProjectContext};
use fieldsage_core::error::Result;

const NOT_FILLED: &str = "Not filled";
const NOT_SPECIFIED: &str = "Not specified";

/// System and user halves of a model prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Append schema-specific instructions to the system prompt.
    pub fn with_instructions(mut self, instructions: Option<&str>) -> Self {
        if let Some(text) = instructions.filter(|t| !t.is_empty()) {
            self.system.push_str("\n\n");
            self.system.push_str(text);
        }
        self
    }

    /// Append a rendered history block to the user prompt.
    pub fn with_history(mut self, history_block: &str) -> Self {
        self.user.push_str(history_block);
        self
    }
}

/// Build the prompt for a request.
///
/// Fails with `InvalidRequest` when either context object is missing.
pub fn build_prompt(request: &AnswerRequest) -> Result<Prompt> {
    let (field, project) = request.contexts()?;
    Ok(Prompt {
        system: system_prompt(field, project),
        user: user_prompt(request.question.as_deref(), field),
    })
}

fn system_prompt(field: &FieldContext, project: &ProjectContext) -> String {
    let current_value = field
        .current_value
        .as_deref()
        .filter(|v| !v.is_empty())
        .unwrap_or(NOT_FILLED);

    format!(
        "You are an expert commercial real estate finance advisor helping a sponsor complete a loan application.\n\
         \n\
         The user is working on the following field:\n\
         - Field: {label}\n\
         - Type: {field_type}\n\
         - Section: {section}\n\
         - Current value: {current_value}\n\
         \n\
         Project details:\n\
         - Project name: {project_name}\n\
         - Asset type: {asset_type}\n\
         - Project phase: {project_phase}\n\
         - Loan amount requested: {loan_amount}\n\
         - Target LTV: {target_ltv}\n\
         - Location: {location}\n\
         \n\
         Answer the user's question about this field using the project details above. \
         Format your response in markdown. Use **bold** for key points and bullet lists for actionable items. \
         Keep the answer specific to this project and field.",
        label = field.label,
        field_type = field.field_type,
        section = field.section,
        project_name = project.project_name,
        asset_type = project.asset_type,
        project_phase = project.project_phase,
        loan_amount = format_loan_amount(project.loan_amount_requested),
        target_ltv = format_ltv(project.target_ltv_percent),
        location = format_location(project),
    )
}

fn user_prompt(question: Option<&str>, field: &FieldContext) -> String {
    match question.filter(|q| !q.is_empty()) {
        Some(q) => q.to_string(),
        None => format!(
            "Please provide guidance on completing the '{}' field for this project.",
            field.label
        ),
    }
}

/// `$` followed by the US-grouped amount, or `$Not specified`.
pub fn format_loan_amount(amount: Option<f64>) -> String {
    match amount {
        Some(value) => format!("${}", format_us_number(value)),
        None => format!("${NOT_SPECIFIED}"),
    }
}

/// `<n>%` or `Not specified`.
pub fn format_ltv(percent: Option<f64>) -> String {
    match percent {
        Some(value) => format!("{}%", format_us_number(value)),
        None => NOT_SPECIFIED.to_string(),
    }
}

fn format_location(project: &ProjectContext) -> String {
    let parts: Vec<&str> = [
        project.property_address_city.as_str(),
        project.property_address_state.as_str(),
    ]
    .into_iter()
    .filter(|p| !p.is_empty())
    .collect();

    if parts.is_empty() {
        NOT_SPECIFIED.to_string()
    } else {
        parts.join(", ")
    }
}

/// Format a number the way en-US locale formatting does: comma-grouped
/// integer digits, at most three fraction digits, trailing zeros trimmed.
pub fn format_us_number(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }

    let rounded = (value * 1000.0).round() / 1000.0;
    let fixed = format!("{:.3}", rounded.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let frac = frac_part.trim_end_matches('0');

    let mut out = String::with_capacity(fixed.len() + int_part.len() / 3 + 1);
    if rounded < 0.0 {
        out.push('-');
    }
    out.push_str(&group_thousands(int_part));
    if !frac.is_empty() {
        out.push('.');
        out.push_str(frac);
    }
    out
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
