//! Data model for Case Nexus (§3): cases, evidence, legal facts, and the
//! derived records health-check and cross-case analysis produce.
//!
//! These are semantic types, not storage types — [`crate::db`] and
//! [`crate::corpus`] are responsible for mapping them to rows and back.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Validated case identifier. Non-empty, trimmed, globally unique (§3 invariant 1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseNumber(String);

impl CaseNumber {
    pub fn new(value: impl Into<String>) -> Result<Self, crate::Error> {
        let trimmed = value.into().trim().to_string();
        if trimmed.is_empty() {
            return Err(crate::Error::invalid_input("case_number must not be empty"));
        }
        Ok(Self(trimmed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CaseNumber> for String {
    fn from(value: CaseNumber) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Felony,
    Misdemeanor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Open,
    Pending,
    PleaOffered,
    InTrial,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Dashcam,
    Surveillance,
    BodyCam,
    Photograph,
    Document,
    CrimeScene,
    Medical,
    Physical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    ThisWeek,
    ThisMonth,
    Routine,
}

/// Closed enum of the nine Workflow Engine outputs (§4.6), tagging [`Insight::result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    HealthCheck,
    DeepAnalysis,
    Adversarial,
    Motion,
    Evidence,
    Chat,
    HearingPrep,
    ClientLetter,
    Cascade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub case_number: CaseNumber,
    pub defendant: String,
    pub severity: Severity,
    pub status: CaseStatus,
    pub charges: Vec<String>,
    pub filing_date: Option<String>,
    pub arrest_date: Option<String>,
    pub hearing_date: Option<String>,
    pub officer: Option<String>,
    pub judge: Option<String>,
    pub prosecutor: Option<String>,
    pub witnesses: Vec<String>,
    pub bond: Option<String>,
    pub plea_offer: Option<String>,
    pub prior_record: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    pub case_number: CaseNumber,
    pub evidence_type: EvidenceType,
    pub media_path: Option<String>,
    pub poster_path: Option<String>,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalFact {
    pub citation_token: String,
    pub jurisdiction: String,
    pub title: String,
    pub holding: String,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: AlertSeverity,
    pub alert_type: String,
    pub case_number: Option<CaseNumber>,
    pub title: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub connection_type: String,
    pub confidence: f32,
    pub case_numbers: Vec<CaseNumber>,
    pub title: String,
    pub description: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityAction {
    pub case_number: CaseNumber,
    pub action: String,
    pub urgency: Urgency,
    pub reason: String,
}

/// Either a specific case or the caseload-wide sentinel (§3, §9 "Scope").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Scope {
    FullCaseload,
    Case { case_number: CaseNumber },
}

impl Scope {
    pub fn case(case_number: &CaseNumber) -> Self {
        Scope::Case {
            case_number: case_number.clone(),
        }
    }

    pub fn as_case_number(&self) -> Option<&CaseNumber> {
        match self {
            Scope::FullCaseload => None,
            Scope::Case { case_number } => Some(case_number),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::FullCaseload => f.write_str("full_caseload"),
            Scope::Case { case_number } => write!(f, "{case_number}"),
        }
    }
}

/// One completed analysis run (§3). Created at workflow completion; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: u64,
    pub analysis_type: AnalysisType,
    pub scope: Scope,
    pub result: serde_json::Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolInvocationStatus {
    Calling,
    Executing,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_id: String,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub status: ToolInvocationStatus,
    pub result_preview: Option<String>,
    pub result_length: Option<usize>,
}

/// Process-wide cumulative token tally (§4.10). Never decremented (§3 invariant 6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTally {
    pub total_input: u64,
    pub total_output: u64,
    pub total_thinking: u64,
    pub call_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CaseFilter {
    pub officer: Option<String>,
    pub charge: Option<String>,
    pub status: Option<CaseStatus>,
    pub date_range: Option<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct LegalFilter {
    pub term: String,
    pub jurisdiction: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_number_rejects_empty() {
        assert!(CaseNumber::new("   ").is_err());
    }

    #[test]
    fn case_number_trims() {
        let cn = CaseNumber::new("  CR-12 \n").unwrap();
        assert_eq!(cn.as_str(), "CR-12");
    }

    #[test]
    fn scope_display_matches_sentinel() {
        assert_eq!(Scope::FullCaseload.to_string(), "full_caseload");
        let cn = CaseNumber::new("CR-12").unwrap();
        assert_eq!(Scope::case(&cn).to_string(), "CR-12");
    }

    #[test]
    fn analysis_type_round_trips_snake_case() {
        let json = serde_json::to_string(&AnalysisType::HealthCheck).unwrap();
        assert_eq!(json, "\"health_check\"");
    }
}
