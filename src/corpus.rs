//! Corpus Store (C1, §4.1): deterministic read access to cases, evidence,
//! legal facts, and the most recent health-check output.
//!
//! Two implementations share one trait: [`InMemoryCorpusStore`] (used by
//! tests and as a seedable fixture) and [`crate::db::SqliteCorpusStore`].
//! Both filter dangling Alert/Connection case references at read time
//! (§3 invariant 2, §8 property 7) rather than rejecting them at write time,
//! so a health check that references a case deleted afterward degrades
//! gracefully instead of erroring.

use crate::models::{
    Alert, Case, CaseFilter, CaseNumber, Connection, EvidenceItem, LegalFact, LegalFilter,
    PriorityAction,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Read interface the Context Builder, Tool Registry, and HTTP surface share.
///
/// Object-safe so the server binary can hold a `Arc<dyn CorpusStore>` without
/// committing to in-memory vs. sqlite at the call sites.
#[async_trait]
pub trait CorpusStore: Send + Sync {
    async fn get_case(&self, case_number: &CaseNumber) -> Result<Case>;
    async fn get_case_markdown(&self, case_number: &CaseNumber) -> Result<String>;
    async fn search_cases(&self, filter: &CaseFilter) -> Result<Vec<CaseNumber>>;
    async fn get_legal_fact(&self, citation_token: &str) -> Result<LegalFact>;
    async fn search_legal(&self, filter: &LegalFilter) -> Result<Vec<LegalFact>>;
    async fn list_alerts(&self) -> Result<Vec<Alert>>;
    async fn list_connections(&self) -> Result<Vec<Connection>>;
    async fn list_priority_actions(&self) -> Result<Vec<PriorityAction>>;
    async fn get_evidence(&self, case_number: &CaseNumber) -> Result<Vec<EvidenceItem>>;
    async fn all_case_numbers(&self) -> Result<Vec<CaseNumber>>;

    /// Replace the health-check output wholesale (§3 Lifecycle). Implementations
    /// must make this atomic with respect to concurrent `list_*` reads.
    async fn replace_health_check_output(
        &self,
        alerts: Vec<Alert>,
        connections: Vec<Connection>,
        priority_actions: Vec<PriorityAction>,
    ) -> Result<()>;
}

/// Renders a [`Case`] into the stable markdown blob shared by every
/// implementation, so rendering logic is exercised exactly once (§4.1).
pub fn render_case_markdown(case: &Case, evidence: &[EvidenceItem]) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(1024);
    let _ = writeln!(out, "## Case {}", case.case_number);
    let _ = writeln!(out, "- Defendant: {}", case.defendant);
    let _ = writeln!(out, "- Severity: {:?}", case.severity);
    let _ = writeln!(out, "- Status: {:?}", case.status);
    let _ = writeln!(out, "- Charges: {}", case.charges.join(", "));
    if let Some(officer) = &case.officer {
        let _ = writeln!(out, "- Officer: {officer}");
    }
    if let Some(judge) = &case.judge {
        let _ = writeln!(out, "- Judge: {judge}");
    }
    if let Some(prosecutor) = &case.prosecutor {
        let _ = writeln!(out, "- Prosecutor: {prosecutor}");
    }
    if !case.witnesses.is_empty() {
        let _ = writeln!(out, "- Witnesses: {}", case.witnesses.join(", "));
    }
    if let Some(bond) = &case.bond {
        let _ = writeln!(out, "- Bond: {bond}");
    }
    if let Some(plea) = &case.plea_offer {
        let _ = writeln!(out, "- Plea offer: {plea}");
    }
    if let Some(prior) = &case.prior_record {
        let _ = writeln!(out, "- Prior record: {prior}");
    }
    for date_label in [
        ("Filing date", &case.filing_date),
        ("Arrest date", &case.arrest_date),
        ("Hearing date", &case.hearing_date),
    ] {
        if let Some(value) = date_label.1 {
            let _ = writeln!(out, "- {}: {}", date_label.0, value);
        }
    }
    if !evidence.is_empty() {
        let _ = writeln!(out, "- Evidence:");
        for item in evidence {
            let _ = writeln!(out, "  - [{:?}] {}", item.evidence_type, item.title);
        }
    }
    if let Some(notes) = &case.notes {
        let _ = writeln!(out, "- Notes: {notes}");
    }
    out
}

pub(crate) fn filter_case(case: &Case, filter: &CaseFilter) -> bool {
    if let Some(officer) = &filter.officer {
        if case.officer.as_deref() != Some(officer.as_str()) {
            return false;
        }
    }
    if let Some(charge) = &filter.charge {
        if !case.charges.iter().any(|c| c == charge) {
            return false;
        }
    }
    if let Some(status) = &filter.status {
        if &case.status != status {
            return false;
        }
    }
    if let Some((start, end)) = &filter.date_range {
        match &case.filing_date {
            Some(filing_date) => {
                if filing_date.as_str() < start.as_str() || filing_date.as_str() > end.as_str() {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

/// `Vec`/`HashMap`-backed [`CorpusStore`] used by unit/integration tests and
/// as a seedable fixture for the server binary before a demo caseload loads.
#[derive(Default)]
pub struct InMemoryCorpusStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    cases: HashMap<CaseNumber, Case>,
    evidence: HashMap<CaseNumber, Vec<EvidenceItem>>,
    legal_facts: HashMap<String, LegalFact>,
    alerts: Vec<Alert>,
    connections: Vec<Connection>,
    priority_actions: Vec<PriorityAction>,
}

impl InMemoryCorpusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_case(&self, case: Case) {
        let mut inner = self.inner.write().expect("corpus lock poisoned");
        inner.cases.insert(case.case_number.clone(), case);
    }

    pub fn seed_evidence(&self, case_number: CaseNumber, items: Vec<EvidenceItem>) {
        let mut inner = self.inner.write().expect("corpus lock poisoned");
        inner.evidence.insert(case_number, items);
    }

    pub fn seed_legal_fact(&self, fact: LegalFact) {
        let mut inner = self.inner.write().expect("corpus lock poisoned");
        inner.legal_facts.insert(fact.citation_token.clone(), fact);
    }
}

#[async_trait]
impl CorpusStore for InMemoryCorpusStore {
    async fn get_case(&self, case_number: &CaseNumber) -> Result<Case> {
        let inner = self.inner.read().expect("corpus lock poisoned");
        inner
            .cases
            .get(case_number)
            .cloned()
            .ok_or_else(|| Error::not_found(case_number.as_str()))
    }

    async fn get_case_markdown(&self, case_number: &CaseNumber) -> Result<String> {
        let inner = self.inner.read().expect("corpus lock poisoned");
        let case = inner
            .cases
            .get(case_number)
            .ok_or_else(|| Error::not_found(case_number.as_str()))?;
        let evidence = inner
            .evidence
            .get(case_number)
            .cloned()
            .unwrap_or_default();
        Ok(render_case_markdown(case, &evidence))
    }

    async fn search_cases(&self, filter: &CaseFilter) -> Result<Vec<CaseNumber>> {
        let inner = self.inner.read().expect("corpus lock poisoned");
        let mut matches: Vec<CaseNumber> = inner
            .cases
            .values()
            .filter(|c| filter_case(c, filter))
            .map(|c| c.case_number.clone())
            .collect();
        matches.sort();
        Ok(matches)
    }

    async fn get_legal_fact(&self, citation_token: &str) -> Result<LegalFact> {
        let inner = self.inner.read().expect("corpus lock poisoned");
        inner
            .legal_facts
            .get(citation_token)
            .cloned()
            .ok_or_else(|| Error::not_found(citation_token))
    }

    async fn search_legal(&self, filter: &LegalFilter) -> Result<Vec<LegalFact>> {
        let inner = self.inner.read().expect("corpus lock poisoned");
        let term = filter.term.to_lowercase();
        let mut matches: Vec<LegalFact> = inner
            .legal_facts
            .values()
            .filter(|f| {
                let matches_term = term.is_empty()
                    || f.title.to_lowercase().contains(&term)
                    || f.holding.to_lowercase().contains(&term);
                let matches_jurisdiction = filter
                    .jurisdiction
                    .as_ref()
                    .map(|j| &f.jurisdiction == j)
                    .unwrap_or(true);
                matches_term && matches_jurisdiction
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.citation_token.cmp(&b.citation_token));
        Ok(matches)
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>> {
        let inner = self.inner.read().expect("corpus lock poisoned");
        Ok(inner
            .alerts
            .iter()
            .filter(|a| {
                a.case_number
                    .as_ref()
                    .map(|cn| inner.cases.contains_key(cn))
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn list_connections(&self) -> Result<Vec<Connection>> {
        let inner = self.inner.read().expect("corpus lock poisoned");
        Ok(inner
            .connections
            .iter()
            .filter(|c| c.case_numbers.iter().all(|cn| inner.cases.contains_key(cn)))
            .cloned()
            .collect())
    }

    async fn list_priority_actions(&self) -> Result<Vec<PriorityAction>> {
        let inner = self.inner.read().expect("corpus lock poisoned");
        Ok(inner
            .priority_actions
            .iter()
            .filter(|p| inner.cases.contains_key(&p.case_number))
            .cloned()
            .collect())
    }

    async fn get_evidence(&self, case_number: &CaseNumber) -> Result<Vec<EvidenceItem>> {
        let inner = self.inner.read().expect("corpus lock poisoned");
        Ok(inner.evidence.get(case_number).cloned().unwrap_or_default())
    }

    async fn all_case_numbers(&self) -> Result<Vec<CaseNumber>> {
        let inner = self.inner.read().expect("corpus lock poisoned");
        let mut numbers: Vec<CaseNumber> = inner.cases.keys().cloned().collect();
        numbers.sort();
        Ok(numbers)
    }

    async fn replace_health_check_output(
        &self,
        alerts: Vec<Alert>,
        connections: Vec<Connection>,
        priority_actions: Vec<PriorityAction>,
    ) -> Result<()> {
        let mut inner = self.inner.write().expect("corpus lock poisoned");
        inner.alerts = alerts;
        inner.connections = connections;
        inner.priority_actions = priority_actions;
        Ok(())
    }
}
