//! Sqlite persistence (§6 "the server binary persists to a single sqlite
//! file"): a [`crate::corpus::CorpusStore`] implementation and a durable
//! Insight Log, both backed by one [`rusqlite::Connection`] behind a mutex.
//!
//! Schema is created with `CREATE TABLE IF NOT EXISTS` on open, matching the
//! teacher SDK's preference for fallible setup happening once at
//! construction rather than scattered through call sites. `PRAGMA
//! journal_mode=WAL` is set so read-heavy Context Builder calls don't block
//! on a concurrent health-check write.

use crate::models::{
    Alert, AlertSeverity, Case, CaseFilter, CaseNumber, CaseStatus, Connection, EvidenceItem,
    EvidenceType, Insight, LegalFact, LegalFilter, PriorityAction, Scope, Severity, Urgency,
};
use crate::{Error, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection as SqliteConnection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Single-file sqlite store backing [`crate::corpus::CorpusStore`] and the
/// durable variant of [`crate::insight_log::InsightLog`].
pub struct SqliteCorpusStore {
    conn: Mutex<SqliteConnection>,
}

impl SqliteCorpusStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = SqliteConnection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = SqliteConnection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("db lock poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cases (
                case_number TEXT PRIMARY KEY,
                defendant TEXT NOT NULL,
                severity TEXT NOT NULL,
                status TEXT NOT NULL,
                charges_json TEXT NOT NULL,
                filing_date TEXT,
                arrest_date TEXT,
                hearing_date TEXT,
                officer TEXT,
                judge TEXT,
                prosecutor TEXT,
                witnesses_json TEXT NOT NULL,
                bond TEXT,
                plea_offer TEXT,
                prior_record TEXT,
                notes TEXT
            );

            CREATE TABLE IF NOT EXISTS evidence (
                id TEXT PRIMARY KEY,
                case_number TEXT NOT NULL,
                evidence_type TEXT NOT NULL,
                media_path TEXT,
                poster_path TEXT,
                title TEXT NOT NULL,
                description TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_evidence_case ON evidence(case_number);

            CREATE TABLE IF NOT EXISTS legal_facts (
                citation_token TEXT PRIMARY KEY,
                jurisdiction TEXT NOT NULL,
                title TEXT NOT NULL,
                holding TEXT NOT NULL,
                summary TEXT
            );

            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                severity TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                case_number TEXT,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                details_json TEXT
            );

            CREATE TABLE IF NOT EXISTS connections (
                id TEXT PRIMARY KEY,
                connection_type TEXT NOT NULL,
                confidence REAL NOT NULL,
                case_numbers_json TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                suggestion TEXT
            );

            CREATE TABLE IF NOT EXISTS priority_actions (
                case_number TEXT NOT NULL,
                action TEXT NOT NULL,
                urgency TEXT NOT NULL,
                reason TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS insights (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                analysis_type TEXT NOT NULL,
                scope_json TEXT NOT NULL,
                result_json TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id TEXT NOT NULL,
                message_json TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chat_history_client ON chat_history(client_id);
            "#,
        )?;
        Ok(())
    }

    /// Replaces the demo caseload wholesale: used by the `load_demo_caseload`
    /// server command (§6). Cases/evidence/legal facts are cleared first so
    /// re-running the demo load doesn't leave stale rows behind.
    pub fn load_caseload(
        &self,
        cases: Vec<Case>,
        evidence: Vec<EvidenceItem>,
        legal_facts: Vec<LegalFact>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().expect("db lock poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cases", [])?;
        tx.execute("DELETE FROM evidence", [])?;
        tx.execute("DELETE FROM legal_facts", [])?;

        for case in cases {
            tx.execute(
                "INSERT INTO cases (case_number, defendant, severity, status, charges_json, \
                 filing_date, arrest_date, hearing_date, officer, judge, prosecutor, \
                 witnesses_json, bond, plea_offer, prior_record, notes) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    case.case_number.as_str(),
                    case.defendant,
                    severity_to_str(case.severity),
                    status_to_str(case.status),
                    serde_json::to_string(&case.charges)?,
                    case.filing_date,
                    case.arrest_date,
                    case.hearing_date,
                    case.officer,
                    case.judge,
                    case.prosecutor,
                    serde_json::to_string(&case.witnesses)?,
                    case.bond,
                    case.plea_offer,
                    case.prior_record,
                    case.notes,
                ],
            )?;
        }

        for item in evidence {
            tx.execute(
                "INSERT INTO evidence (id, case_number, evidence_type, media_path, poster_path, \
                 title, description) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    item.id,
                    item.case_number.as_str(),
                    evidence_type_to_str(item.evidence_type),
                    item.media_path,
                    item.poster_path,
                    item.title,
                    item.description,
                ],
            )?;
        }

        for fact in legal_facts {
            tx.execute(
                "INSERT INTO legal_facts (citation_token, jurisdiction, title, holding, summary) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![fact.citation_token, fact.jurisdiction, fact.title, fact.holding, fact.summary],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Appends one completed analysis to the durable Insight Log.
    pub fn append_insight(
        &self,
        analysis_type: crate::models::AnalysisType,
        scope: Scope,
        result: serde_json::Value,
        timestamp: String,
    ) -> Result<Insight> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let analysis_type_str = serde_json::to_value(analysis_type)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let scope_json = serde_json::to_string(&scope)?;
        let result_json = serde_json::to_string(&result)?;
        conn.execute(
            "INSERT INTO insights (analysis_type, scope_json, result_json, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![analysis_type_str, scope_json, result_json, timestamp],
        )?;
        let id = conn.last_insert_rowid() as u64;
        Ok(Insight { id, analysis_type, scope, result, timestamp })
    }

    pub fn list_insights(
        &self,
        scope: Option<Scope>,
        analysis_type: Option<crate::models::AnalysisType>,
        limit: Option<usize>,
    ) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, analysis_type, scope_json, result_json, timestamp FROM insights ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)? as u64,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, analysis_type_str, scope_json, result_json, timestamp) = row?;
            let row_type: crate::models::AnalysisType =
                serde_json::from_value(serde_json::Value::String(analysis_type_str))?;
            if let Some(wanted) = analysis_type {
                if wanted != row_type {
                    continue;
                }
            }
            let row_scope: Scope = serde_json::from_str(&scope_json)?;
            if let Some(wanted) = &scope {
                if wanted != &row_scope {
                    continue;
                }
            }
            let result: serde_json::Value = serde_json::from_str(&result_json)?;
            out.push(Insight { id, analysis_type: row_type, scope: row_scope, result, timestamp });
            if let Some(limit) = limit {
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    pub fn append_chat_message(&self, client_id: &str, message: &crate::types::Message, timestamp: String) -> Result<()> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let message_json = serde_json::to_string(message)?;
        conn.execute(
            "INSERT INTO chat_history (client_id, message_json, timestamp) VALUES (?1, ?2, ?3)",
            params![client_id, message_json, timestamp],
        )?;
        Ok(())
    }

    pub fn clear_chat_history(&self, client_id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("db lock poisoned");
        conn.execute("DELETE FROM chat_history WHERE client_id = ?1", params![client_id])?;
        Ok(())
    }
}

fn severity_to_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Felony => "felony",
        Severity::Misdemeanor => "misdemeanor",
    }
}

fn severity_from_str(s: &str) -> Result<Severity> {
    match s {
        "felony" => Ok(Severity::Felony),
        "misdemeanor" => Ok(Severity::Misdemeanor),
        other => Err(Error::parse(format!("unknown severity: {other}"))),
    }
}

fn status_to_str(status: CaseStatus) -> &'static str {
    match status {
        CaseStatus::Open => "open",
        CaseStatus::Pending => "pending",
        CaseStatus::PleaOffered => "plea_offered",
        CaseStatus::InTrial => "in_trial",
        CaseStatus::Closed => "closed",
    }
}

fn status_from_str(s: &str) -> Result<CaseStatus> {
    match s {
        "open" => Ok(CaseStatus::Open),
        "pending" => Ok(CaseStatus::Pending),
        "plea_offered" => Ok(CaseStatus::PleaOffered),
        "in_trial" => Ok(CaseStatus::InTrial),
        "closed" => Ok(CaseStatus::Closed),
        other => Err(Error::parse(format!("unknown case status: {other}"))),
    }
}

fn evidence_type_to_str(kind: EvidenceType) -> &'static str {
    match kind {
        EvidenceType::Dashcam => "dashcam",
        EvidenceType::Surveillance => "surveillance",
        EvidenceType::BodyCam => "body_cam",
        EvidenceType::Photograph => "photograph",
        EvidenceType::Document => "document",
        EvidenceType::CrimeScene => "crime_scene",
        EvidenceType::Medical => "medical",
        EvidenceType::Physical => "physical",
    }
}

fn evidence_type_from_str(s: &str) -> Result<EvidenceType> {
    match s {
        "dashcam" => Ok(EvidenceType::Dashcam),
        "surveillance" => Ok(EvidenceType::Surveillance),
        "body_cam" => Ok(EvidenceType::BodyCam),
        "photograph" => Ok(EvidenceType::Photograph),
        "document" => Ok(EvidenceType::Document),
        "crime_scene" => Ok(EvidenceType::CrimeScene),
        "medical" => Ok(EvidenceType::Medical),
        "physical" => Ok(EvidenceType::Physical),
        other => Err(Error::parse(format!("unknown evidence type: {other}"))),
    }
}

fn alert_severity_to_str(severity: AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Critical => "critical",
        AlertSeverity::Warning => "warning",
        AlertSeverity::Info => "info",
    }
}

fn alert_severity_from_str(s: &str) -> Result<AlertSeverity> {
    match s {
        "critical" => Ok(AlertSeverity::Critical),
        "warning" => Ok(AlertSeverity::Warning),
        "info" => Ok(AlertSeverity::Info),
        other => Err(Error::parse(format!("unknown alert severity: {other}"))),
    }
}

fn urgency_to_str(urgency: Urgency) -> &'static str {
    match urgency {
        Urgency::ThisWeek => "this_week",
        Urgency::ThisMonth => "this_month",
        Urgency::Routine => "routine",
    }
}

fn urgency_from_str(s: &str) -> Result<Urgency> {
    match s {
        "this_week" => Ok(Urgency::ThisWeek),
        "this_month" => Ok(Urgency::ThisMonth),
        "routine" => Ok(Urgency::Routine),
        other => Err(Error::parse(format!("unknown urgency: {other}"))),
    }
}

fn row_to_case(row: &rusqlite::Row<'_>) -> rusqlite::Result<Case> {
    let case_number: String = row.get("case_number")?;
    let severity: String = row.get("severity")?;
    let status: String = row.get("status")?;
    let charges_json: String = row.get("charges_json")?;
    let witnesses_json: String = row.get("witnesses_json")?;

    Ok(Case {
        case_number: CaseNumber::new(case_number)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        defendant: row.get("defendant")?,
        severity: severity_from_str(&severity)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        status: status_from_str(&status)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        charges: serde_json::from_str(&charges_json).unwrap_or_default(),
        filing_date: row.get("filing_date")?,
        arrest_date: row.get("arrest_date")?,
        hearing_date: row.get("hearing_date")?,
        officer: row.get("officer")?,
        judge: row.get("judge")?,
        prosecutor: row.get("prosecutor")?,
        witnesses: serde_json::from_str(&witnesses_json).unwrap_or_default(),
        bond: row.get("bond")?,
        plea_offer: row.get("plea_offer")?,
        prior_record: row.get("prior_record")?,
        notes: row.get("notes")?,
    })
}

fn row_to_evidence(row: &rusqlite::Row<'_>) -> rusqlite::Result<EvidenceItem> {
    let case_number: String = row.get("case_number")?;
    let evidence_type: String = row.get("evidence_type")?;
    Ok(EvidenceItem {
        id: row.get("id")?,
        case_number: CaseNumber::new(case_number)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        evidence_type: evidence_type_from_str(&evidence_type)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        media_path: row.get("media_path")?,
        poster_path: row.get("poster_path")?,
        title: row.get("title")?,
        description: row.get("description")?,
    })
}

fn row_to_legal_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<LegalFact> {
    Ok(LegalFact {
        citation_token: row.get("citation_token")?,
        jurisdiction: row.get("jurisdiction")?,
        title: row.get("title")?,
        holding: row.get("holding")?,
        summary: row.get("summary")?,
    })
}

/// Drops an Alert/Connection/PriorityAction whose case reference no longer
/// exists in `cases`, mirroring [`crate::corpus::InMemoryCorpusStore`]'s
/// read-time filtering (§3 invariant 2) at the sqlite layer.
fn case_exists(conn: &SqliteConnection, case_number: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM cases WHERE case_number = ?1",
        params![case_number],
        |_| Ok(()),
    )
    .optional()
    .map(|r| r.is_some())
}

#[async_trait]
impl crate::corpus::CorpusStore for SqliteCorpusStore {
    async fn get_case(&self, case_number: &CaseNumber) -> Result<Case> {
        let conn = self.conn.lock().expect("db lock poisoned");
        conn.query_row(
            "SELECT * FROM cases WHERE case_number = ?1",
            params![case_number.as_str()],
            row_to_case,
        )
        .optional()?
        .ok_or_else(|| Error::not_found(case_number.as_str()))
    }

    async fn get_case_markdown(&self, case_number: &CaseNumber) -> Result<String> {
        let case = self.get_case(case_number).await?;
        let evidence = self.get_evidence(case_number).await?;
        Ok(crate::corpus::render_case_markdown(&case, &evidence))
    }

    async fn search_cases(&self, filter: &CaseFilter) -> Result<Vec<CaseNumber>> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let mut stmt = conn.prepare("SELECT * FROM cases ORDER BY case_number ASC")?;
        let rows = stmt.query_map([], row_to_case)?;
        let mut out = Vec::new();
        for row in rows {
            let case = row?;
            if crate::corpus::filter_case(&case, filter) {
                out.push(case.case_number);
            }
        }
        Ok(out)
    }

    async fn get_legal_fact(&self, citation_token: &str) -> Result<LegalFact> {
        let conn = self.conn.lock().expect("db lock poisoned");
        conn.query_row(
            "SELECT * FROM legal_facts WHERE citation_token = ?1",
            params![citation_token],
            row_to_legal_fact,
        )
        .optional()?
        .ok_or_else(|| Error::not_found(citation_token))
    }

    async fn search_legal(&self, filter: &LegalFilter) -> Result<Vec<LegalFact>> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let mut stmt = conn.prepare("SELECT * FROM legal_facts ORDER BY citation_token ASC")?;
        let rows = stmt.query_map([], row_to_legal_fact)?;
        let term = filter.term.to_lowercase();
        let mut out = Vec::new();
        for row in rows {
            let fact = row?;
            let matches_term = term.is_empty()
                || fact.title.to_lowercase().contains(&term)
                || fact.holding.to_lowercase().contains(&term);
            let matches_jurisdiction = filter
                .jurisdiction
                .as_ref()
                .map(|j| &fact.jurisdiction == j)
                .unwrap_or(true);
            if matches_term && matches_jurisdiction {
                out.push(fact);
            }
        }
        Ok(out)
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let mut stmt = conn.prepare("SELECT * FROM alerts")?;
        let rows = stmt.query_map([], |row| {
            let severity: String = row.get("severity")?;
            let case_number: Option<String> = row.get("case_number")?;
            let details_json: Option<String> = row.get("details_json")?;
            Ok((
                row.get::<_, String>("id")?,
                severity,
                row.get::<_, String>("alert_type")?,
                case_number,
                row.get::<_, String>("title")?,
                row.get::<_, String>("message")?,
                details_json,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, severity, alert_type, case_number, title, message, details_json) = row?;
            if let Some(cn) = &case_number {
                if !case_exists(&conn, cn)? {
                    continue;
                }
            }
            out.push(Alert {
                id,
                severity: alert_severity_from_str(&severity)?,
                alert_type,
                case_number: case_number.map(CaseNumber::new).transpose()?,
                title,
                message,
                details: details_json.and_then(|s| serde_json::from_str(&s).ok()),
            });
        }
        Ok(out)
    }

    async fn list_connections(&self) -> Result<Vec<Connection>> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let mut stmt = conn.prepare("SELECT * FROM connections")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>("id")?,
                row.get::<_, String>("connection_type")?,
                row.get::<_, f32>("confidence")?,
                row.get::<_, String>("case_numbers_json")?,
                row.get::<_, String>("title")?,
                row.get::<_, String>("description")?,
                row.get::<_, Option<String>>("suggestion")?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, connection_type, confidence, case_numbers_json, title, description, suggestion) = row?;
            let case_number_strs: Vec<String> = serde_json::from_str(&case_numbers_json).unwrap_or_default();
            let mut all_exist = true;
            let mut case_numbers = Vec::with_capacity(case_number_strs.len());
            for s in case_number_strs {
                if !case_exists(&conn, &s)? {
                    all_exist = false;
                    break;
                }
                case_numbers.push(CaseNumber::new(s)?);
            }
            if !all_exist {
                continue;
            }
            out.push(Connection {
                id,
                connection_type,
                confidence,
                case_numbers,
                title,
                description,
                suggestion,
            });
        }
        Ok(out)
    }

    async fn list_priority_actions(&self) -> Result<Vec<PriorityAction>> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let mut stmt = conn.prepare("SELECT * FROM priority_actions")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>("case_number")?,
                row.get::<_, String>("action")?,
                row.get::<_, String>("urgency")?,
                row.get::<_, String>("reason")?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (case_number, action, urgency, reason) = row?;
            if !case_exists(&conn, &case_number)? {
                continue;
            }
            out.push(PriorityAction {
                case_number: CaseNumber::new(case_number)?,
                action,
                urgency: urgency_from_str(&urgency)?,
                reason,
            });
        }
        Ok(out)
    }

    async fn get_evidence(&self, case_number: &CaseNumber) -> Result<Vec<EvidenceItem>> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let mut stmt = conn.prepare("SELECT * FROM evidence WHERE case_number = ?1")?;
        let rows = stmt.query_map(params![case_number.as_str()], row_to_evidence)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn all_case_numbers(&self) -> Result<Vec<CaseNumber>> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let mut stmt = conn.prepare("SELECT case_number FROM cases ORDER BY case_number ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(CaseNumber::new(row?)?);
        }
        Ok(out)
    }

    async fn replace_health_check_output(
        &self,
        alerts: Vec<Alert>,
        connections: Vec<Connection>,
        priority_actions: Vec<PriorityAction>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().expect("db lock poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM alerts", [])?;
        tx.execute("DELETE FROM connections", [])?;
        tx.execute("DELETE FROM priority_actions", [])?;

        for alert in alerts {
            tx.execute(
                "INSERT INTO alerts (id, severity, alert_type, case_number, title, message, details_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    alert.id,
                    alert_severity_to_str(alert.severity),
                    alert.alert_type,
                    alert.case_number.as_ref().map(CaseNumber::as_str),
                    alert.title,
                    alert.message,
                    alert.details.as_ref().map(|v| v.to_string()),
                ],
            )?;
        }

        for connection in connections {
            let case_numbers_json = serde_json::to_string(
                &connection.case_numbers.iter().map(CaseNumber::as_str).collect::<Vec<_>>(),
            )?;
            tx.execute(
                "INSERT INTO connections (id, connection_type, confidence, case_numbers_json, title, description, suggestion) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    connection.id,
                    connection.connection_type,
                    connection.confidence,
                    case_numbers_json,
                    connection.title,
                    connection.description,
                    connection.suggestion,
                ],
            )?;
        }

        for action in priority_actions {
            tx.execute(
                "INSERT INTO priority_actions (case_number, action, urgency, reason) VALUES (?1, ?2, ?3, ?4)",
                params![action.case_number.as_str(), action.action, urgency_to_str(action.urgency), action.reason],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusStore;

    fn sample_case(cn: &str) -> Case {
        Case {
            case_number: CaseNumber::new(cn).unwrap(),
            defendant: "Doe, J.".to_string(),
            severity: Severity::Felony,
            status: CaseStatus::Open,
            charges: vec!["DUI".to_string()],
            filing_date: None,
            arrest_date: None,
            hearing_date: None,
            officer: Some("Rodriguez".to_string()),
            judge: None,
            prosecutor: None,
            witnesses: vec![],
            bond: None,
            plea_offer: None,
            prior_record: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn load_caseload_then_get_case_round_trips() {
        let db = SqliteCorpusStore::open_in_memory().unwrap();
        db.load_caseload(vec![sample_case("CR-12")], vec![], vec![]).unwrap();

        let case = db.get_case(&CaseNumber::new("CR-12").unwrap()).await.unwrap();
        assert_eq!(case.defendant, "Doe, J.");
        assert_eq!(case.officer.as_deref(), Some("Rodriguez"));
    }

    #[tokio::test]
    async fn dangling_alert_is_dropped_at_read_time() {
        let db = SqliteCorpusStore::open_in_memory().unwrap();
        db.load_caseload(vec![sample_case("CR-12")], vec![], vec![]).unwrap();
        db.replace_health_check_output(
            vec![Alert {
                id: "al1".to_string(),
                severity: AlertSeverity::Warning,
                alert_type: "test".to_string(),
                case_number: Some(CaseNumber::new("GONE").unwrap()),
                title: "t".to_string(),
                message: "m".to_string(),
                details: None,
            }],
            vec![],
            vec![],
        )
        .unwrap();

        let alerts = db.list_alerts().await.unwrap();
        assert!(alerts.is_empty());
    }

    #[test]
    fn insight_round_trips_through_sqlite_json_columns() {
        let db = SqliteCorpusStore::open_in_memory().unwrap();
        let inserted = db
            .append_insight(
                crate::models::AnalysisType::HealthCheck,
                Scope::FullCaseload,
                serde_json::json!({"alerts": []}),
                "2026-01-01T00:00:00Z".to_string(),
            )
            .unwrap();
        assert_eq!(inserted.id, 1);

        let listed = db.list_insights(None, None, None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].result["alerts"], serde_json::json!([]));
    }

    #[test]
    fn list_insights_respects_limit_and_ordering() {
        let db = SqliteCorpusStore::open_in_memory().unwrap();
        for n in 0..5 {
            db.append_insight(
                crate::models::AnalysisType::HealthCheck,
                Scope::FullCaseload,
                serde_json::json!({"n": n}),
                "2026-01-01T00:00:00Z".to_string(),
            )
            .unwrap();
        }
        let listed = db.list_insights(None, None, Some(2)).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].result["n"], 4);
    }
}
