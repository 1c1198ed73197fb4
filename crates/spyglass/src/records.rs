//! Profiling session records
//!
//! `Session`, its child `RequestSample` rows and parsed stat-line rows,
//! plus [`ProfileStore`], the in-memory record store the coordinator works
//! against. Record storage here is deliberately collaborator-shaped: the
//! store keeps plain rows and owns nothing but their lifetimes (deleting a
//! session cascades to its children; blob cleanup is orchestrated by the
//! coordinator, which owns the blob store handle).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use spyglass_common::{Result, SpyglassError};

use crate::report::StatLine;

/// Timestamp format embedded in artifact file names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Unique session identifier using UUID v7 (time-ordered)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique request-sample identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleId(pub uuid::Uuid);

impl SampleId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }
}

impl Default for SampleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SampleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a session samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileMode {
    /// All activity between enable and disable, accumulated in the shared
    /// process sampler. Single-worker deployments only.
    Full,
    /// Only units of work whose context carries this session's marker, each
    /// captured in a private sampler.
    PerRequest,
}

impl std::fmt::Display for ProfileMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileMode::Full => write!(f, "full"),
            ProfileMode::PerRequest => write!(f, "per-request"),
        }
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Enabled,
    #[default]
    Disabled,
}

impl SessionState {
    /// Valid state transitions: one enabled->disabled cycle per activation.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        match (self, next) {
            (SessionState::Disabled, SessionState::Enabled) => true,
            (SessionState::Enabled, SessionState::Disabled) => true,
            _ => false,
        }
    }
}

/// A logical profiling session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub mode: ProfileMode,
    /// Also capture PostgreSQL query logs while enabled.
    pub enable_pg_logging: bool,
    /// Parse the textual report into queryable stat-line rows on dump.
    pub index_report: bool,
    pub state: SessionState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Free-text diagnostics accumulated by best-effort steps.
    pub description: String,
    /// PostgreSQL server log file, when known.
    pub log_path: Option<PathBuf>,
    /// Set when the database server is not local to the application.
    pub remote_host: Option<String>,
    /// Client session id captured when a per-request session is enabled.
    pub client_id: Option<String>,
    pub stats_slowest_html: Option<String>,
    pub stats_time_consuming_html: Option<String>,
    pub stats_most_frequent_html: Option<String>,
}

impl Session {
    pub fn new(name: impl Into<String>, mode: ProfileMode) -> Self {
        Self {
            id: SessionId::new(),
            name: name.into(),
            mode,
            enable_pg_logging: false,
            index_report: false,
            state: SessionState::Disabled,
            started_at: None,
            finished_at: None,
            description: String::new(),
            log_path: None,
            remote_host: None,
            client_id: None,
            stats_slowest_html: None,
            stats_time_consuming_html: None,
            stats_most_frequent_html: None,
        }
    }

    pub fn with_pg_logging(mut self, enabled: bool) -> Self {
        self.enable_pg_logging = enabled;
        self
    }

    pub fn with_index_report(mut self, enabled: bool) -> Self {
        self.index_report = enabled;
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.state == SessionState::Enabled
    }

    /// Append one diagnostic line to the free-text description.
    pub fn append_diagnostic(&mut self, text: &str) {
        if !self.description.is_empty() {
            self.description.push('\n');
        }
        self.description.push_str(text);
    }

    /// Artifact file name covering this session's capture window, e.g.
    /// `call_stats_<id>_<start>_to_<end>.json`.
    pub fn artifact_name(&self, prefix: &str, suffix: &str) -> String {
        let fmt = |ts: Option<DateTime<Utc>>| {
            ts.map_or_else(
                || "unknown".to_string(),
                |t| t.format(FILE_TIMESTAMP_FORMAT).to_string(),
            )
        };
        format!(
            "{}_{}_{}_to_{}{}",
            prefix,
            self.id,
            fmt(self.started_at),
            fmt(self.finished_at),
            suffix
        )
    }
}

/// One captured unit of work in per-request mode. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSample {
    pub id: SampleId,
    pub session_id: SessionId,
    pub path: String,
    pub root_url: String,
    pub user: Option<String>,
    /// Serialized request context.
    pub context: String,
    /// Wall time of the sampled unit of work, in milliseconds.
    pub elapsed_ms: f64,
    pub created_at: DateTime<Utc>,
}

impl RequestSample {
    pub fn display_name(&self) -> String {
        format!(
            "{} ({})",
            self.path,
            self.created_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// In-memory store for sessions and their child rows.
#[derive(Debug, Default)]
pub struct ProfileStore {
    sessions: DashMap<SessionId, Session>,
    samples: DashMap<SampleId, RequestSample>,
    stat_lines: DashMap<SessionId, Vec<StatLine>>,
}

/// A session removed from the store, with the child rows that went with it.
#[derive(Debug)]
pub struct RemovedSession {
    pub session: Session,
    pub sample_ids: Vec<SampleId>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) -> SessionId {
        let id = session.id;
        self.sessions.insert(id, session);
        id
    }

    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Mutate a session in place.
    pub fn update<R>(&self, id: SessionId, f: impl FnOnce(&mut Session) -> R) -> Result<R> {
        let mut entry = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| SpyglassError::SessionNotFound(id.to_string()))?;
        Ok(f(entry.value_mut()))
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn insert_sample(&self, sample: RequestSample) -> SampleId {
        let id = sample.id;
        self.samples.insert(id, sample);
        id
    }

    pub fn sample(&self, id: SampleId) -> Option<RequestSample> {
        self.samples.get(&id).map(|entry| entry.value().clone())
    }

    pub fn samples_for(&self, session: SessionId) -> Vec<RequestSample> {
        self.samples
            .iter()
            .filter(|entry| entry.session_id == session)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Replace all stat-line rows for a session with a freshly parsed set.
    pub fn replace_stat_lines(&self, session: SessionId, lines: Vec<StatLine>) {
        self.stat_lines.insert(session, lines);
    }

    pub fn stat_lines(&self, session: SessionId) -> Vec<StatLine> {
        self.stat_lines
            .get(&session)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Remove a session and cascade to its child rows. Returns the removed
    /// rows so the caller can clean up owned blobs.
    pub fn remove(&self, id: SessionId) -> Result<RemovedSession> {
        let (_, session) = self
            .sessions
            .remove(&id)
            .ok_or_else(|| SpyglassError::SessionNotFound(id.to_string()))?;
        let sample_ids: Vec<SampleId> = self
            .samples
            .iter()
            .filter(|entry| entry.session_id == id)
            .map(|entry| entry.id)
            .collect();
        for sample_id in &sample_ids {
            self.samples.remove(sample_id);
        }
        self.stat_lines.remove(&id);
        Ok(RemovedSession {
            session,
            sample_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_for(session_id: SessionId) -> RequestSample {
        RequestSample {
            id: SampleId::new(),
            session_id,
            path: "/web".to_string(),
            root_url: "https://example.com/".to_string(),
            user: Some("admin".to_string()),
            context: r#"{"uid":2}"#.to_string(),
            elapsed_ms: 12.5,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_state_transitions() {
        assert!(SessionState::Disabled.can_transition_to(SessionState::Enabled));
        assert!(SessionState::Enabled.can_transition_to(SessionState::Disabled));
        assert!(!SessionState::Disabled.can_transition_to(SessionState::Disabled));
        assert!(!SessionState::Enabled.can_transition_to(SessionState::Enabled));
    }

    #[test]
    fn test_mode_serialization() {
        assert_eq!(
            serde_json::to_string(&ProfileMode::PerRequest).unwrap(),
            r#""per-request""#
        );
        assert_eq!(serde_json::to_string(&ProfileMode::Full).unwrap(), r#""full""#);
    }

    #[test]
    fn test_artifact_name_embeds_window() {
        let mut session = Session::new("checkout slowness", ProfileMode::Full);
        session.started_at = Some("2026-03-01T08:30:00Z".parse().unwrap());
        session.finished_at = Some("2026-03-01T09:00:00Z".parse().unwrap());
        let name = session.artifact_name("call_stats", ".json");
        assert!(name.starts_with("call_stats_"));
        assert!(name.contains("20260301_083000_to_20260301_090000"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_append_diagnostic() {
        let mut session = Session::new("s", ProfileMode::Full);
        session.append_diagnostic("pgbadger missing");
        session.append_diagnostic("log unreadable");
        assert_eq!(session.description, "pgbadger missing\nlog unreadable");
    }

    #[test]
    fn test_store_update_unknown_session() {
        let store = ProfileStore::new();
        let err = store.update(SessionId::new(), |_| ()).unwrap_err();
        assert!(matches!(err, SpyglassError::SessionNotFound(_)));
    }

    #[test]
    fn test_remove_cascades_children() {
        let store = ProfileStore::new();
        let id = store.insert(Session::new("s", ProfileMode::PerRequest));
        let sample_id = store.insert_sample(sample_for(id));
        store.replace_stat_lines(id, Vec::new());

        let other = store.insert(Session::new("other", ProfileMode::Full));
        let other_sample = store.insert_sample(sample_for(other));

        let removed = store.remove(id).unwrap();
        assert_eq!(removed.sample_ids, vec![sample_id]);
        assert!(store.get(id).is_none());
        assert!(store.sample(sample_id).is_none());
        assert!(store.stat_lines(id).is_empty());

        // Unrelated sessions keep their rows.
        assert!(store.get(other).is_some());
        assert!(store.sample(other_sample).is_some());
    }

    #[test]
    fn test_display_name_includes_timestamp() {
        let sample = sample_for(SessionId::new());
        let display = sample.display_name();
        assert!(display.starts_with("/web ("));
        assert!(display.ends_with(')'));
    }
}
