//! Entity types persisted by the Store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) use now as current_time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Stopping,
    Finished,
    Stopped,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Finished => "finished",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Finished | SessionStatus::Stopped | SessionStatus::Failed
        )
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SessionStatus::Pending),
            "running" => Ok(SessionStatus::Running),
            "stopping" => Ok(SessionStatus::Stopping),
            "finished" => Ok(SessionStatus::Finished),
            "stopped" => Ok(SessionStatus::Stopped),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

impl TryFrom<String> for SessionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub session_id: String,
    pub parent_session_id: Option<String>,
    pub agent_name: String,
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
    pub project_dir: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub executor_identity: Option<String>,
    pub executor_profile: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Start,
    Resume,
}

impl std::fmt::Display for RunType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", match self {
            RunType::Start => "start",
            RunType::Resume => "resume",
        })
    }
}

impl std::str::FromStr for RunType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "start" => Ok(RunType::Start),
            "resume" => Ok(RunType::Resume),
            other => Err(format!("unknown run type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Claimed,
    Running,
    Stopping,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Stopped
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Claimed => "claimed",
            RunStatus::Running => "running",
            RunStatus::Stopping => "stopping",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "claimed" => Ok(RunStatus::Claimed),
            "running" => Ok(RunStatus::Running),
            "stopping" => Ok(RunStatus::Stopping),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "stopped" => Ok(RunStatus::Stopped),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sync,
    AsyncPoll,
    AsyncCallback,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::AsyncPoll
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionMode::Sync => "sync",
            ExecutionMode::AsyncPoll => "async_poll",
            ExecutionMode::AsyncCallback => "async_callback",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(ExecutionMode::Sync),
            "async_poll" => Ok(ExecutionMode::AsyncPoll),
            "async_callback" => Ok(ExecutionMode::AsyncCallback),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// Matching criteria attached to a run: tag set plus optional scalar pins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Demands {
    #[serde(default)]
    pub tags: std::collections::BTreeSet<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub project_dir: Option<String>,
    #[serde(default)]
    pub executor_profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub run_type: RunType,
    pub session_id: String,
    pub agent_name: String,
    pub parameters: Value,
    pub scope: Value,
    pub resolved_blueprint: Value,
    pub demands: Demands,
    pub execution_mode: ExecutionMode,
    pub status: RunStatus,
    pub runner_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    SessionStop,
    Message,
    PreTool,
    PostTool,
    Result,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::SessionStart => "session_start",
            EventKind::SessionStop => "session_stop",
            EventKind::Message => "message",
            EventKind::PreTool => "pre_tool",
            EventKind::PostTool => "post_tool",
            EventKind::Result => "result",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session_start" => Ok(EventKind::SessionStart),
            "session_stop" => Ok(EventKind::SessionStop),
            "message" => Ok(EventKind::Message),
            "pre_tool" => Ok(EventKind::PreTool),
            "post_tool" => Ok(EventKind::PostTool),
            "result" => Ok(EventKind::Result),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

impl TryFrom<String> for EventKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub session_id: String,
    pub seq: i64,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Online,
    Stale,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerRegistration {
    pub runner_id: String,
    pub hostname: String,
    pub project_dir: String,
    pub executor_profile: String,
    pub capabilities: std::collections::BTreeSet<String>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub marked_for_deregistration: bool,
}

impl RunnerRegistration {
    /// Computes liveness from elapsed time since the last heartbeat. Callers
    /// should pass a monotonic-derived `now` where possible; wall clock is
    /// acceptable for display purposes only.
    pub fn liveness(
        &self,
        now: DateTime<Utc>,
        stale_after: std::time::Duration,
        offline_after: std::time::Duration,
    ) -> Liveness {
        let elapsed = (now - self.last_heartbeat)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        if elapsed >= offline_after {
            Liveness::Offline
        } else if elapsed >= stale_after {
            Liveness::Stale
        } else {
            Liveness::Online
        }
    }

    pub fn capabilities_satisfy(&self, demands: &Demands) -> bool {
        if !demands.tags.is_subset(&self.capabilities) {
            return false;
        }
        if let Some(h) = &demands.hostname {
            if h != &self.hostname {
                return false;
            }
        }
        if let Some(p) = &demands.project_dir {
            if p != &self.project_dir {
                return false;
            }
        }
        if let Some(e) = &demands.executor_profile {
            if e != &self.executor_profile {
                return false;
            }
        }
        true
    }
}

/// Derives the deterministic runner id so restarts re-adopt the same identity.
/// Hashed with sha2 rather than `DefaultHasher`, whose algorithm and seed are
/// not guaranteed stable across Rust toolchain versions.
pub fn derive_runner_id(hostname: &str, project_dir: &str, executor_profile: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    hasher.update(b"\x01");
    hasher.update(project_dir.as_bytes());
    hasher.update(b"\x01");
    hasher.update(executor_profile.as_bytes());
    let digest = hasher.finalize();
    format!("rnr_{:x}", digest)[..20].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BlueprintType {
    Autonomous,
    Procedural,
}

impl std::fmt::Display for BlueprintType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", match self {
            BlueprintType::Autonomous => "autonomous",
            BlueprintType::Procedural => "procedural",
        })
    }
}

impl std::str::FromStr for BlueprintType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "autonomous" => Ok(BlueprintType::Autonomous),
            "procedural" => Ok(BlueprintType::Procedural),
            other => Err(format!("unknown blueprint type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BlueprintStatus {
    Active,
    Inactive,
}

impl std::fmt::Display for BlueprintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", match self {
            BlueprintStatus::Active => "active",
            BlueprintStatus::Inactive => "inactive",
        })
    }
}

impl std::str::FromStr for BlueprintStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(BlueprintStatus::Active),
            "inactive" => Ok(BlueprintStatus::Inactive),
            other => Err(format!("unknown blueprint status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    pub description: Option<String>,
    pub blueprint_type: BlueprintType,
    pub system_prompt: Option<String>,
    pub parameters_schema: Value,
    pub output_schema: Option<Value>,
    pub mcp_servers: Value,
    pub capabilities_required: std::collections::BTreeSet<String>,
    pub demands: Demands,
    pub hooks: Value,
    pub status: BlueprintStatus,
    pub command: Option<String>,
    pub runner_owned: bool,
    pub owning_runner_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_subset_matches_tags_and_scalars() {
        let runner = RunnerRegistration {
            runner_id: "rnr_1".into(),
            hostname: "h1".into(),
            project_dir: "/p".into(),
            executor_profile: "claude-code".into(),
            capabilities: ["internal".to_string(), "gpu".to_string()]
                .into_iter()
                .collect(),
            registered_at: now(),
            last_heartbeat: now(),
            marked_for_deregistration: false,
        };
        let demands = Demands {
            tags: ["internal".to_string()].into_iter().collect(),
            hostname: Some("h1".into()),
            ..Default::default()
        };
        assert!(runner.capabilities_satisfy(&demands));

        let mismatched = Demands {
            hostname: Some("h2".into()),
            ..Default::default()
        };
        assert!(!runner.capabilities_satisfy(&mismatched));
    }

    #[test]
    fn runner_id_is_deterministic() {
        let a = derive_runner_id("h1", "/p", "claude-code");
        let b = derive_runner_id("h1", "/p", "claude-code");
        assert_eq!(a, b);
        let c = derive_runner_id("h2", "/p", "claude-code");
        assert_ne!(a, c);
    }
}
