use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PodwireError, Result};
use crate::types::{CanvasId, Connection, ConnectionId, Pod, PodId, PodState, TriggerMode};

/// Top-level Podwire configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub pods: Vec<PodConfig>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Broadcast buffer for status events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Summarize upstream output before handing it downstream (default: false).
    #[serde(default)]
    pub summarize_handoff: bool,
    /// Only outputs longer than this are summarized.
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold_chars: usize,
    /// Separator between source sections of a merged join payload.
    #[serde(default = "default_merge_separator")]
    pub merge_separator: String,
    /// How a join treats rejected sources.
    #[serde(default)]
    pub join_policy: JoinPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            summarize_handoff: false,
            summary_threshold_chars: default_summary_threshold(),
            merge_separator: default_merge_separator(),
            join_policy: JoinPolicy::default(),
        }
    }
}

/// What a join does once every source resolved and some were rejected.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Abandon once every source resolved and any of them was rejected.
    #[default]
    AbandonOnRejection,
    /// Fire with the completed sources; abandon only if none completed.
    FireWithCompleted,
}

fn default_event_capacity() -> usize { 256 }
fn default_summary_threshold() -> usize { 4_000 }
fn default_merge_separator() -> String { "\n\n---\n\n".to_string() }

/// Logging configuration. `RUST_LOG` takes precedence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// EnvFilter directive, e.g. "podwire=debug".
    #[serde(default)]
    pub filter: Option<String>,
}

/// Settings for the CLI's simulated collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// How long a simulated pod run takes.
    #[serde(default = "default_run_delay_ms")]
    pub run_delay_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            run_delay_ms: default_run_delay_ms(),
        }
    }
}

fn default_run_delay_ms() -> u64 { 25 }

/// A pod declared in a canvas file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_canvas")]
    pub canvas: String,
    #[serde(default)]
    pub auto_clear: bool,
}

fn default_canvas() -> String { "default".to_string() }

/// Scripted approver answer for a connection, used by the simulator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SimulatedDecision {
    Approve,
    Reject,
    /// Leave the connection out of the response.
    Omit,
    /// Report a per-connection error.
    Error,
}

/// A connection declared in a canvas file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Generated from source and target when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub trigger_mode: TriggerMode,
    #[serde(default)]
    pub decision: Option<SimulatedDecision>,
}

impl ConnectionConfig {
    pub fn connection_id(&self) -> ConnectionId {
        match self.id {
            Some(ref id) => ConnectionId(id.clone()),
            None => ConnectionId(format!("{}->{}", self.source, self.target)),
        }
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| PodwireError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| PodwireError::Config(e.to_string()))
    }

    /// Build the pods and connections declared in the file.
    ///
    /// Rejects duplicate ids and connections that reference undeclared pods.
    pub fn canvas(&self) -> Result<(Vec<Pod>, Vec<Connection>)> {
        let mut pod_ids = HashSet::new();
        let mut pods = Vec::with_capacity(self.pods.len());
        for p in &self.pods {
            if !pod_ids.insert(p.id.as_str()) {
                return Err(PodwireError::InvalidCanvas(format!("duplicate pod id '{}'", p.id)));
            }
            pods.push(Pod {
                id: PodId(p.id.clone()),
                canvas_id: CanvasId(p.canvas.clone()),
                name: p.name.clone().unwrap_or_else(|| p.id.clone()),
                state: PodState::Idle,
                auto_clear: p.auto_clear,
            });
        }

        let mut conn_ids = HashSet::new();
        let mut connections = Vec::with_capacity(self.connections.len());
        for c in &self.connections {
            for end in [&c.source, &c.target] {
                if !pod_ids.contains(end.as_str()) {
                    return Err(PodwireError::InvalidCanvas(format!(
                        "connection {} -> {} references unknown pod '{}'",
                        c.source, c.target, end
                    )));
                }
            }
            let id = c.connection_id();
            if !conn_ids.insert(id.clone()) {
                return Err(PodwireError::InvalidCanvas(format!("duplicate connection id '{}'", id)));
            }
            connections.push(Connection::new(
                id.0,
                c.source.clone(),
                c.target.clone(),
                c.trigger_mode,
            ));
        }

        Ok((pods, connections))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
