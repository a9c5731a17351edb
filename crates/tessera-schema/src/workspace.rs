use crate::types::WorkspaceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read workspace definition: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse workspace definition: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to parse workspace definition: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("unsupported workspace definition format: '{0}', expected .toml or .json")]
    UnsupportedFormat(String),
}

/// A workspace definition as handed to the runtime registry.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub config: WorkspaceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    pub name: String,
    pub default_env: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub environments: BTreeMap<String, Environment>,
}

impl WorkspaceConfig {
    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.get(name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Environment {
    pub recipe: EnvironmentRecipe,
    #[serde(default)]
    pub machines: Vec<MachineConfig>,
}

impl Environment {
    /// Type tag selecting the environment engine.
    pub fn env_type(&self) -> &str {
        &self.recipe.recipe_type
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentRecipe {
    #[serde(rename = "type")]
    pub recipe_type: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MachineConfig {
    pub name: String,
    #[serde(default)]
    pub dev: bool,
    #[serde(rename = "type", default = "default_machine_type")]
    pub machine_type: String,
    pub source: MachineSource,
    #[serde(default)]
    pub servers: Vec<ServerConf>,
    #[serde(default)]
    pub env_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: MachineLimits,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MachineSource {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConf {
    pub port: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MachineLimits {
    #[serde(default = "default_ram_mb")]
    pub ram_mb: u64,
}

impl Default for MachineLimits {
    fn default() -> Self {
        Self {
            ram_mb: default_ram_mb(),
        }
    }
}

fn default_machine_type() -> String {
    "docker".to_owned()
}

fn default_ram_mb() -> u64 {
    2048
}

pub fn parse_workspace_str(input: &str) -> Result<Workspace, SchemaError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_workspace_json(input: &str) -> Result<Workspace, SchemaError> {
    Ok(serde_json::from_str(input)?)
}

/// Parse a definition file, choosing TOML or JSON by extension.
pub fn parse_workspace_file(path: impl AsRef<Path>) -> Result<Workspace, SchemaError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => parse_workspace_str(&content),
        Some("json") => parse_workspace_json(&content),
        other => Err(SchemaError::UnsupportedFormat(
            other.unwrap_or_default().to_owned(),
        )),
    }
}
