//! # Módulo de Configuração — o Documento do Flow
//!
//! Um flow é um arquivo YAML editável à mão descrevendo um grafo de steps.
//!
//! ## Para todos entenderem:
//!
//! Pense num YAML de flow como uma receita de bolo escrita por alguém, mas
//! com alguns ingredientes deixados em branco de propósito (`${API_KEY}`,
//! `${TIMEOUT:30}`) para cada ambiente preencher os próprios valores na
//! hora. Por isso o parsing tem duas fases: primeiro a substituição textual
//! das referências `${NOME}` / `${NOME:padrão}` sobre o documento cru,
//! depois a desserialização do documento já substituído em structs
//! tipadas. Validar é uma etapa separada de parsear — um documento
//! sintaticamente válido ainda pode descrever um flow inválido (ids
//! duplicados, dependências que não existem).

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use serde_yaml::Value as YamlValue;
use thiserror::Error;

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_parameters() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tool: String,
    #[serde(default = "default_parameters")]
    pub parameters: Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    #[serde(default)]
    pub fallback_tools: Option<Vec<String>>,
    #[serde(default)]
    pub condition: Option<String>,
}

impl StepConfig {
    /// Falls back to the step id when no display name was given, matching
    /// `ConfigParser._parse_step`'s `name = data.get('name', step_id)`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

fn default_task_name() -> String {
    "Unnamed Task".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskFlowConfig {
    #[serde(default = "default_task_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
    #[serde(default)]
    pub parallel_groups: Option<Vec<Vec<String>>>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(String),
    #[error("invalid YAML configuration: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ConfigParser;

impl ConfigParser {
    /// Reads and parses a flow document from disk, applying environment
    /// substitution before typed deserialization.
    pub fn parse(path: impl AsRef<Path>) -> Result<TaskFlowConfig, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.display().to_string())
            } else {
                ConfigError::Io(e)
            }
        })?;
        Self::parse_str(&raw)
    }

    /// Parses a flow document already read into memory — useful for tests
    /// and for embedding flows in code without a filesystem round trip.
    pub fn parse_str(raw: &str) -> Result<TaskFlowConfig, ConfigError> {
        let document: YamlValue = serde_yaml::from_str(raw)?;
        let substituted = substitute_env_vars(document);
        let config: TaskFlowConfig = serde_yaml::from_value(substituted)?;
        Ok(config)
    }

    /// Checks the structural invariants a flow must satisfy before it can
    /// run: unique step ids, dependencies and parallel-group members that
    /// reference real steps, and a non-empty tool name on every step.
    /// Returns the empty vec when the flow is valid.
    pub fn validate(config: &TaskFlowConfig) -> Vec<String> {
        let mut errors = Vec::new();

        let ids: Vec<&str> = config.steps.iter().map(|s| s.id.as_str()).collect();
        let unique_ids: HashSet<&str> = ids.iter().copied().collect();
        if unique_ids.len() != ids.len() {
            errors.push("Duplicate step IDs found".to_string());
        }

        for step in &config.steps {
            for dep in &step.dependencies {
                if !unique_ids.contains(dep.as_str()) {
                    errors.push(format!(
                        "Step '{}' depends on non-existent step '{}'",
                        step.id, dep
                    ));
                }
            }
        }

        if let Some(groups) = &config.parallel_groups {
            for group in groups {
                for step_id in group {
                    if !unique_ids.contains(step_id.as_str()) {
                        errors.push(format!(
                            "Parallel group contains non-existent step '{}'",
                            step_id
                        ));
                    }
                }
            }
        }

        for step in &config.steps {
            if step.tool.is_empty() {
                errors.push(format!("Step '{}' does not specify a tool", step.id));
            }
        }

        errors
    }
}

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}").unwrap());

/// Recursively walks a YAML document, substituting `${NAME}` / `${NAME:default}`
/// references in every string scalar. Mappings and sequences are walked
/// depth-first; everything else (numbers, bools, null) passes through
/// unchanged.
fn substitute_env_vars(value: YamlValue) -> YamlValue {
    match value {
        YamlValue::Mapping(map) => {
            let substituted = map
                .into_iter()
                .map(|(k, v)| (substitute_env_vars(k), substitute_env_vars(v)))
                .collect();
            YamlValue::Mapping(substituted)
        }
        YamlValue::Sequence(seq) => {
            YamlValue::Sequence(seq.into_iter().map(substitute_env_vars).collect())
        }
        YamlValue::String(s) => YamlValue::String(substitute_in_string(&s)),
        other => other,
    }
}

/// Substitutes env references in a single string. A reference whose
/// variable is unset and has no default is left verbatim (with a warning
/// logged), rather than substituted with an empty string.
fn substitute_in_string(text: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(text, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());
            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match default_value {
                    Some(d) if !d.is_empty() => d.to_string(),
                    _ => {
                        tracing::warn!(
                            var = var_name,
                            "environment variable not found and no default provided"
                        );
                        caps[0].to_string()
                    }
                },
            }
        })
        .into_owned()
}
