//! # Módulo de Erros do Agendador
//!
//! `execute_task` nunca retorna `Err` — um flow sempre vira um
//! `TaskExecutionResult`, mesmo quando algo deu errado, porque o chamador
//! quer o relatório completo (quais steps rodaram, quais falharam) e não
//! só um "deu erro". Falhas de step viram texto em `StepResult.error`.
//!
//! `SchedulerError` existe para o outro lado da fronteira: qualquer
//! integração que chame `ConfigParser::parse`/`validate` diretamente, fora
//! do caminho de `execute_task`, quer um erro tipado de verdade — não uma
//! string solta.

pub use crate::config::ConfigError;
use thiserror::Error;

/// Distingue erros de configuração (a categoria de `ConfigError`, mais a
/// falha de validação estrutural que `ConfigParser::validate` relata como
/// `Vec<String>`) do catch-all interno do próprio agendador.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("flow failed validation: {0}")]
    Validation(String),

    #[error("internal scheduler error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_includes_path() {
        let err = ConfigError::NotFound("flow.yaml".to_string());
        assert!(err.to_string().contains("flow.yaml"));
    }

    #[test]
    fn config_error_converts_into_scheduler_error() {
        let err: SchedulerError = ConfigError::NotFound("flow.yaml".to_string()).into();
        assert!(matches!(err, SchedulerError::Config(_)));
    }

    #[test]
    fn validation_variant_carries_joined_message() {
        let err = SchedulerError::Validation("Duplicate step IDs found".to_string());
        assert!(err.to_string().contains("Duplicate step IDs found"));
    }
}
