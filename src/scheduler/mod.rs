//! # Motor de Execução — o Coração do Agendador (DAG de Ondas)
//!
//! Este módulo roda o grafo de dependências de um flow em **ondas**: a
//! cada rodada, todo step cuja dependências já terminaram entra para
//! rodar em paralelo, até `max_workers` de cada vez.
//!
//! ## Para todos entenderem:
//!
//! Pense numa lista de tarefas de casa:
//! - Lavar roupa (não depende de nada)
//! - Fazer café (não depende de nada)
//! - Dobrar roupa (depende de "lavar roupa")
//! - Tomar café (depende de "fazer café")
//!
//! "Lavar roupa" e "fazer café" podem acontecer ao mesmo tempo — formam a
//! primeira onda. Só depois que as duas terminam é que "dobrar roupa" e
//! "tomar café" podem começar — a segunda onda. Uma onda é uma barreira:
//! tudo que ficou pronto nesta rodada termina (com sucesso, com falha, ou
//! pulado pela sua condição) antes que a prontidão da próxima rodada seja
//! recalculada. Isso garante que a saída de um step (`dep_<id>_output`) já
//! está visível no contexto antes que qualquer step dependente comece.
//!
//! ```text
//!   onda 1:  [lavar roupa]   [fazer café]
//!                 |               |
//!                 v               v
//!   onda 2:  [dobrar roupa]  [tomar café]
//! ```
//!
//! Um step cuja dependência nunca termina (porque ela falhou, ou foi
//! pulada) simplesmente nunca fica pronto — fica para sempre em
//! `StepStatus::Pending`. Esse é o estado terminal "inalcançável", e é
//! por isso que o critério de parada do loop é "nenhum step ficou pronto
//! nesta rodada", não "todo step terminou".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{ConfigParser, StepConfig, TaskFlowConfig};
use crate::context::ContextStore;
use crate::registry::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub execution_time: f64,
    pub retry_count: u32,
    pub tool_used: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskExecutionResult {
    pub execution_id: String,
    pub task_name: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub success: bool,
    pub step_results: HashMap<String, StepResult>,
    pub total_execution_time: f64,
    /// Populated only for configuration errors and fatal internal failures —
    /// never from ordinary per-step `Failed`/`Pending` outcomes. A step
    /// failure (and any dependent left `Pending` as a result) is reported
    /// through `success` and `step_results` alone; see `execute_task`.
    pub error_summary: Option<Vec<String>>,
}

pub struct Scheduler {
    registry: Arc<ToolRegistry>,
    context: Arc<ContextStore>,
    max_workers: usize,
}

impl Scheduler {
    pub fn new(registry: Arc<ToolRegistry>, context: Arc<ContextStore>, max_workers: usize) -> Self {
        Self {
            registry,
            context,
            max_workers: max_workers.max(1),
        }
    }

    /// Runs a flow to completion and returns a full accounting of every
    /// step's outcome. Never panics or propagates an error out of the
    /// scheduler itself — a configuration problem or an internal failure
    /// is captured into the returned result's `error_summary` instead.
    pub async fn execute_task(&self, flow: TaskFlowConfig) -> TaskExecutionResult {
        let start = Instant::now();
        let execution_id = uuid::Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now();
        let task_name = flow.name.clone();

        let validation_errors = ConfigParser::validate(&flow);
        if !validation_errors.is_empty() {
            return TaskExecutionResult {
                execution_id,
                task_name,
                started_at,
                success: false,
                step_results: HashMap::new(),
                total_execution_time: start.elapsed().as_secs_f64(),
                error_summary: Some(validation_errors),
            };
        }

        let step_map: HashMap<String, StepConfig> =
            flow.steps.into_iter().map(|s| (s.id.clone(), s)).collect();
        let all_ids: HashSet<String> = step_map.keys().cloned().collect();
        let parallel_groups = flow.parallel_groups.unwrap_or_default();
        let steps = Arc::new(step_map);

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let results: Arc<Mutex<HashMap<String, StepResult>>> = Arc::new(Mutex::new(HashMap::new()));

        let mut pending: HashSet<String> = all_ids.clone();
        let mut completed: HashSet<String> = HashSet::new();

        loop {
            let ready: Vec<String> = pending
                .iter()
                .filter(|id| steps[*id].dependencies.iter().all(|d| completed.contains(d)))
                .cloned()
                .collect();

            if ready.is_empty() {
                break;
            }
            for id in &ready {
                pending.remove(id);
            }

            let mut to_run = Vec::new();
            {
                let mut results_guard = results.lock().await;
                for id in ready {
                    let step = &steps[&id];
                    if evaluate_condition(step.condition.as_deref(), &completed) {
                        to_run.push(id);
                    } else {
                        info!(step_id = %id, "skipping step: condition not satisfied");
                        results_guard.insert(
                            id.clone(),
                            StepResult {
                                step_id: id.clone(),
                                status: StepStatus::Skipped,
                                output: None,
                                error: None,
                                execution_time: 0.0,
                                retry_count: 0,
                                tool_used: None,
                            },
                        );
                    }
                }
            }

            if !to_run.is_empty() {
                let groups = group_steps(&to_run, &parallel_groups);
                info!(
                    wave_steps = to_run.len(),
                    groups = groups.len(),
                    "executing wave"
                );

                let mut join_set = JoinSet::new();
                for group in groups {
                    for step_id in group {
                        let steps = Arc::clone(&steps);
                        let results = Arc::clone(&results);
                        let registry = Arc::clone(&self.registry);
                        let context = Arc::clone(&self.context);
                        let semaphore = Arc::clone(&semaphore);
                        join_set.spawn(async move {
                            let _permit = semaphore.acquire().await.expect("semaphore closed");
                            let step = steps.get(&step_id).expect("step exists").clone();
                            let result = execute_step(&step, &registry, &context).await;
                            results.lock().await.insert(step_id, result);
                        });
                    }
                }
                while join_set.join_next().await.is_some() {}
            }

            let results_guard = results.lock().await;
            for (id, result) in results_guard.iter() {
                if result.status == StepStatus::Completed {
                    completed.insert(id.clone());
                }
            }
        }

        let mut final_results = Arc::try_unwrap(results)
            .map(|m| m.into_inner())
            .unwrap_or_default();
        for id in &pending {
            final_results.entry(id.clone()).or_insert(StepResult {
                step_id: id.clone(),
                status: StepStatus::Pending,
                output: None,
                error: None,
                execution_time: 0.0,
                retry_count: 0,
                tool_used: None,
            });
        }

        // Overall success is false if any step failed outright, or was left
        // Pending because a dependency never completed — but neither case
        // is a configuration or internal error, so error_summary stays
        // empty here. Per-step detail lives in step_results.
        let success = final_results
            .values()
            .all(|r| matches!(r.status, StepStatus::Completed | StepStatus::Skipped));

        TaskExecutionResult {
            execution_id,
            task_name,
            started_at,
            success,
            step_results: final_results,
            total_execution_time: start.elapsed().as_secs_f64(),
            error_summary: None,
        }
    }
}

/// `condition` of the form `dep_<step_id>` is true iff that step completed;
/// anything else (including `None`/empty) is unconditionally true, and so
/// is any condition that doesn't recognize the `dep_` grammar — the minimal
/// grammar has no failure mode, it just defaults to "run".
fn evaluate_condition(condition: Option<&str>, completed: &HashSet<String>) -> bool {
    match condition {
        None => true,
        Some(c) => match c.strip_prefix("dep_") {
            Some(dep_id) => completed.contains(dep_id),
            None => true,
        },
    }
}

/// Partitions a wave's runnable steps into groups: explicit
/// `parallel_groups` membership first (a step only joins the first group
/// that claims it), then every remaining step wrapped as its own
/// single-step group. All groups within a wave run concurrently regardless
/// — the grouping only affects how steps are logged and dispatched, not
/// whether they run together, since every step in a wave is already
/// eligible to run at once.
fn group_steps(to_run: &[String], parallel_groups: &[Vec<String>]) -> Vec<Vec<String>> {
    let runnable: HashSet<&String> = to_run.iter().collect();
    let mut grouped: HashSet<String> = HashSet::new();
    let mut groups = Vec::new();

    for group in parallel_groups {
        let members: Vec<String> = group
            .iter()
            .filter(|id| runnable.contains(id) && !grouped.contains(*id))
            .cloned()
            .collect();
        if !members.is_empty() {
            grouped.extend(members.iter().cloned());
            groups.push(members);
        }
    }

    for id in to_run {
        if !grouped.contains(id) {
            groups.push(vec![id.clone()]);
        }
    }

    groups
}

/// Assembles input, resolves the primary tool, runs the
/// attempt-then-fallback state machine, and records the step's output back
/// into the context store on success.
async fn execute_step(
    step: &StepConfig,
    registry: &ToolRegistry,
    context: &ContextStore,
) -> StepResult {
    let start = Instant::now();

    let mut input = step.parameters.clone();
    if let Value::Object(ref mut map) = input {
        for dep in &step.dependencies {
            if let Some(output) = context.get(&format!("step_{}_output", dep), Some(dep.as_str())) {
                map.insert(format!("dep_{}_output", dep), output);
            }
        }
    }

    let Some(primary) = registry.get(&step.tool).await else {
        let message = format!("Tool '{}' not found", step.tool);
        error!(step_id = %step.id, error = %message, "tool resolution failed");
        return StepResult {
            step_id: step.id.clone(),
            status: StepStatus::Failed,
            output: None,
            error: Some(message),
            execution_time: start.elapsed().as_secs_f64(),
            retry_count: 0,
            tool_used: None,
        };
    };

    let context_snapshot = context.get_all(None);
    let attempts = step.retry_count + 1;
    let mut last_error: Option<String> = None;
    let mut retries_used = 0;

    for attempt in 0..attempts {
        match primary.run(input.clone(), context_snapshot.clone()).await {
            Ok(output) => {
                context.set(
                    &format!("step_{}_output", step.id),
                    output.clone(),
                    Some(step.id.as_str()),
                );
                info!(step_id = %step.id, tool = %step.tool, attempt, "step completed");
                return StepResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Completed,
                    output: Some(output),
                    error: None,
                    execution_time: start.elapsed().as_secs_f64(),
                    retry_count: attempt,
                    tool_used: Some(step.tool.clone()),
                };
            }
            Err(e) => {
                warn!(step_id = %step.id, attempt, error = %e, "tool attempt failed");
                last_error = Some(e.to_string());
                retries_used = attempt;
                if attempt + 1 < attempts {
                    tokio::time::sleep(Duration::from_secs_f64(step.retry_delay.max(0.0))).await;
                }
            }
        }
    }

    if let Some(fallback_tools) = &step.fallback_tools {
        for fallback_name in fallback_tools {
            let Some(fallback_tool) = registry.get(fallback_name).await else {
                warn!(step_id = %step.id, fallback = %fallback_name, "fallback tool not registered, skipping");
                continue;
            };
            match fallback_tool.run(input.clone(), context_snapshot.clone()).await {
                Ok(output) => {
                    context.set(
                        &format!("step_{}_output", step.id),
                        output.clone(),
                        Some(step.id.as_str()),
                    );
                    info!(step_id = %step.id, tool = %fallback_name, "step completed via fallback");
                    return StepResult {
                        step_id: step.id.clone(),
                        status: StepStatus::Completed,
                        output: Some(output),
                        error: None,
                        execution_time: start.elapsed().as_secs_f64(),
                        retry_count: retries_used,
                        tool_used: Some(fallback_name.clone()),
                    };
                }
                Err(e) => {
                    warn!(step_id = %step.id, fallback = %fallback_name, error = %e, "fallback failed");
                    last_error = Some(e.to_string());
                }
            }
        }
    }

    error!(step_id = %step.id, error = ?last_error, "step exhausted retries and fallbacks");
    StepResult {
        step_id: step.id.clone(),
        status: StepStatus::Failed,
        output: None,
        error: last_error,
        execution_time: start.elapsed().as_secs_f64(),
        retry_count: retries_used,
        tool_used: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::tools::{EchoTool, SleepTool, Tool};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler(max_workers: usize) -> (Scheduler, Arc<ToolRegistry>) {
        let registry = Arc::new(ToolRegistry::new());
        let context = Arc::new(ContextStore::new(Duration::from_secs(3600)));
        (
            Scheduler::new(Arc::clone(&registry), context, max_workers),
            registry,
        )
    }

    #[tokio::test]
    async fn linear_flow_propagates_dependency_output() {
        let (scheduler, registry) = scheduler(4);
        registry.register("echo", Arc::new(EchoTool)).await;

        let flow = ConfigParser::parse_str(
            r#"
name: linear
steps:
  - id: first
    tool: echo
    parameters: {value: 1}
  - id: second
    tool: echo
    dependencies: [first]
    parameters: {value: 2}
"#,
        )
        .unwrap();

        let result = scheduler.execute_task(flow).await;
        assert!(result.success);
        let first = &result.step_results["first"];
        assert_eq!(first.status, StepStatus::Completed);
        assert_eq!(first.output, Some(json!({"value": 1})));
        let second = &result.step_results["second"];
        assert_eq!(second.status, StepStatus::Completed);
        assert_eq!(
            second.output.as_ref().unwrap().get("dep_first_output"),
            Some(&json!({"value": 1}))
        );
    }

    #[tokio::test]
    async fn parallel_group_runs_concurrently() {
        let (scheduler, registry) = scheduler(4);
        registry.register("sleep", Arc::new(SleepTool)).await;

        let flow = ConfigParser::parse_str(
            r#"
name: parallel
steps:
  - id: a
    tool: sleep
    parameters: {duration_ms: 80}
  - id: b
    tool: sleep
    parameters: {duration_ms: 80}
parallel_groups:
  - [a, b]
"#,
        )
        .unwrap();

        let start = Instant::now();
        let result = scheduler.execute_task(flow).await;
        let elapsed = start.elapsed();

        assert!(result.success);
        assert!(elapsed < Duration::from_millis(150), "elapsed={:?}", elapsed);
    }

    #[tokio::test]
    async fn retry_succeeds_before_exhaustion() {
        struct FlakyTool {
            calls: AtomicUsize,
        }
        #[async_trait]
        impl Tool for FlakyTool {
            fn name(&self) -> &str {
                "flaky"
            }
            fn description(&self) -> &str {
                "fails twice then succeeds"
            }
            async fn run(
                &self,
                input: Value,
                _context: HashMap<String, Value>,
            ) -> anyhow::Result<Value> {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call < 2 {
                    anyhow::bail!("transient failure");
                }
                Ok(input)
            }
        }

        let (scheduler, registry) = scheduler(1);
        registry
            .register(
                "flaky",
                Arc::new(FlakyTool {
                    calls: AtomicUsize::new(0),
                }),
            )
            .await;

        let flow = ConfigParser::parse_str(
            r#"
steps:
  - id: step1
    tool: flaky
    retry_count: 3
    retry_delay: 0.01
"#,
        )
        .unwrap();

        let result = scheduler.execute_task(flow).await;
        assert!(result.success);
        let step1 = &result.step_results["step1"];
        assert_eq!(step1.status, StepStatus::Completed);
        assert_eq!(step1.retry_count, 2);
    }

    #[tokio::test]
    async fn fallback_tool_used_after_primary_exhausted() {
        struct AlwaysFails;
        #[async_trait]
        impl Tool for AlwaysFails {
            fn name(&self) -> &str {
                "broken"
            }
            fn description(&self) -> &str {
                "always fails"
            }
            async fn run(
                &self,
                _input: Value,
                _context: HashMap<String, Value>,
            ) -> anyhow::Result<Value> {
                anyhow::bail!("nope")
            }
        }

        let (scheduler, registry) = scheduler(1);
        registry.register("broken", Arc::new(AlwaysFails)).await;
        registry.register("echo", Arc::new(EchoTool)).await;

        let flow = ConfigParser::parse_str(
            r#"
steps:
  - id: step1
    tool: broken
    retry_count: 0
    fallback_tools: [echo]
    parameters: {value: 9}
"#,
        )
        .unwrap();

        let result = scheduler.execute_task(flow).await;
        assert!(result.success);
        let step1 = &result.step_results["step1"];
        assert_eq!(step1.status, StepStatus::Completed);
        assert_eq!(step1.tool_used, Some("echo".to_string()));
    }

    #[tokio::test]
    async fn dependent_of_failed_step_stays_pending() {
        let (scheduler, registry) = scheduler(4);
        registry.register("echo", Arc::new(EchoTool)).await;

        let flow = ConfigParser::parse_str(
            r#"
steps:
  - id: first
    tool: missing_tool
  - id: second
    tool: echo
    dependencies: [first]
"#,
        )
        .unwrap();

        let result = scheduler.execute_task(flow).await;
        assert!(!result.success);
        assert_eq!(result.step_results["first"].status, StepStatus::Failed);
        assert_eq!(result.step_results["second"].status, StepStatus::Pending);
        assert!(result.error_summary.is_none());
    }

    #[tokio::test]
    async fn condition_gated_step_is_skipped() {
        let (scheduler, registry) = scheduler(4);
        registry.register("echo", Arc::new(EchoTool)).await;

        let flow = ConfigParser::parse_str(
            r#"
steps:
  - id: first
    tool: echo
  - id: second
    tool: echo
    dependencies: [first]
    condition: "dep_nonexistent"
"#,
        )
        .unwrap();

        let result = scheduler.execute_task(flow).await;
        assert_eq!(result.step_results["second"].status, StepStatus::Skipped);
        assert!(result.success);
    }

    #[test]
    fn condition_defaults_to_true() {
        let completed = HashSet::new();
        assert!(evaluate_condition(None, &completed));
        assert!(evaluate_condition(Some(""), &completed));
        assert!(evaluate_condition(Some("always"), &completed));
    }

    #[test]
    fn condition_checks_dependency_completion() {
        let mut completed = HashSet::new();
        completed.insert("fetch".to_string());
        assert!(evaluate_condition(Some("dep_fetch"), &completed));
        assert!(!evaluate_condition(Some("dep_other"), &completed));
    }

    #[test]
    fn grouping_honors_explicit_groups_then_singletons() {
        let to_run = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let parallel_groups = vec![vec!["a".to_string(), "b".to_string()]];
        let groups = group_steps(&to_run, &parallel_groups);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().any(|g| g.len() == 2));
        assert!(groups.iter().any(|g| g == &vec!["c".to_string()]));
    }
}
