//! Tool contract — the pluggable unit of work a step invokes.
//!
//! A tool is a named, stateless-from-the-scheduler's-perspective unit that
//! takes a JSON input plus a read-only snapshot of context and produces a
//! JSON output (or fails). The scheduler never knows what a tool actually
//! does; it only knows how to look one up by name and call `run`.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Something a step can invoke by name.
///
/// Implementors should be cheap to clone behind `Arc` and safe to call
/// concurrently — the scheduler may run multiple steps, each dispatching to
/// the same tool instance, at the same time.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The name steps reference via `StepConfig::tool`.
    fn name(&self) -> &str;

    /// Human-readable summary, surfaced by `ToolRegistry::list`.
    fn description(&self) -> &str;

    /// Execute the tool.
    ///
    /// `input` is the step's assembled parameters (its own `parameters` map
    /// plus any `dep_<id>_output` entries from completed dependencies).
    /// `context` is a snapshot of the global context scope at call time —
    /// tools cannot write back into the context store directly; the
    /// scheduler records a tool's output under `step_<id>_output` itself.
    async fn run(&self, input: Value, context: HashMap<String, Value>) -> Result<Value>;
}

/// Returns its input unchanged. Used in tests and as a trivial no-op step.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Returns its input unchanged"
    }

    async fn run(&self, input: Value, _context: HashMap<String, Value>) -> Result<Value> {
        Ok(input)
    }
}

/// Sleeps for `duration_ms` (default 0) and returns `{"slept_ms": N}`.
///
/// Handy for exercising the parallel-group wall-clock bound in tests: two
/// sleep steps in the same group should finish in roughly max(durations),
/// not the sum.
pub struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Sleeps for the given duration_ms and echoes it back"
    }

    async fn run(&self, input: Value, _context: HashMap<String, Value>) -> Result<Value> {
        let duration_ms = input
            .get("duration_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        tokio::time::sleep(std::time::Duration::from_millis(duration_ms)).await;
        Ok(serde_json::json!({ "slept_ms": duration_ms }))
    }
}
