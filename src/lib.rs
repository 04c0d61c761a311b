//! Task flow scheduler — a declaratively-configured DAG workflow engine.
//!
//! A flow is a YAML document describing named steps, each invoking a
//! pluggable tool by name, wired together by dependencies and optional
//! parallel-execution groups. See [`scheduler::Scheduler`] for the
//! execution engine, [`config`] for the document format, [`tools`] for the
//! plugin contract, [`registry`] for how tools are looked up by name, and
//! [`context`] for how steps hand intermediate results to each other.

pub mod config;
pub mod context;
pub mod errors;
pub mod registry;
pub mod scheduler;
pub mod telemetry;
pub mod tools;

pub use config::{ConfigError, ConfigParser, StepConfig, TaskFlowConfig};
pub use context::ContextStore;
pub use errors::SchedulerError;
pub use registry::ToolRegistry;
pub use scheduler::{Scheduler, StepResult, StepStatus, TaskExecutionResult};
pub use tools::{EchoTool, SleepTool, Tool};
