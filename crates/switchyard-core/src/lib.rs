//! Switchyard core: the request-handling kernel of a multi-agent
//! dispatch runtime embedded in a developer-tool host.
//!
//! A request flows: dispatcher → registry (direct or smart routing) →
//! cache consultation → guardrail checkpoint for autonomous agents →
//! context enrichment → middleware pipeline → the agent's `handle` →
//! persistence (cache, memory, conversation, telemetry). Agents may
//! delegate to each other, fan out in parallel, chain sequentially, or
//! participate in declarative workflows.

pub mod agent;
pub mod cache;
pub mod cancel;
pub mod collab;
pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod exec;
pub mod guardrails;
pub mod llm;
pub mod memory;
pub mod middleware;
pub mod model_select;
pub mod profiles;
pub mod registry;
pub mod stream;
pub mod telemetry;
pub mod template;
pub mod workflow;

pub use agent::{Agent, AgentContext, PromptRunner};
pub use cache::{CacheConfig, CacheLookup, ResponseCache};
pub use cancel::CancelToken;
pub use collab::{CollabConfig, CollabCoordinator, CollabMode};
pub use config::{load_project_config, EventRuleBook, PROJECT_CONFIG_FILE};
pub use conversation::ConversationLog;
pub use dispatcher::{AdminAction, DispatchOutcome, Dispatcher, DispatcherConfig};
pub use error::{CoreError, ErrorClass, Result};
pub use exec::{
    AutonomousExecutor, BatchOutcome, BatchStatus, ChangeKind, CollectedChange,
    CommandOutput, Diagnostic, DiagnosticsProvider, DiffCollector, ExecOptions,
    RecordingCollector, Severity, StaticDiagnostics,
};
pub use guardrails::{AutoApprove, CheckpointStore, ConfirmationGate, PlannedOp};
pub use llm::{
    CompletionRequest, CompletionResponse, LanguageModel, Message, MockModel, Role,
    TokenUsage,
};
pub use memory::MemoryStore;
pub use middleware::{
    HookScope, Middleware, MiddlewarePipeline, RateLimitMiddleware, TimingMiddleware,
    UsageMiddleware, Verdict,
};
pub use model_select::{ModelOptions, ModelSelector};
pub use profiles::ProfileRegistry;
pub use registry::{
    AgentRegistry, ChainOutcome, ChainStep, Delegation, ParallelOutcome, ParallelTask,
    SmartRouteOptions, MAX_CHAIN_DEPTH, PIPE_SEPARATOR,
};
pub use stream::{BufferStream, CaptureStream, NullStream, OutputStream};
pub use telemetry::UsageLedger;
pub use workflow::{StepOutcome, StepStatus, WorkflowEngine};
