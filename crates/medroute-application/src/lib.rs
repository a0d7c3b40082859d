//! Application layer: session store, agents and the query orchestrator.

pub mod agents;
pub mod context_builder;
pub mod generation;
pub mod memory;
pub mod orchestrator;
pub mod prompts;
pub mod session;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use context_builder::ContextBuilder;
pub use generation::RetryingGenerator;
pub use memory::EmbeddingMemory;
pub use orchestrator::{Orchestrator, Route};
pub use session::{CleanupReport, MemoryUsage, SessionStore};
pub use telemetry::{LogFormat, init_tracing};
