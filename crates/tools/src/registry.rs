//! Tool registry: name → definition + handler. The export shape is what
//! the LLM receives for function calling.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use pg_domain::error::Result;
use pg_domain::message::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execution context threaded into every tool call.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub task_id: Option<String>,
    pub data_dir: PathBuf,
    pub memory_dir: PathBuf,
}

/// An invocable tool. Errors are turned into in-band failures by the
/// executor, never propagated to the caller.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value>;
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

struct FnHandler {
    f: Box<dyn Fn(Value, ToolContext) -> BoxFuture<Result<Value>> + Send + Sync>,
}

#[async_trait::async_trait]
impl ToolHandler for FnHandler {
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value> {
        (self.f)(args, ctx).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool spec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A registered tool: the definition exposed to the LLM plus its handler.
pub struct ToolSpec {
    pub definition: ToolDefinition,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            definition: ToolDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
            handler,
        }
    }

    /// Build a spec from an async closure.
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler = FnHandler {
            f: Box::new(move |args, ctx| -> BoxFuture<Result<Value>> {
                Box::pin(f(args, ctx))
            }),
        };
        Self::new(name, description, parameters, Arc::new(handler))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<ToolSpec>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one tool. A tool of the same name is replaced.
    pub fn register(&self, spec: ToolSpec) {
        let name = spec.definition.name.clone();
        if self
            .tools
            .write()
            .insert(name.clone(), Arc::new(spec))
            .is_some()
        {
            tracing::warn!(tool = %name, "replaced existing tool registration");
        }
    }

    pub fn register_many(&self, specs: impl IntoIterator<Item = ToolSpec>) {
        for spec in specs {
            self.register(spec);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.read().get(name).cloned()
    }

    /// Definitions in the shape the LLM expects, sorted by name so the
    /// prompt stays stable between calls.
    pub fn export(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self
            .tools
            .read()
            .values()
            .map(|s| s.definition.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}
