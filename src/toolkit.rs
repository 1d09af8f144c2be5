//! Tool registry (§4.6): named, JSON-Schema-described callables a generator
//! can invoke mid-turn. Single local-execution surface only — no
//! multi-protocol routing, no remote discovery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::schema::{ToolCall, ToolResult};

/// Arbitrary per-call context a tool may read (cancellation, request-scoped
/// values). Opaque to the toolkit itself.
#[derive(Default, Clone)]
pub struct ToolContext {
    values: HashMap<String, Value>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// One callable a generator may invoke.
///
/// A tool's `run` returning `Err` is never propagated to the caller as a
/// crate-level error — [`Toolkit::run`] converts it into an `is_error=true`
/// [`ToolResult`] (§4.6).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON-Schema object describing the tool's expected arguments.
    fn parameters_schema(&self) -> &Value;
    async fn run(&self, ctx: &ToolContext, input: &Value) -> Result<Value, String>;
}

/// Unordered set of [`Tool`]s keyed by name.
#[derive(Default)]
pub struct Toolkit {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Toolkit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, rejecting a name already registered.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), Error> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(Error::Conflict(format!("tool {name:?} already registered")));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Dispatch every call's JSON input to its named tool and collect the
    /// results in call order. A lookup miss or a tool's own execution
    /// failure both become an `is_error` result rather than a returned
    /// `Error` — only a caller bug (empty `calls`) is rejected outright.
    pub async fn run(&self, ctx: &ToolContext, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = match self.tools.get(&call.name) {
                None => ToolResult::error(
                    &call.id,
                    Some(call.name.clone()),
                    &format!("no such tool: {}", call.name),
                ),
                Some(tool) => {
                    let input: Value = match serde_json::from_str(call.input.get()) {
                        Ok(v) => v,
                        Err(e) => {
                            results.push(ToolResult::error(
                                &call.id,
                                Some(call.name.clone()),
                                &format!("invalid tool arguments: {e}"),
                            ));
                            continue;
                        }
                    };
                    match tool.run(ctx, &input).await {
                        Ok(output) => {
                            let raw = serde_json::value::to_raw_value(&output)
                                .expect("serde_json::Value always serializes");
                            ToolResult::ok(&call.id, Some(call.name.clone()), raw)
                        }
                        Err(msg) => ToolResult::error(&call.id, Some(call.name.clone()), &msg),
                    }
                }
            };
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo {
        schema: Value,
    }

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "returns its input unchanged"
        }
        fn parameters_schema(&self) -> &Value {
            &self.schema
        }
        async fn run(&self, _ctx: &ToolContext, input: &Value) -> Result<Value, String> {
            Ok(input.clone())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Tool for AlwaysFails {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters_schema(&self) -> &Value {
            static SCHEMA: once_cell::sync::Lazy<Value> =
                once_cell::sync::Lazy::new(|| json!({"type": "object"}));
            &SCHEMA
        }
        async fn run(&self, _ctx: &ToolContext, _input: &Value) -> Result<Value, String> {
            Err("disk on fire".to_string())
        }
    }

    fn call(id: &str, name: &str, input: &str) -> ToolCall {
        ToolCall::new(
            id,
            name,
            serde_json::value::RawValue::from_string(input.to_string()).unwrap(),
        )
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut tk = Toolkit::new();
        let schema = json!({"type": "object"});
        tk.register(Arc::new(Echo { schema: schema.clone() })).unwrap();
        let err = tk.register(Arc::new(Echo { schema })).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn run_preserves_call_order_and_converts_failures() {
        let mut tk = Toolkit::new();
        tk.register(Arc::new(Echo {
            schema: json!({"type": "object"}),
        }))
        .unwrap();
        tk.register(Arc::new(AlwaysFails)).unwrap();

        let calls = vec![
            call("1", "echo", r#"{"x":1}"#),
            call("2", "boom", r#"{}"#),
            call("3", "missing_tool", r#"{}"#),
        ];
        let results = tk.run(&ToolContext::new(), &calls).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "1");
        assert!(!results[0].is_error);
        assert_eq!(results[1].id, "2");
        assert!(results[1].is_error);
        assert!(results[1].content.get().contains("disk on fire"));
        assert_eq!(results[2].id, "3");
        assert!(results[2].is_error);
    }
}
