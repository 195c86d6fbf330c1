//! Concurrent tool-call executor: dispatches a batch of tool calls in
//! parallel, each future raced against a per-call cancellation token inside
//! `tokio::select!`, the whole batch driven with `futures_util::join_all`. A
//! cancelled call resolves to a synthetic error result rather than being
//! dropped. `join_all` preserves the input order of its future vector
//! regardless of completion order; results are additionally collected by id
//! and replayed in request order rather than appended as they complete, so
//! the reassembly is explicit and doesn't depend on that implementation
//! detail of `join_all`.
//!
//! Bounded concurrency (`max_parallel_tools`) is layered on top with a
//! `tokio::sync::Semaphore`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::message::Block;
use crate::tools::{ToolContext, ToolError, ToolRegistry};

/// One entry in a batch dispatch: the original request-order index, the
/// tool-use id, tool name, and input payload.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl PendingCall {
    pub fn from_blocks(blocks: &[Block]) -> Vec<PendingCall> {
        blocks
            .iter()
            .filter_map(|b| match b {
                Block::ToolUse { id, name, input } => Some(PendingCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// A completed tool call: id plus the `Ok`/`Err` payload to embed in the
/// following tool-result message.
#[derive(Debug, Clone)]
pub struct CompletedCall {
    pub id: String,
    pub result: Result<serde_json::Value, ToolError>,
}

/// Dispatches `calls` concurrently (bounded by `max_parallel` permits from
/// `permits`), then reassembles the results in the same order `calls` was
/// given — never in completion order. A call still running when
/// `cancellation_token` fires resolves to `ToolError::Cancelled` instead of
/// being awaited further.
#[instrument(
    name = "agent.tool_call",
    skip(registry, calls, permits, context_for, cancellation_token),
    fields(batch_size = calls.len())
)]
pub async fn execute_batch(
    registry: &ToolRegistry,
    calls: &[PendingCall],
    permits: Arc<Semaphore>,
    context_for: impl Fn(&PendingCall) -> ToolContext,
    cancellation_token: CancellationToken,
    per_call_timeout: Duration,
) -> Vec<CompletedCall> {
    if calls.is_empty() {
        return Vec::new();
    }

    let mut futures = Vec::with_capacity(calls.len());
    for call in calls {
        let permits = permits.clone();
        let cancel = cancellation_token.clone();
        let context = context_for(call);
        let id = call.id.clone();

        let result_future = async move {
            let _permit = match permits.acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    return CompletedCall {
                        id: id.clone(),
                        result: Err(ToolError::Other("executor shutting down".into())),
                    };
                }
            };

            if let Err(e) = registry.validate(&call.name, &call.input) {
                return CompletedCall { id: id.clone(), result: Err(e) };
            }

            let tool = match registry.lookup(&call.name) {
                Some(t) => t,
                None => {
                    return CompletedCall {
                        id: id.clone(),
                        result: Err(ToolError::NotFound(call.name.clone())),
                    };
                }
            };

            tokio::select! {
                result = tool.call(call.input.clone(), &context) => {
                    CompletedCall { id: id.clone(), result }
                }
                _ = cancel.cancelled() => {
                    CompletedCall {
                        id: id.clone(),
                        result: Err(ToolError::Cancelled("tool call cancelled".into())),
                    }
                }
                _ = tokio::time::sleep(per_call_timeout) => {
                    CompletedCall {
                        id: id.clone(),
                        result: Err(ToolError::Cancelled("timeout".into())),
                    }
                }
            }
        };
        futures.push(result_future);
    }

    let completed = join_all(futures).await;

    // Reassemble in request order: collect by id first so out-of-order
    // completion (the whole point of running them concurrently) never
    // leaks into the reply order the model sees next turn.
    let by_id: HashMap<String, CompletedCall> =
        completed.into_iter().map(|c| (c.id.clone(), c)).collect();

    calls
        .iter()
        .map(|c| {
            by_id
                .get(&c.id)
                .cloned()
                .unwrap_or_else(|| CompletedCall {
                    id: c.id.clone(),
                    result: Err(ToolError::Other("lost tool result".into())),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AgentState;
    use crate::tools::{EffectClass, Tool};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;
    use tokio::time::Duration as TokioDuration;

    struct Delayed {
        name: &'static str,
        delay_ms: u64,
        order: StdArc<std::sync::Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Tool for Delayed {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn effect_class(&self) -> EffectClass {
            EffectClass::Pure
        }
        async fn call(
            &self,
            _input: serde_json::Value,
            _context: &ToolContext,
        ) -> Result<serde_json::Value, ToolError> {
            tokio::time::sleep(TokioDuration::from_millis(self.delay_ms)).await;
            self.order.lock().unwrap().push(self.name);
            Ok(serde_json::json!({ "who": self.name }))
        }
    }

    #[tokio::test]
    async fn results_reassembled_in_request_order_not_completion_order() {
        let order = StdArc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        registry.register(StdArc::new(Delayed {
            name: "slow",
            delay_ms: 40,
            order: order.clone(),
        }));
        registry.register(StdArc::new(Delayed {
            name: "fast",
            delay_ms: 1,
            order: order.clone(),
        }));

        let calls = vec![
            PendingCall {
                id: "call_1".into(),
                name: "slow".into(),
                input: serde_json::json!({}),
            },
            PendingCall {
                id: "call_2".into(),
                name: "fast".into(),
                input: serde_json::json!({}),
            },
        ];

        let state = StdArc::new(AgentState::new());
        let results = execute_batch(
            &registry,
            &calls,
            Arc::new(Semaphore::new(4)),
            |_| ToolContext::new(state.clone(), "s1"),
            CancellationToken::new(),
            Duration::from_secs(5),
        )
        .await;

        // "fast" finishes first in wall-clock terms...
        assert_eq!(*order.lock().unwrap(), vec!["fast", "slow"]);
        // ...but results still come back in request order (call_1 then call_2).
        assert_eq!(results[0].id, "call_1");
        assert_eq!(results[1].id, "call_2");
    }

    #[tokio::test]
    async fn cancelled_calls_produce_synthetic_error_results() {
        let counter = StdArc::new(AtomicUsize::new(0));
        struct Forever(StdArc<AtomicUsize>);
        #[async_trait]
        impl Tool for Forever {
            fn name(&self) -> &str {
                "forever"
            }
            fn description(&self) -> &str {
                "never resolves"
            }
            fn input_schema(&self) -> serde_json::Value {
                serde_json::json!({"type": "object"})
            }
            fn effect_class(&self) -> EffectClass {
                EffectClass::Pure
            }
            async fn call(
                &self,
                _input: serde_json::Value,
                _context: &ToolContext,
            ) -> Result<serde_json::Value, ToolError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                futures_util::future::pending::<()>().await;
                unreachable!()
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(StdArc::new(Forever(counter.clone())));

        let token = CancellationToken::new();
        let calls = vec![PendingCall {
            id: "call_1".into(),
            name: "forever".into(),
            input: serde_json::json!({}),
        }];

        let state = StdArc::new(AgentState::new());
        let canceller = {
            let token = token.clone();
            async move {
                tokio::time::sleep(TokioDuration::from_millis(10)).await;
                token.cancel();
            }
        };
        let batch = execute_batch(
            &registry,
            &calls,
            Arc::new(Semaphore::new(4)),
            |_| ToolContext::new(state.clone(), "s1"),
            token,
            Duration::from_secs(5),
        );

        let (results, _) = tokio::join!(batch, canceller);
        assert!(matches!(results[0].result, Err(ToolError::Cancelled(_))));
    }

    #[tokio::test]
    async fn a_batch_with_some_failing_handlers_still_returns_n_results() {
        struct Flaky;
        #[async_trait]
        impl Tool for Flaky {
            fn name(&self) -> &str {
                "flaky"
            }
            fn description(&self) -> &str {
                "fails on odd-numbered ids, succeeds otherwise"
            }
            fn input_schema(&self) -> serde_json::Value {
                serde_json::json!({"type": "object"})
            }
            fn effect_class(&self) -> EffectClass {
                EffectClass::Pure
            }
            async fn call(
                &self,
                input: serde_json::Value,
                _context: &ToolContext,
            ) -> Result<serde_json::Value, ToolError> {
                if input["fail"].as_bool().unwrap_or(false) {
                    Err(ToolError::Other("boom".into()))
                } else {
                    Ok(serde_json::json!({"ok": true}))
                }
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(StdArc::new(Flaky));

        let calls: Vec<PendingCall> = (0..5)
            .map(|i| PendingCall {
                id: format!("call_{i}"),
                name: "flaky".into(),
                input: serde_json::json!({"fail": i % 2 == 0}),
            })
            .collect();

        let state = StdArc::new(AgentState::new());
        let results = execute_batch(
            &registry,
            &calls,
            Arc::new(Semaphore::new(4)),
            |_| ToolContext::new(state.clone(), "s1"),
            CancellationToken::new(),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(results.len(), 5);
        let errors = results.iter().filter(|r| r.result.is_err()).count();
        assert_eq!(errors, 3);
        // the ids line up with the request order even though some failed.
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.id, format!("call_{i}"));
        }
    }

    // For any interleaving of completion order, the reassembled results
    // equal the requested ids positionally.
    mod order_preservation_property {
        use super::*;
        use proptest::prelude::*;

        struct DelayedById {
            delays_ms: StdArc<std::sync::Mutex<HashMap<String, u64>>>,
        }

        #[async_trait]
        impl Tool for DelayedById {
            fn name(&self) -> &str {
                "delayed"
            }
            fn description(&self) -> &str {
                "sleeps for the delay keyed by its own tool-use id"
            }
            fn input_schema(&self) -> serde_json::Value {
                serde_json::json!({"type": "object"})
            }
            fn effect_class(&self) -> EffectClass {
                EffectClass::Pure
            }
            async fn call(
                &self,
                input: serde_json::Value,
                _context: &ToolContext,
            ) -> Result<serde_json::Value, ToolError> {
                let id = input["id"].as_str().unwrap().to_string();
                let delay = *self.delays_ms.lock().unwrap().get(&id).unwrap_or(&0);
                tokio::time::sleep(TokioDuration::from_millis(delay)).await;
                Ok(serde_json::json!({ "id": id }))
            }
        }

        proptest! {
            #[test]
            fn reassembly_matches_request_order_for_any_delay_permutation(
                delays in proptest::collection::vec(0u64..30, 2..8)
            ) {
                let rt = tokio::runtime::Runtime::new().unwrap();
                rt.block_on(async {
                    let n = delays.len();
                    let ids: Vec<String> = (0..n).map(|i| format!("call_{i}")).collect();
                    let delay_map: HashMap<String, u64> = ids
                        .iter()
                        .cloned()
                        .zip(delays.iter().copied())
                        .collect();

                    let mut registry = ToolRegistry::new();
                    registry.register(StdArc::new(DelayedById {
                        delays_ms: StdArc::new(std::sync::Mutex::new(delay_map)),
                    }));

                    let calls: Vec<PendingCall> = ids
                        .iter()
                        .map(|id| PendingCall {
                            id: id.clone(),
                            name: "delayed".into(),
                            input: serde_json::json!({ "id": id }),
                        })
                        .collect();

                    let state = StdArc::new(AgentState::new());
                    let results = execute_batch(
                        &registry,
                        &calls,
                        Arc::new(Semaphore::new(4)),
                        |_| ToolContext::new(state.clone(), "s1"),
                        CancellationToken::new(),
                        Duration::from_secs(5),
                    )
                    .await;

                    let got: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
                    let expected: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
                    prop_assert_eq!(got, expected);
                    Ok(())
                })?;
            }
        }
    }
}
