use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use agentvisor::exec::{ExecutionContext, ExecutionUnit, UnitFuture};
use agentvisor::types::{InstanceId, Settings, UnitType, UserId};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

/// What one invocation of a [`FakeUnit`] returns.
#[derive(Debug, Clone)]
pub enum Outcome {
    Succeed(Value),
    Fail(String),
}

/// One recorded call to [`FakeUnit::execute`].
#[derive(Debug, Clone)]
pub struct Invocation {
    pub instance_id: InstanceId,
    pub user_id: UserId,
    pub unit_type: UnitType,
    pub config: Settings,
    pub params: Settings,
}

/// Lets a test hold gated [`FakeUnit`] invocations until it is ready.
#[derive(Debug, Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
}

impl Gate {
    /// Let `n` blocked (or future) invocations through.
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    /// Let every invocation through from now on.
    pub fn open(&self) {
        self.permits.close();
    }
}

struct Inner {
    calls: Mutex<Vec<Invocation>>,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    gate: Option<Gate>,
    /// One permit per invocation that has started.
    started: Semaphore,
}

/// An execution unit that:
/// - records every invocation
/// - returns scripted outcomes, then a fallback outcome
/// - optionally blocks on a [`Gate`] before returning.
#[derive(Clone)]
pub struct FakeUnit {
    inner: Arc<Inner>,
}

impl FakeUnit {
    /// Always succeeds with `{"ok": true}`.
    pub fn new() -> Self {
        Self::with_fallback(Outcome::Succeed(json!({ "ok": true })), None)
    }

    pub fn succeeding_with(payload: Value) -> Self {
        Self::with_fallback(Outcome::Succeed(payload), None)
    }

    pub fn failing(message: &str) -> Self {
        Self::with_fallback(Outcome::Fail(message.to_string()), None)
    }

    /// Succeeds with `{"ok": true}`, but each invocation waits for the gate.
    pub fn gated() -> (Self, Gate) {
        let gate = Gate {
            permits: Arc::new(Semaphore::new(0)),
        };
        let unit = Self::with_fallback(Outcome::Succeed(json!({ "ok": true })), Some(gate.clone()));
        (unit, gate)
    }

    fn with_fallback(fallback: Outcome, gate: Option<Gate>) -> Self {
        Self {
            inner: Arc::new(Inner {
                calls: Mutex::new(Vec::new()),
                script: Mutex::new(VecDeque::new()),
                fallback,
                gate,
                started: Semaphore::new(0),
            }),
        }
    }

    /// Queue an outcome for the next unscripted invocation.
    pub fn push_outcome(&self, outcome: Outcome) -> &Self {
        self.inner.script.lock().unwrap().push_back(outcome);
        self
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.lock().unwrap().len()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// Wait until one more invocation has started.
    pub async fn wait_started(&self) {
        self.inner
            .started
            .acquire()
            .await
            .expect("started semaphore is never closed")
            .forget();
    }

    pub fn as_unit(&self) -> Arc<dyn ExecutionUnit> {
        Arc::new(self.clone())
    }
}

impl Default for FakeUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionUnit for FakeUnit {
    fn execute(&self, ctx: ExecutionContext, params: Settings) -> UnitFuture<'_> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            inner.calls.lock().unwrap().push(Invocation {
                instance_id: ctx.instance_id,
                user_id: ctx.user_id.clone(),
                unit_type: ctx.unit_type.clone(),
                config: ctx.config.clone(),
                params,
            });
            inner.started.add_permits(1);

            if let Some(gate) = &inner.gate {
                // A closed gate means "open": let everything through.
                if let Ok(permit) = gate.permits.acquire().await {
                    permit.forget();
                }
            }

            let outcome = inner
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| inner.fallback.clone());
            match outcome {
                Outcome::Succeed(payload) => Ok(payload),
                Outcome::Fail(message) => Err(anyhow::anyhow!(message)),
            }
        })
    }
}
