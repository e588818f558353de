pub mod builders;
pub mod fake_unit;

use std::sync::{Arc, Once};

use agentvisor::coord::RuleTable;
use agentvisor::engine::Orchestrator;
use agentvisor::notify::{ChannelSink, OrchestratorEvent};
use agentvisor::store::MemoryInstanceStore;
use agentvisor::types::Settings;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::{fmt, EnvFilter};

pub use fake_unit::{FakeUnit, Gate, Invocation, Outcome};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// An orchestrator wired to an in-memory store and a channel sink.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: MemoryInstanceStore,
    pub events: UnboundedReceiver<OrchestratorEvent>,
}

impl Harness {
    /// Register each `(unit_type, unit)` pair with empty default config.
    pub fn new(rules: RuleTable, units: &[(&str, &FakeUnit)]) -> Self {
        Self::with_store(rules, units, MemoryInstanceStore::new())
    }

    pub fn with_store(rules: RuleTable, units: &[(&str, &FakeUnit)], store: MemoryInstanceStore) -> Self {
        let (sink, events) = ChannelSink::new();
        let mut orchestrator = Orchestrator::new(rules, Arc::new(store.clone()), Arc::new(sink));
        for (name, unit) in units {
            orchestrator
                .register(*name, unit.as_unit(), Settings::new())
                .expect("register fake unit");
        }
        Self {
            orchestrator,
            store,
            events,
        }
    }

    /// Everything published so far.
    pub fn drain_events(&mut self) -> Vec<OrchestratorEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }
}
