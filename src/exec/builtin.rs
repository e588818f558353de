// src/exec/builtin.rs

//! Built-in units selectable from config via `kind = "..."`.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::exec::command::CommandUnit;
use crate::exec::unit::{ExecutionContext, ExecutionUnit, UnitFuture};
use crate::types::{Settings, UnitKind};

/// Returns the merged configuration and params unchanged.
#[derive(Debug, Clone, Default)]
pub struct EchoUnit;

impl ExecutionUnit for EchoUnit {
    fn execute(&self, ctx: ExecutionContext, params: Settings) -> UnitFuture<'_> {
        Box::pin(async move {
            Ok(json!({
                "unit": ctx.unit_type,
                "user": ctx.user_id,
                "config": Value::Object(ctx.config),
                "params": Value::Object(params),
            }))
        })
    }
}

/// Implementation backing a configured unit kind.
pub fn unit_for_kind(kind: UnitKind) -> Arc<dyn ExecutionUnit> {
    match kind {
        UnitKind::Command => Arc::new(CommandUnit::new()),
        UnitKind::Echo => Arc::new(EchoUnit),
    }
}
