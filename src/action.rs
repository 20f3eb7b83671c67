use std::sync::Arc;

use async_trait::async_trait;

use crate::{context::ExecutionContext, marshal::MarshalCode, RuntimeResult};

/// A unit of side-effecting work. This is the only entry point a plugin has
/// to implement.
#[async_trait]
pub trait Action: MarshalCode {
    async fn run(&self, ctx: &ExecutionContext) -> RuntimeResult<()>;

    /// Actions that can run inside a scope built by their caller return
    /// themselves here.
    fn as_scope_action(&self) -> Option<&dyn ScopeAction> {
        None
    }
}

/// An action that normally opens a runtime scope of its own, but can also
/// run inside one its caller already built.
#[async_trait]
pub trait ScopeAction: Action {
    async fn run_with_scope(&self, scope: &ExecutionContext) -> RuntimeResult<()>;
}

/// Runs `action` directly in `ctx` when it can share the scope, otherwise
/// lets it open its own.
pub async fn run_in_scope(action: &Arc<dyn Action>, ctx: &ExecutionContext) -> RuntimeResult<()> {
    match action.as_scope_action() {
        Some(scoped) => scoped.run_with_scope(ctx).await,
        None => action.run(ctx).await,
    }
}
