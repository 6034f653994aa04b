use dealflow_core::chains::ProposedAction;

/// Seam to the execution side-effect handler. The engine only records
/// that execution was authorized — it hands the (possibly merged)
/// payload across this trait and performs no side effect itself.
pub trait ExecutionHandler: Send + Sync {
    /// Called after an action is authorized (approve or modify-approve),
    /// with the payload as it should be executed.
    fn dispatch(&self, action: &ProposedAction);
}

/// Default handler: audit-log the authorization. A real deployment
/// swaps in a handler that enqueues the payload for its executor.
pub struct AuditLogExecutor;

impl ExecutionHandler for AuditLogExecutor {
    fn dispatch(&self, action: &ProposedAction) {
        tracing::info!(
            action_id = %action.id,
            chain_id = %action.chain_id,
            action_type = %action.action_type,
            target = %action.target_entity_type,
            payload = %action.payload,
            "action authorized for execution"
        );
    }
}
