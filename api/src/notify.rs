use dealflow_core::chains::ActionChain;

/// Sink for human-facing alerts about the review queue. The caller owns
/// the queueing decision: `chain_queued` is only ever invoked for
/// chains that entered the human queue (tier >= 2), so implementations
/// notify unconditionally. Notification failures never affect engine
/// consistency: the sink is called after the owning transaction
/// commits.
pub trait NotificationSink: Send + Sync {
    fn chain_queued(&self, chain: &ActionChain);
    fn chain_resolved(&self, chain: &ActionChain);
}

/// Default sink: structured tracing events, picked up by whatever alert
/// pipeline tails the JSON logs.
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn chain_queued(&self, chain: &ActionChain) {
        tracing::info!(
            chain_id = %chain.id,
            deal_id = %chain.deal_id,
            tier = chain.approval_tier.as_i32(),
            significance = chain.significance,
            summary = %chain.summary,
            "chain queued for review"
        );
    }

    fn chain_resolved(&self, chain: &ActionChain) {
        tracing::info!(
            chain_id = %chain.id,
            deal_id = %chain.deal_id,
            status = chain.status.as_str(),
            "chain resolved"
        );
    }
}
