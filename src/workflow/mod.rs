pub mod batch_ctx;
pub mod escalation_flow;

pub use batch_ctx::{BatchCtx, BatchItem};
pub use escalation_flow::{BatchOutcome, EscalationFlow};
