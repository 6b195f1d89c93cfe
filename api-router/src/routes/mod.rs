pub mod brain;
pub mod liveness;
pub mod nexus;
pub mod readiness;
