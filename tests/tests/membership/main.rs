#[macro_use]
#[path = "../fixtures/mod.rs"]
mod fixtures;

// The number indicate the preferred running order for these case.

mod t10_add_learner;
mod t31_remove_leader;
mod t33_health_hysteresis;
