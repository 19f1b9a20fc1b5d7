#[macro_use]
#[path = "../fixtures/mod.rs"]
mod fixtures;

// The number indicate the preferred running order for these case.

mod t10_single_node;
mod t20_replication;
mod t30_restart;
mod t40_shutdown;
mod t50_wal_restart;
