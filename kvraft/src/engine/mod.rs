//! The raft algorithm without IO.

mod engine_config;
mod engine_impl;
mod progress;
mod raft_log;
mod ready;

#[cfg(test)] pub(crate) mod testing;

pub(crate) use engine_config::EngineConfig;
pub(crate) use engine_impl::Engine;
pub(crate) use raft_log::RaftLog;
pub(crate) use ready::Ready;
