//! A quorum is a set of nodes a vote request or append-entries request has to contact to.
//! The most common quorum is **majority**.
//! A quorum set is a collection of quorums, e.g. the quorum set of majority of `{a,b,c}` is `{a,b}, {b,c}, {a,c}`.
//!
//! During a joint reconfiguration the quorum set is a `Vec` of majorities: a set of ids is a
//! quorum only if it is a quorum of every sub-config.

mod quorum_set;
mod quorum_set_impl;


pub(crate) use quorum_set::QuorumSet;

/// Returns the number of ids that form a strict majority of `n` ids.
pub(crate) fn majority_of(n: usize) -> usize {
    n / 2 + 1
}
