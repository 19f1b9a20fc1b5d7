use std::collections::BTreeMap;

/// A set of quorums is a collection of quorum.
///
/// A quorum is a collection of nodes that a read or write operation in distributed system has to
/// contact to. See: <http://web.mit.edu/6.033/2005/wwwdocs/quorum_note.html>
pub(crate) trait QuorumSet<ID: 'static> {
    /// Check if a series of ID constitute a quorum that is defined by this quorum set.
    fn is_quorum<'a, I: Iterator<Item = &'a ID> + Clone>(&self, ids: I) -> bool;

    /// Returns the greatest value that has been reached by a quorum.
    ///
    /// `values` maps an id to a monotonic value, e.g. the highest log index it has durably stored.
    /// Ids absent from `values` are treated as having reached nothing.
    fn quorum_value<V>(&self, values: &BTreeMap<ID, V>) -> Option<V>
    where
        ID: Ord,
        V: Ord + Copy,
    {
        let mut candidates = values.values().copied().collect::<Vec<_>>();
        candidates.sort_unstable_by(|a, b| b.cmp(a));
        candidates.dedup();

        candidates.into_iter().find(|v| {
            let reached = values.iter().filter(|(_, x)| *x >= v).map(|(id, _)| id);
            self.is_quorum(reached)
        })
    }
}
