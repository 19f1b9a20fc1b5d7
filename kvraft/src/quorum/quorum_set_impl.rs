use std::collections::BTreeSet;

use crate::quorum::majority_of;
use crate::quorum::QuorumSet;

/// Impl a simple majority quorum set
impl<ID> QuorumSet<ID> for BTreeSet<ID>
where ID: PartialOrd + Ord + Copy + 'static
{
    fn is_quorum<'a, I: Iterator<Item = &'a ID> + Clone>(&self, ids: I) -> bool {
        // An empty config can never be satisfied: there is nobody to vote or to store a log.
        if self.is_empty() {
            return false;
        }

        let mut count = 0;
        let majority = majority_of(self.len());
        let mut seen = BTreeSet::new();
        for id in ids {
            if self.contains(id) && seen.insert(*id) {
                count += 1;
                if count >= majority {
                    return true;
                }
            }
        }

        false
    }
}

/// Impl joint quorum set.
/// The input ids has to be a quorum in every sub-config to constitute a joint-quorum.
impl<ID, QS> QuorumSet<ID> for Vec<QS>
where
    ID: Ord + Copy + 'static,
    QS: QuorumSet<ID>,
{
    fn is_quorum<'a, I: Iterator<Item = &'a ID> + Clone>(&self, ids: I) -> bool {
        if self.is_empty() {
            return false;
        }

        for child in self.iter() {
            if !child.is_quorum(ids.clone()) {
                return false;
            }
        }
        true
    }
}
