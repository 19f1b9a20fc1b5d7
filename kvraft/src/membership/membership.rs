use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::fmt::Formatter;

use serde::Deserialize;
use serde::Serialize;

use crate::EntryPayload;
use crate::MessageSummary;
use crate::NodeId;

/// A member of the cluster and the urls its peers reach it at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: NodeId,
    pub peer_urls: BTreeSet<String>,
    pub is_learner: bool,
}

impl Member {
    pub fn new(id: NodeId, peer_urls: impl IntoIterator<Item = impl ToString>) -> Self {
        Self {
            id,
            peer_urls: peer_urls.into_iter().map(|x| x.to_string()).collect(),
            is_learner: false,
        }
    }

    pub fn new_learner(id: NodeId, peer_urls: impl IntoIterator<Item = impl ToString>) -> Self {
        Self {
            is_learner: true,
            ..Self::new(id, peer_urls)
        }
    }
}

impl Display for Member {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let urls = self.peer_urls.iter().cloned().collect::<Vec<_>>().join(",");
        if self.is_learner {
            write!(f, "{}(learner)[{}]", self.id, urls)
        } else {
            write!(f, "{}[{}]", self.id, urls)
        }
    }
}

/// The member set of a cluster, as of some log index.
///
/// It is never mutated in place: every transition is a committed log entry and the next
/// `Membership` is computed by [`Membership::apply`] from the previous one. Replaying the log from a
/// snapshot thus always rebuilds the same member set.
///
/// `configs` holds the voter sets. It has one element normally and two during a joint
/// reconfiguration, in which case a quorum must be reached in both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    configs: Vec<BTreeSet<NodeId>>,
    members: BTreeMap<NodeId, Member>,
    removed: BTreeSet<NodeId>,
}

impl MessageSummary for Membership {
    fn summary(&self) -> String {
        format!(
            "voters:{:?}, learners:{:?}, removed:{:?}",
            self.configs,
            self.learner_ids(),
            self.removed
        )
    }
}

impl Membership {
    /// Build a uniform membership: every non-learner member is a voter.
    pub fn new(members: impl IntoIterator<Item = Member>) -> Self {
        let members = members.into_iter().map(|m| (m.id, m)).collect::<BTreeMap<_, _>>();
        let voters = members.values().filter(|m| !m.is_learner).map(|m| m.id).collect();

        Membership {
            configs: vec![voters],
            members,
            removed: BTreeSet::new(),
        }
    }

    pub fn get_configs(&self) -> &[BTreeSet<NodeId>] {
        &self.configs
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_in_joint_consensus(&self) -> bool {
        self.configs.len() > 1
    }

    /// Ids of all voters: the union of every config.
    pub fn voter_ids(&self) -> BTreeSet<NodeId> {
        self.configs.iter().flatten().copied().collect()
    }

    pub fn learner_ids(&self) -> BTreeSet<NodeId> {
        self.members.values().filter(|m| m.is_learner).map(|m| m.id).collect()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.keys().copied()
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn get_member(&self, id: &NodeId) -> Option<&Member> {
        self.members.get(id)
    }

    pub fn is_voter(&self, id: &NodeId) -> bool {
        self.configs.iter().any(|c| c.contains(id))
    }

    pub fn is_member(&self, id: &NodeId) -> bool {
        self.members.contains_key(id)
    }

    pub fn is_removed(&self, id: &NodeId) -> bool {
        self.removed.contains(id)
    }

    pub fn removed_ids(&self) -> &BTreeSet<NodeId> {
        &self.removed
    }

    /// The quorum set every vote and commit decision is made against.
    pub(crate) fn quorum_set(&self) -> Vec<BTreeSet<NodeId>> {
        self.configs.clone()
    }

    /// Returns a membership with `member` added, as a voter unless it is a learner.
    pub fn add_member(&self, member: Member) -> Membership {
        let mut next = self.clone();
        if !member.is_learner {
            for c in next.configs.iter_mut() {
                c.insert(member.id);
            }
        }
        next.members.insert(member.id, member);
        next
    }

    /// Returns a membership without `id`; the id is recorded as removed.
    pub fn remove_member(&self, id: NodeId) -> Membership {
        let mut next = self.clone();
        for c in next.configs.iter_mut() {
            c.remove(&id);
        }
        next.members.remove(&id);
        next.removed.insert(id);
        next
    }

    /// Returns a membership where learner `id` became a voter.
    pub fn promote(&self, id: NodeId) -> Membership {
        let mut next = self.clone();
        if let Some(m) = next.members.get_mut(&id) {
            m.is_learner = false;
            for c in next.configs.iter_mut() {
                c.insert(id);
            }
        }
        next
    }

    /// Returns the joint membership `[current voters, voters]`.
    ///
    /// Every id in `voters` must already be a member; learners among them become voters.
    pub fn next_joint(&self, voters: BTreeSet<NodeId>) -> Membership {
        let mut next = self.clone();
        for id in voters.iter() {
            if let Some(m) = next.members.get_mut(id) {
                m.is_learner = false;
            }
        }

        let last = self.configs.last().cloned().unwrap_or_default();
        next.configs = vec![last, voters];
        next
    }

    /// Leave joint consensus: keep only the last config.
    ///
    /// Voters that are not in the last config are removed from the cluster.
    pub fn to_final(&self) -> Membership {
        let last = self.configs.last().cloned().unwrap_or_default();

        let mut next = self.clone();
        for id in self.voter_ids() {
            if !last.contains(&id) {
                next.members.remove(&id);
                next.removed.insert(id);
            }
        }
        next.configs = vec![last];
        next
    }

    /// Compute the membership after applying a log payload, or `None` if the payload does not
    /// change it.
    pub fn apply(&self, payload: &EntryPayload) -> Option<Membership> {
        match payload {
            EntryPayload::Blank | EntryPayload::Data(_) => None,
            EntryPayload::AddMember(m) => Some(self.add_member(m.clone())),
            EntryPayload::RemoveMember(id) => Some(self.remove_member(*id)),
            EntryPayload::ConfigChange(m) => Some(m.clone()),
        }
    }
}
