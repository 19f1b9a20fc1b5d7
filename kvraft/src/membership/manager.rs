use std::collections::BTreeSet;

use crate::error::ChangeMembershipError;
use crate::error::QuorumUnsafe;
use crate::health::HealthSnapshot;
use crate::EntryPayload;
use crate::Member;
use crate::Membership;
use crate::NodeId;

/// Validates a membership change request and turns it into the log payload to propose.
///
/// It works on the effective membership, i.e. the last one committed and applied, and on a
/// health snapshot taken when the request is handled. Nothing is proposed for a rejected request.
///
/// With `strict` the quorum-safety gate is enforced:
/// - adding a voter requires `healthy > (voters + 1) / 2`;
/// - removing a voter requires `healthy excluding it > (voters - 1) / 2`.
///
/// The local node is the leader handling the request and always counts as healthy.
pub(crate) struct MembershipManager<'a> {
    local_id: NodeId,
    strict: bool,
    membership: &'a Membership,
    health: HealthSnapshot,
}

impl<'a> MembershipManager<'a> {
    pub(crate) fn new(local_id: NodeId, strict: bool, membership: &'a Membership, health: HealthSnapshot) -> Self {
        Self {
            local_id,
            strict,
            membership,
            health,
        }
    }

    fn is_healthy(&self, id: &NodeId) -> bool {
        *id == self.local_id || self.health.is_healthy(id)
    }

    fn healthy_voters(&self, exclude: Option<NodeId>) -> usize {
        self.membership
            .voter_ids()
            .iter()
            .filter(|id| Some(**id) != exclude)
            .filter(|id| self.is_healthy(id))
            .count()
    }

    /// Check that adding one voter keeps a healthy quorum.
    fn ensure_add_voter_safe(&self, id: NodeId) -> Result<(), ChangeMembershipError> {
        if !self.strict {
            return Ok(());
        }

        let voters = self.membership.voter_ids().len();
        let healthy = self.healthy_voters(None);
        let prospective = voters + 1;

        // Growing a single-voter cluster is the only way to restore a cluster from one member.
        if voters == 1 && healthy == 1 {
            tracing::debug!(id, "single voter cluster: accept adding a voter");
            return Ok(());
        }

        if healthy * 2 > prospective {
            return Ok(());
        }

        tracing::warn!(id, healthy, prospective, "reject adding voter");
        Err(QuorumUnsafe {
            change: format!("add member {}", id),
            healthy,
            prospective,
        }
        .into())
    }

    pub(crate) fn add_member(&self, member: Member) -> Result<EntryPayload, ChangeMembershipError> {
        let id = member.id;
        if self.membership.is_member(&id) || self.membership.is_removed(&id) {
            return Err(ChangeMembershipError::MemberExists { id });
        }

        if !member.is_learner {
            self.ensure_add_voter_safe(id)?;
        }

        Ok(EntryPayload::AddMember(member))
    }

    pub(crate) fn remove_member(&self, id: NodeId) -> Result<EntryPayload, ChangeMembershipError> {
        let member = self.membership.get_member(&id).ok_or(ChangeMembershipError::MemberNotFound { id })?;

        if member.is_learner {
            return Ok(EntryPayload::RemoveMember(id));
        }

        let prospective = self.membership.voter_ids().len() - 1;
        if prospective == 0 {
            return Err(ChangeMembershipError::EmptyMembership);
        }

        if self.strict {
            let healthy = self.healthy_voters(Some(id));
            if healthy * 2 <= prospective {
                tracing::warn!(id, healthy, prospective, "reject removing voter");
                return Err(QuorumUnsafe {
                    change: format!("remove member {}", id),
                    healthy,
                    prospective,
                }
                .into());
            }
        }

        Ok(EntryPayload::RemoveMember(id))
    }

    /// Turn learner `id` into a voter.
    ///
    /// `matched` is the highest log index the learner stored and `leader_last` the leader's last
    /// log index. A learner that has not caught up to 90% of the leader's log is not ready.
    pub(crate) fn promote_member(
        &self,
        id: NodeId,
        matched: u64,
        leader_last: u64,
    ) -> Result<EntryPayload, ChangeMembershipError> {
        let member = self.membership.get_member(&id).ok_or(ChangeMembershipError::MemberNotFound { id })?;

        if !member.is_learner {
            return Err(ChangeMembershipError::NotLearner { id });
        }

        if matched * 10 < leader_last * 9 {
            return Err(ChangeMembershipError::LearnerNotReady {
                id,
                matched,
                leader_last,
            });
        }

        self.ensure_add_voter_safe(id)?;

        Ok(EntryPayload::ConfigChange(self.membership.promote(id)))
    }

    /// Enter joint consensus towards the voter set `voters`.
    pub(crate) fn change_voters(&self, voters: BTreeSet<NodeId>) -> Result<EntryPayload, ChangeMembershipError> {
        if voters.is_empty() {
            return Err(ChangeMembershipError::EmptyMembership);
        }

        for id in voters.iter() {
            if !self.membership.is_member(id) {
                return Err(ChangeMembershipError::MemberNotFound { id: *id });
            }
        }

        if self.strict {
            let healthy = voters.iter().filter(|id| self.is_healthy(id)).count();
            let prospective = voters.len();
            if healthy * 2 <= prospective {
                tracing::warn!(?voters, healthy, prospective, "reject changing voters");
                return Err(QuorumUnsafe {
                    change: format!("change voters to {:?}", voters),
                    healthy,
                    prospective,
                }
                .into());
            }
        }

        Ok(EntryPayload::ConfigChange(self.membership.next_joint(voters)))
    }
}
