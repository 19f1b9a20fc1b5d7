mod manager;
mod member_id;
#[allow(clippy::module_inception)] mod membership;


pub(crate) use manager::MembershipManager;
pub use member_id::compute_member_id;
pub use membership::Member;
pub use membership::Membership;
