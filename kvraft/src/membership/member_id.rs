use std::collections::BTreeSet;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use byteorder::BigEndian;
use byteorder::ByteOrder;
use sha1::Digest;
use sha1::Sha1;

use crate::NodeId;

/// Derive a member id from its peer urls, the cluster name and the time it is added.
///
/// The id is the first 8 bytes, big-endian, of the sha1 of the concatenated sorted urls, the
/// cluster name and the unix time in seconds. Adding the same urls again within the same second
/// yields the same id, which the membership then rejects as a duplicate.
pub fn compute_member_id(peer_urls: &BTreeSet<String>, cluster_name: &str, now: Option<SystemTime>) -> NodeId {
    let mut hasher = Sha1::new();

    for url in peer_urls {
        hasher.update(url.as_bytes());
    }
    hasher.update(cluster_name.as_bytes());

    if let Some(now) = now {
        let secs = now.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
        hasher.update(secs.to_string().as_bytes());
    }

    let digest = hasher.finalize();
    BigEndian::read_u64(&digest[..8])
}
