//! # Consensus Finder
//!
//! Plurality vote over a round of peer statuses. No leader, no I/O.
//!
//! Height/hash and checkpoint height/hash are tallied independently. Ties on
//! vote count go to the higher height; a remaining tie (same height, same
//! votes, different hash) goes to the larger hash so the result never
//! depends on input order.

use std::collections::HashMap;

use crate::domain::{CheckpointInfo, Consensus, Hash, PeerStatus};

/// Find the (height, hash) and checkpoint most peers agree on.
///
/// Peers reporting height 0 do not vote. Returns `None` when no peer voted.
pub fn find_consensus(statuses: &[PeerStatus]) -> Option<Consensus> {
    let heads = statuses
        .iter()
        .filter(|s| s.current_height > 0)
        .map(|s| (s.current_height, s.latest_block_hash));
    let ((height, block_hash), peers) = plurality(heads)?;

    let checkpoints = statuses
        .iter()
        .filter(|s| s.current_height > 0 && !s.checkpoint.is_empty())
        .map(|s| (s.checkpoint.height, s.checkpoint.hash));
    let (checkpoint, checkpoint_peers) = match plurality(checkpoints) {
        Some(((cp_height, cp_hash), votes)) => (Some(CheckpointInfo::new(cp_height, cp_hash)), votes),
        None => (None, 0),
    };

    Some(Consensus {
        height,
        peers,
        block_hash,
        checkpoint,
        checkpoint_peers,
    })
}

/// Most-voted pair with the deterministic tie-break.
fn plurality(votes: impl Iterator<Item = (u64, Hash)>) -> Option<((u64, Hash), usize)> {
    let mut tally: HashMap<(u64, Hash), usize> = HashMap::new();
    for pair in votes {
        *tally.entry(pair).or_insert(0) += 1;
    }
    tally
        .into_iter()
        .max_by(|(a, a_votes), (b, b_votes)| a_votes.cmp(b_votes).then_with(|| a.cmp(b)))
}
