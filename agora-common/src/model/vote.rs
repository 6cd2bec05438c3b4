//! Vote bookkeeping for posts.
//!
//! A post holds at most one [`Vote`] per user. Casting a vote follows toggle
//! semantics: if the voter already has a vote on the post it is removed, whatever
//! direction was requested; otherwise a requested direction is inserted. Flipping
//! an upvote into a downvote therefore takes two calls.
//!
//! After every change the post's aggregate [`Rating`] is recomputed from the full
//! vote collection.

use crate::model::{Id, user::UserMarker};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{Error, Unexpected},
};
use thiserror::Error;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    #[must_use]
    pub fn score(self) -> i8 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Vote score must be 1 or -1, got {0}")]
pub struct InvalidVoteDirectionError(i64);

impl TryFrom<i64> for VoteDirection {
    type Error = InvalidVoteDirectionError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(VoteDirection::Up),
            -1 => Ok(VoteDirection::Down),
            other => Err(InvalidVoteDirectionError(other)),
        }
    }
}

impl Serialize for VoteDirection {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i8(self.score())
    }
}

impl<'de> Deserialize<'de> for VoteDirection {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = i64::deserialize(deserializer)?;
        VoteDirection::try_from(inner)
            .map_err(|_| Error::invalid_value(Unexpected::Signed(inner), &"1 or -1"))
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
pub struct Vote {
    #[serde(rename = "user")]
    pub user_id: Id<UserMarker>,
    #[serde(rename = "vote")]
    pub direction: VoteDirection,
}

/// What casting a vote did to the vote collection.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum VoteOutcome {
    Inserted,
    Removed,
    Unchanged,
}

/// Aggregate fields derived from a vote collection.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct Rating {
    pub score: i64,
    pub upvote_percentage: i64,
}

impl Rating {
    /// Recomputes the rating from scratch.
    ///
    /// The percentage divides before multiplying, so it is 100 for unanimous upvotes
    /// and 0 otherwise. Existing clients rely on these values.
    #[must_use]
    pub fn from_votes(votes: &[Vote]) -> Self {
        let (upvotes, downvotes) =
            votes
                .iter()
                .fold((0_i64, 0_i64), |(up, down), vote| match vote.direction {
                    VoteDirection::Up => (up + 1, down),
                    VoteDirection::Down => (up, down + 1),
                });

        let total = upvotes + downvotes;
        let upvote_percentage = if total > 0 {
            (upvotes / total) * 100
        } else {
            0
        };

        Self {
            score: upvotes - downvotes,
            upvote_percentage,
        }
    }
}

/// Applies a vote request to `votes`. `None` asks to discard the voter's vote.
pub fn apply_vote(
    votes: &mut Vec<Vote>,
    voter: Id<UserMarker>,
    requested: Option<VoteDirection>,
) -> VoteOutcome {
    if let Some(index) = votes.iter().position(|vote| vote.user_id == voter) {
        votes.swap_remove(index);
        return VoteOutcome::Removed;
    }

    match requested {
        Some(direction) => {
            votes.push(Vote {
                user_id: voter,
                direction,
            });
            VoteOutcome::Inserted
        }
        None => VoteOutcome::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{
        Id,
        user::UserMarker,
        vote::{Rating, Vote, VoteDirection, VoteOutcome, apply_vote},
    };

    fn vote(user_id: Id<UserMarker>, direction: VoteDirection) -> Vote {
        Vote { user_id, direction }
    }

    #[test]
    fn first_vote_is_inserted() {
        let voter = Id::generate();

        for direction in [VoteDirection::Up, VoteDirection::Down] {
            let mut votes = Vec::new();
            assert_eq!(
                apply_vote(&mut votes, voter, Some(direction)),
                VoteOutcome::Inserted
            );
            assert_eq!(votes, [vote(voter, direction)]);
        }
    }

    #[test]
    fn discard_without_vote_is_a_no_op() {
        let other = Id::generate();
        let mut votes = vec![vote(other, VoteDirection::Up)];

        assert_eq!(
            apply_vote(&mut votes, Id::generate(), None),
            VoteOutcome::Unchanged
        );
        assert_eq!(votes, [vote(other, VoteDirection::Up)]);
    }

    #[test]
    fn existing_vote_is_always_removed() {
        let voter = Id::generate();
        let requests = [
            (VoteDirection::Up, None),
            (VoteDirection::Up, Some(VoteDirection::Up)),
            (VoteDirection::Up, Some(VoteDirection::Down)),
            (VoteDirection::Down, Some(VoteDirection::Up)),
            (VoteDirection::Down, Some(VoteDirection::Down)),
        ];

        for (existing, requested) in requests {
            let mut votes = vec![vote(voter, existing)];
            assert_eq!(
                apply_vote(&mut votes, voter, requested),
                VoteOutcome::Removed
            );
            assert!(votes.is_empty());
        }
    }

    #[test]
    fn upvoting_twice_toggles_off() {
        let voter = Id::generate();
        let mut votes = Vec::new();

        apply_vote(&mut votes, voter, Some(VoteDirection::Up));
        apply_vote(&mut votes, voter, Some(VoteDirection::Up));

        assert!(votes.iter().all(|vote| vote.user_id != voter));
    }

    #[test]
    fn removal_moves_last_vote_into_the_gap() {
        let (first, second, third) = (Id::generate(), Id::generate(), Id::generate());
        let mut votes = vec![
            vote(first, VoteDirection::Up),
            vote(second, VoteDirection::Down),
            vote(third, VoteDirection::Up),
        ];

        apply_vote(&mut votes, first, None);

        assert_eq!(
            votes,
            [vote(third, VoteDirection::Up), vote(second, VoteDirection::Down)]
        );
    }

    #[test]
    fn at_most_one_vote_per_user() {
        let voters: Vec<Id<UserMarker>> = (0..4).map(|_| Id::generate()).collect();
        let mut votes = Vec::new();

        for round in 0..5 {
            for (index, voter) in voters.iter().enumerate() {
                let requested = match (round + index) % 3 {
                    0 => Some(VoteDirection::Up),
                    1 => Some(VoteDirection::Down),
                    _ => None,
                };
                apply_vote(&mut votes, *voter, requested);

                for voter in &voters {
                    assert!(votes.iter().filter(|vote| vote.user_id == *voter).count() <= 1);
                }

                let rating = Rating::from_votes(&votes);
                let ups = votes
                    .iter()
                    .filter(|vote| vote.direction == VoteDirection::Up)
                    .count();
                let downs = votes.len() - ups;
                assert_eq!(
                    rating.score,
                    i64::try_from(ups).unwrap() - i64::try_from(downs).unwrap()
                );
            }
        }
    }

    #[test]
    fn rating_of_no_votes() {
        assert_eq!(
            Rating::from_votes(&[]),
            Rating {
                score: 0,
                upvote_percentage: 0
            }
        );
    }

    #[test]
    fn rating_truncates_percentage() {
        let votes = [
            vote(Id::generate(), VoteDirection::Up),
            vote(Id::generate(), VoteDirection::Up),
            vote(Id::generate(), VoteDirection::Down),
        ];

        assert_eq!(
            Rating::from_votes(&votes),
            Rating {
                score: 1,
                upvote_percentage: 0
            }
        );
        assert_eq!(
            Rating::from_votes(&votes[..2]),
            Rating {
                score: 2,
                upvote_percentage: 100
            }
        );
        assert_eq!(
            Rating::from_votes(&votes[2..]),
            Rating {
                score: -1,
                upvote_percentage: 0
            }
        );
    }

    #[test]
    fn vote_wire_format() {
        let voter = Id::generate();
        let json = serde_json::to_value(vote(voter, VoteDirection::Down)).unwrap();

        assert_eq!(
            json,
            serde_json::json!({ "user": voter.to_string(), "vote": -1 })
        );
        assert!(serde_json::from_value::<Vote>(serde_json::json!({ "user": voter, "vote": 0 })).is_err());
    }
}
