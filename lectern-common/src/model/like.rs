use serde::{Deserialize, Serialize};

/// Outcome of flipping one user's membership in a like set.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Deserialize, Serialize)]
pub struct LikeToggle {
    pub liked: bool,
    pub like_count: i64,
}
