//! Filters: which objects take part in a classification.

use crate::domain::ClassificationError;
use crate::stream::ObjectContext;

use super::unit::Unit;

/// Verdict of one filter. `Unknown` defers to the other filters and is not
/// a vote against the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterVote {
    True,
    False,
    Unknown,
}

impl From<bool> for FilterVote {
    fn from(keep: bool) -> Self {
        if keep {
            FilterVote::True
        } else {
            FilterVote::False
        }
    }
}

pub trait Filter: Unit {
    /// # Errors
    ///
    /// Any failure aborts the classification request.
    fn filter(&mut self, object: &ObjectContext<'_>) -> Result<FilterVote, ClassificationError>;
}
