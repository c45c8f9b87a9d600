pub mod reconciler;
pub mod recount;

use serde::Serialize;
use std::fmt;

use crate::db::models::EntityRef;

pub use reconciler::{DeltaPlan, ReconcileReport, Reconciler};
pub use recount::RecountOutcome;

/// The three denormalized counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum CounterField {
    UserPosts,
    UserComments,
    PostComments,
}

impl CounterField {
    pub fn owner(self, id: i64) -> EntityRef {
        match self {
            CounterField::UserPosts | CounterField::UserComments => EntityRef::user(id),
            CounterField::PostComments => EntityRef::post(id),
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            CounterField::UserPosts => "posts_count",
            CounterField::UserComments | CounterField::PostComments => "comments_count",
        }
    }
}

/// A counter value written by the reconciler or by a recount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterWrite {
    pub field: CounterField,
    pub id: i64,
    pub value: i64,
}

/// Soft finding: a cached counter disagreed with the recomputed count.
/// Logged and corrected, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DriftDetected {
    pub field: CounterField,
    pub id: i64,
    pub stored: i64,
    pub actual: i64,
}

impl fmt::Display for DriftDetected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} drifted: stored {}, actual {}",
            self.field.owner(self.id),
            self.field.column(),
            self.stored,
            self.actual
        )
    }
}
