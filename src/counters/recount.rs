// Drift repair: recompute cached counters straight from the rows.
// Used after manual edits that bypassed the unit of work, or to verify
// the reconciler.
use rusqlite::{Connection, TransactionBehavior};

use super::{CounterField, DriftDetected};
use crate::db::models::{Post, User};
use crate::db::store;
use crate::error::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Repair,
    Check,
}

/// Result of a recount or check pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecountOutcome {
    /// Entities inspected.
    pub checked: usize,
    pub drift: Vec<DriftDetected>,
}

impl RecountOutcome {
    pub fn is_clean(&self) -> bool {
        self.drift.is_empty()
    }

    fn merge(&mut self, other: RecountOutcome) {
        self.checked += other.checked;
        self.drift.extend(other.drift);
    }
}

/// Recount one user's counters and overwrite the cached values.
/// Count and write share one immediate transaction so a concurrent commit
/// cannot land between them.
pub fn recount_user(conn: &mut Connection, user_id: i64) -> AppResult<RecountOutcome> {
    recount_users(conn, &[user_id])
}

/// Recount one post's comment counter and overwrite the cached value.
pub fn recount_post(conn: &mut Connection, post_id: i64) -> AppResult<RecountOutcome> {
    recount_posts(conn, &[post_id])
}

/// Recount a selection of users in one transaction.
pub fn recount_users(conn: &mut Connection, user_ids: &[i64]) -> AppResult<RecountOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut outcome = RecountOutcome::default();
    for &id in user_ids {
        let user = store::get_user(&tx, id)?;
        outcome.merge(inspect_user(&tx, &user, Mode::Repair)?);
    }
    tx.commit()?;
    Ok(outcome)
}

/// Recount a selection of posts in one transaction.
pub fn recount_posts(conn: &mut Connection, post_ids: &[i64]) -> AppResult<RecountOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut outcome = RecountOutcome::default();
    for &id in post_ids {
        let post = store::get_post(&tx, id)?;
        outcome.merge(inspect_post(&tx, &post, Mode::Repair)?);
    }
    tx.commit()?;
    Ok(outcome)
}

/// Recount every user and post in one transaction.
pub fn recount_all(conn: &mut Connection) -> AppResult<RecountOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let outcome = sweep(&tx, Mode::Repair)?;
    tx.commit()?;
    tracing::info!(
        "Recounted {} entities, corrected {} drifted counter(s)",
        outcome.checked,
        outcome.drift.len()
    );
    Ok(outcome)
}

/// Report drift across every user and post without writing anything.
pub fn check_all(conn: &Connection) -> AppResult<RecountOutcome> {
    sweep(conn, Mode::Check)
}

fn sweep(conn: &Connection, mode: Mode) -> AppResult<RecountOutcome> {
    let mut outcome = RecountOutcome::default();
    for user in store::list_users(conn)? {
        outcome.merge(inspect_user(conn, &user, mode)?);
    }
    for post in store::list_posts(conn)? {
        outcome.merge(inspect_post(conn, &post, mode)?);
    }
    Ok(outcome)
}

fn inspect_user(conn: &Connection, user: &User, mode: Mode) -> AppResult<RecountOutcome> {
    let posts = store::count_posts_by_author(conn, user.id)?;
    let comments = store::count_comments_by_author(conn, user.id)?;

    let mut outcome = RecountOutcome {
        checked: 1,
        drift: Vec::new(),
    };
    note_drift(&mut outcome, CounterField::UserPosts, user.id, user.posts_count(), posts);
    note_drift(
        &mut outcome,
        CounterField::UserComments,
        user.id,
        user.comments_count(),
        comments,
    );

    if mode == Mode::Repair && !outcome.is_clean() {
        store::write_user_counters(conn, user.id, posts, comments)?;
    }
    Ok(outcome)
}

fn inspect_post(conn: &Connection, post: &Post, mode: Mode) -> AppResult<RecountOutcome> {
    let comments = store::count_comments_on_post(conn, post.id)?;

    let mut outcome = RecountOutcome {
        checked: 1,
        drift: Vec::new(),
    };
    note_drift(
        &mut outcome,
        CounterField::PostComments,
        post.id,
        post.comments_count(),
        comments,
    );

    if mode == Mode::Repair && !outcome.is_clean() {
        store::write_post_counter(conn, post.id, comments)?;
    }
    Ok(outcome)
}

fn note_drift(
    outcome: &mut RecountOutcome,
    field: CounterField,
    id: i64,
    stored: i64,
    actual: i64,
) {
    if stored == actual {
        return;
    }
    let drift = DriftDetected {
        field,
        id,
        stored,
        actual,
    };
    tracing::warn!("Counter drift detected: {}", drift);
    outcome.drift.push(drift);
}
