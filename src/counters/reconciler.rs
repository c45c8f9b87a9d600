// Delta reconciler - keeps the denormalized counters correct across a
// whole unit of work, cascades included.
//
// Two stages. The delta plan works out, from the staged sets alone, which
// counters move and by how much. The authoritative values then come from
// fresh count queries against the flushed transaction; the plan is used
// to pick the targets and to cross-check the cached values.
use rusqlite::Connection;
use std::collections::BTreeMap;

use super::{CounterField, CounterWrite, DriftDetected};
use crate::config::CountersConfig;
use crate::db::models::EntityRef;
use crate::db::store;
use crate::error::{AppError, AppResult};
use crate::unit_of_work::{CommitHook, StagedChanges};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserDelta {
    pub posts: i64,
    pub comments: i64,
}

/// Net counter movement implied by one set of staged changes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeltaPlan {
    users: BTreeMap<i64, UserDelta>,
    posts: BTreeMap<i64, i64>,
}

impl DeltaPlan {
    pub fn compute(staged: &StagedChanges) -> Self {
        let mut plan = DeltaPlan::default();

        // Comments first: whether a comment was deleted on its own or
        // swept away with its post decides which counters move.
        let mut cascaded: BTreeMap<(i64, i64), i64> = BTreeMap::new();
        for comment in staged.deleted_comments() {
            if staged.is_deleted(EntityRef::post(comment.post_id)) {
                *cascaded
                    .entry((comment.post_id, comment.author_id))
                    .or_default() += 1;
            } else {
                plan.user(comment.author_id).comments -= 1;
                *plan.post(comment.post_id) -= 1;
            }
        }
        for ((post_id, author_id), removed) in cascaded {
            tracing::debug!(
                "Post {} cascade removes {} comment(s) by user {}",
                post_id,
                removed,
                author_id
            );
            plan.user(author_id).comments -= removed;
        }

        for post in staged.deleted_posts() {
            if !staged.is_deleted(EntityRef::user(post.author_id)) {
                plan.user(post.author_id).posts -= 1;
            }
        }

        for comment in staged.new_comments() {
            if !staged.is_deleted(EntityRef::post(comment.post_id)) {
                *plan.post(comment.post_id) += 1;
            }
            plan.user(comment.author_id).comments += 1;
        }

        for post in staged.new_posts() {
            plan.user(post.author_id).posts += 1;
        }

        // Counters die with their owners.
        plan.users
            .retain(|id, _| !staged.is_deleted(EntityRef::user(*id)));
        plan.posts
            .retain(|id, _| !staged.is_deleted(EntityRef::post(*id)));

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.posts.is_empty()
    }

    pub fn user_delta(&self, user_id: i64) -> Option<UserDelta> {
        self.users.get(&user_id).copied()
    }

    pub fn post_delta(&self, post_id: i64) -> Option<i64> {
        self.posts.get(&post_id).copied()
    }

    pub fn users(&self) -> impl Iterator<Item = (i64, UserDelta)> + '_ {
        self.users.iter().map(|(id, delta)| (*id, *delta))
    }

    pub fn posts(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.posts.iter().map(|(id, delta)| (*id, *delta))
    }

    fn user(&mut self, user_id: i64) -> &mut UserDelta {
        self.users.entry(user_id).or_default()
    }

    fn post(&mut self, post_id: i64) -> &mut i64 {
        self.posts.entry(post_id).or_default()
    }
}

/// What the reconciler wrote, plus any cached value it found off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub writes: Vec<CounterWrite>,
    pub drift: Vec<DriftDetected>,
}

impl ReconcileReport {
    pub fn value_of(&self, field: CounterField, id: i64) -> Option<i64> {
        self.writes
            .iter()
            .find(|w| w.field == field && w.id == id)
            .map(|w| w.value)
    }
}

/// The production commit hook.
#[derive(Debug, Clone)]
pub struct Reconciler {
    cross_check: bool,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self { cross_check: true }
    }
}

impl Reconciler {
    pub fn new(settings: &CountersConfig) -> Self {
        Self {
            cross_check: settings.cross_check,
        }
    }

    pub fn reconcile(
        &self,
        conn: &Connection,
        staged: &StagedChanges,
    ) -> AppResult<ReconcileReport> {
        let plan = DeltaPlan::compute(staged);
        let mut report = ReconcileReport::default();
        if plan.is_empty() {
            return Ok(report);
        }

        for (user_id, delta) in plan.users() {
            let cached = store::find_user(conn, user_id)?
                .ok_or_else(|| dangling(staged, EntityRef::user(user_id)))?;
            let posts = store::count_posts_by_author(conn, user_id)?;
            let comments = store::count_comments_by_author(conn, user_id)?;

            self.cross_check(
                &mut report,
                CounterField::UserPosts,
                user_id,
                cached.posts_count(),
                delta.posts,
                posts,
            );
            self.cross_check(
                &mut report,
                CounterField::UserComments,
                user_id,
                cached.comments_count(),
                delta.comments,
                comments,
            );

            store::write_user_counters(conn, user_id, posts, comments)?;
            report.writes.push(CounterWrite {
                field: CounterField::UserPosts,
                id: user_id,
                value: posts,
            });
            report.writes.push(CounterWrite {
                field: CounterField::UserComments,
                id: user_id,
                value: comments,
            });
        }

        for (post_id, delta) in plan.posts() {
            let cached = store::find_post(conn, post_id)?
                .ok_or_else(|| dangling(staged, EntityRef::post(post_id)))?;
            let comments = store::count_comments_on_post(conn, post_id)?;

            self.cross_check(
                &mut report,
                CounterField::PostComments,
                post_id,
                cached.comments_count(),
                delta,
                comments,
            );

            store::write_post_counter(conn, post_id, comments)?;
            report.writes.push(CounterWrite {
                field: CounterField::PostComments,
                id: post_id,
                value: comments,
            });
        }

        tracing::debug!("Reconciled {} counter(s)", report.writes.len());
        Ok(report)
    }

    fn cross_check(
        &self,
        report: &mut ReconcileReport,
        field: CounterField,
        id: i64,
        cached: i64,
        delta: i64,
        recounted: i64,
    ) {
        if !self.cross_check || cached + delta == recounted {
            return;
        }
        // The cached value was already off before this transaction: compare
        // it with the true count as of transaction start.
        let drift = DriftDetected {
            field,
            id,
            stored: cached,
            actual: recounted - delta,
        };
        tracing::warn!("Counter drift corrected on commit: {}", drift);
        report.drift.push(drift);
    }
}

impl CommitHook for Reconciler {
    type Outcome = ReconcileReport;

    fn before_commit(&self, conn: &Connection, staged: &StagedChanges) -> AppResult<ReconcileReport> {
        self.reconcile(conn, staged)
    }
}

fn dangling(staged: &StagedChanges, missing: EntityRef) -> AppError {
    let referenced_by = staged
        .referrer_of(missing)
        .map(|r| r.to_string())
        .unwrap_or_else(|| "staged change".to_string());
    AppError::dangling(missing.kind, missing.id, referenced_by)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Comment, Entity, Post, User};

    fn user(id: i64) -> Entity {
        Entity::User(User {
            id,
            username: format!("user{id}"),
            email: None,
            posts_count: 0,
            comments_count: 0,
            created_at: String::new(),
        })
    }

    fn post(id: i64, author_id: i64) -> Entity {
        Entity::Post(Post {
            id,
            author_id,
            title: String::new(),
            body: String::new(),
            comments_count: 0,
            created_at: String::new(),
        })
    }

    fn comment(id: i64, author_id: i64, post_id: i64) -> Entity {
        Entity::Comment(Comment {
            id,
            author_id,
            post_id,
            body: String::new(),
            created_at: String::new(),
        })
    }

    fn deleted(entities: Vec<Entity>) -> StagedChanges {
        let mut staged = StagedChanges::default();
        for entity in entities {
            staged.record_deleted(entity);
        }
        staged
    }

    #[test]
    fn direct_comment_delete_moves_author_and_post() {
        let plan = DeltaPlan::compute(&deleted(vec![comment(1, 2, 10)]));
        assert_eq!(
            plan.user_delta(2),
            Some(UserDelta {
                posts: 0,
                comments: -1
            })
        );
        assert_eq!(plan.post_delta(10), Some(-1));
    }

    #[test]
    fn post_cascade_batches_per_author() {
        // post 10 by user 1; user 2 wrote three of its comments, user 3 one
        let plan = DeltaPlan::compute(&deleted(vec![
            post(10, 1),
            comment(1, 2, 10),
            comment(2, 2, 10),
            comment(3, 3, 10),
            comment(4, 2, 10),
        ]));

        assert_eq!(plan.user_delta(2).map(|d| d.comments), Some(-3));
        assert_eq!(plan.user_delta(3).map(|d| d.comments), Some(-1));
        assert_eq!(plan.user_delta(1).map(|d| d.posts), Some(-1));
        // the deleted post's own counter is not adjusted
        assert_eq!(plan.post_delta(10), None);
    }

    #[test]
    fn user_cascade_skips_the_deleted_author() {
        // user 1 owns posts 10 and 20 with 3 and 5 comments by user 9
        let mut entities = vec![user(1), post(10, 1), post(20, 1)];
        entities.extend((0..3).map(|i| comment(100 + i, 9, 10)));
        entities.extend((0..5).map(|i| comment(200 + i, 9, 20)));
        let plan = DeltaPlan::compute(&deleted(entities));

        assert_eq!(plan.user_delta(1), None);
        assert_eq!(
            plan.user_delta(9),
            Some(UserDelta {
                posts: 0,
                comments: -8
            })
        );
        assert_eq!(plan.posts().count(), 0);
    }

    #[test]
    fn new_comments_accumulate() {
        let mut staged = StagedChanges::default();
        for id in 0..5 {
            staged.record_new(comment(id, 4, 10));
        }
        staged.record_new(post(11, 4));
        let plan = DeltaPlan::compute(&staged);

        assert_eq!(plan.post_delta(10), Some(5));
        assert_eq!(
            plan.user_delta(4),
            Some(UserDelta {
                posts: 1,
                comments: 5
            })
        );
    }

    #[test]
    fn created_then_deleted_nets_to_zero() {
        let mut staged = StagedChanges::default();
        staged.record_new(comment(1, 2, 10));
        staged.record_deleted(comment(1, 2, 10));
        let plan = DeltaPlan::compute(&staged);

        assert_eq!(plan.user_delta(2).map(|d| d.comments), Some(0));
        assert_eq!(plan.post_delta(10), Some(0));
    }

    #[test]
    fn empty_staging_gives_empty_plan() {
        assert!(DeltaPlan::compute(&StagedChanges::default()).is_empty());
    }

    #[test]
    fn report_looks_up_written_values() {
        let report = ReconcileReport {
            writes: vec![CounterWrite {
                field: CounterField::PostComments,
                id: 3,
                value: 4,
            }],
            drift: Vec::new(),
        };
        assert_eq!(report.value_of(CounterField::PostComments, 3), Some(4));
        assert_eq!(report.value_of(CounterField::UserPosts, 3), None);
    }
}
