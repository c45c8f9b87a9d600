// Unit of work - one logical operation, one SQLite transaction.
//
// Inserts are written as soon as they are staged so later count queries
// and cascade lookups inside the same transaction see them. Deletions are
// expanded to their cascade closure at staging time and flushed at commit,
// right before the single pre-commit hook runs.
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::BTreeMap;

use crate::db::models::{
    Comment, Entity, EntityKind, EntityRef, NewComment, NewPost, NewUser, Post, User,
};
use crate::db::store;
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

/// Everything staged in one transaction.
#[derive(Debug, Default, Clone)]
pub struct StagedChanges {
    new: Vec<Entity>,
    deleted: BTreeMap<EntityRef, Entity>,
}

impl StagedChanges {
    /// Record a newly inserted entity.
    pub(crate) fn record_new(&mut self, entity: Entity) {
        self.new.push(entity);
    }

    /// Record a deletion. Returns false if the entity was already staged.
    pub(crate) fn record_deleted(&mut self, entity: Entity) -> bool {
        let key = entity.entity_ref();
        if self.deleted.contains_key(&key) {
            return false;
        }
        self.deleted.insert(key, entity);
        true
    }

    pub fn is_deleted(&self, entity: EntityRef) -> bool {
        self.deleted.contains_key(&entity)
    }

    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.deleted.is_empty()
    }

    pub fn new_len(&self) -> usize {
        self.new.len()
    }

    pub fn deleted_len(&self) -> usize {
        self.deleted.len()
    }

    pub fn new_entities(&self) -> impl Iterator<Item = &Entity> {
        self.new.iter()
    }

    /// Deleted entities ordered users, posts, comments.
    pub fn deleted_entities(&self) -> impl DoubleEndedIterator<Item = &Entity> {
        self.deleted.values()
    }

    pub fn new_posts(&self) -> impl Iterator<Item = &Post> {
        self.new.iter().filter_map(|e| match e {
            Entity::Post(p) => Some(p),
            _ => None,
        })
    }

    pub fn new_comments(&self) -> impl Iterator<Item = &Comment> {
        self.new.iter().filter_map(|e| match e {
            Entity::Comment(c) => Some(c),
            _ => None,
        })
    }

    pub fn deleted_posts(&self) -> impl Iterator<Item = &Post> {
        self.deleted.values().filter_map(|e| match e {
            Entity::Post(p) => Some(p),
            _ => None,
        })
    }

    pub fn deleted_comments(&self) -> impl Iterator<Item = &Comment> {
        self.deleted.values().filter_map(|e| match e {
            Entity::Comment(c) => Some(c),
            _ => None,
        })
    }

    /// First staged entity that references `parent` as author or post.
    pub fn referrer_of(&self, parent: EntityRef) -> Option<EntityRef> {
        self.new
            .iter()
            .chain(self.deleted.values())
            .find(|entity| references(entity, parent))
            .map(Entity::entity_ref)
    }
}

fn references(entity: &Entity, parent: EntityRef) -> bool {
    match (entity, parent.kind) {
        (Entity::Post(p), EntityKind::User) => p.author_id == parent.id,
        (Entity::Comment(c), EntityKind::User) => c.author_id == parent.id,
        (Entity::Comment(c), EntityKind::Post) => c.post_id == parent.id,
        _ => false,
    }
}

/// Pre-commit extension point. Invoked exactly once per committed unit of
/// work, after the staged rows are flushed and before `COMMIT`. An error
/// aborts and rolls back the whole transaction.
pub trait CommitHook {
    type Outcome;

    fn before_commit(
        &self,
        conn: &Connection,
        staged: &StagedChanges,
    ) -> AppResult<Self::Outcome>;
}

/// Result of a successful commit.
#[derive(Debug, Clone)]
pub struct Committed<O> {
    pub inserted: usize,
    pub deleted: usize,
    pub outcome: O,
}

pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
    staged: StagedChanges,
}

impl<'conn> UnitOfWork<'conn> {
    /// Open an immediate transaction: the write lock is taken up front so
    /// concurrent units of work serialise their count-then-write steps.
    pub fn begin(conn: &'conn mut Connection) -> AppResult<Self> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Self {
            tx,
            staged: StagedChanges::default(),
        })
    }

    /// Read access to the store as seen from inside this transaction.
    pub fn connection(&self) -> &Connection {
        &self.tx
    }

    pub fn staged(&self) -> &StagedChanges {
        &self.staged
    }

    /// Insert a user. The returned row keeps its insert-time counters;
    /// reload through `store::get_user` after commit to read the values
    /// the reconciler wrote (or look them up in `Committed::outcome`).
    pub fn stage_new_user(&mut self, new: NewUser) -> AppResult<User> {
        let user = store::insert_user(&self.tx, &new)?;
        tracing::debug!("Staged new user {}", user.id);
        self.staged.record_new(Entity::User(user.clone()));
        Ok(user)
    }

    /// Insert a post. Counters on the returned row are not refreshed at
    /// commit; reload through `store::get_post`.
    pub fn stage_new_post(&mut self, new: NewPost) -> AppResult<Post> {
        self.ensure_live(EntityRef::user(new.author_id), "new post")?;
        let post = store::insert_post(&self.tx, &new)?;
        tracing::debug!("Staged new post {} by user {}", post.id, post.author_id);
        self.staged.record_new(Entity::Post(post.clone()));
        Ok(post)
    }

    /// Insert a comment. The author's and post's counters are written at
    /// commit, not on any row already held by the caller.
    pub fn stage_new_comment(&mut self, new: NewComment) -> AppResult<Comment> {
        self.ensure_live(EntityRef::user(new.author_id), "new comment")?;
        self.ensure_live(EntityRef::post(new.post_id), "new comment")?;
        let comment = store::insert_comment(&self.tx, &new)?;
        tracing::debug!(
            "Staged new comment {} on post {} by user {}",
            comment.id,
            comment.post_id,
            comment.author_id
        );
        self.staged.record_new(Entity::Comment(comment.clone()));
        Ok(comment)
    }

    /// Stage `target` and everything its cascade rules reach for deletion.
    /// Returns how many entities were newly staged; re-staging is a no-op.
    pub fn stage_deleted(&mut self, target: EntityRef) -> AppResult<usize> {
        if self.staged.is_deleted(target) {
            return Ok(0);
        }
        let root = store::find_entity(&self.tx, target)?.ok_or(AppError::NotFound(target))?;

        let mut newly_staged = 0;
        let mut pending = vec![root];
        while let Some(entity) = pending.pop() {
            let entity_ref = entity.entity_ref();
            if !self.staged.record_deleted(entity) {
                continue;
            }
            newly_staged += 1;

            for child in store::cascade_children(&self.tx, entity_ref)? {
                if self.staged.is_deleted(child) {
                    continue;
                }
                let loaded = store::find_entity(&self.tx, child)?.ok_or_else(|| {
                    AppError::dangling(child.kind, child.id, entity_ref.to_string())
                })?;
                pending.push(loaded);
            }
        }

        tracing::debug!(
            "Staged deletion of {} ({} entities including cascade)",
            target,
            newly_staged
        );
        Ok(newly_staged)
    }

    /// Flush deletions, run the hook once, then commit.
    pub fn commit<H: CommitHook>(self, hook: &H) -> AppResult<Committed<H::Outcome>> {
        let UnitOfWork { tx, staged } = self;

        // Children first so the schema's own ON DELETE CASCADE never
        // removes a row the staged sets don't know about.
        for entity in staged.deleted_entities().rev() {
            let entity_ref = entity.entity_ref();
            if !store::delete_row(&tx, entity_ref)? {
                return Err(AppError::Internal(format!(
                    "{} vanished before flush",
                    entity_ref
                )));
            }
        }

        let outcome = hook.before_commit(&tx, &staged)?;
        tx.commit()?;

        tracing::info!(
            "Committed unit of work: {} inserted, {} deleted",
            staged.new_len(),
            staged.deleted_len()
        );
        Ok(Committed {
            inserted: staged.new_len(),
            deleted: staged.deleted_len(),
            outcome,
        })
    }

    pub fn rollback(self) -> AppResult<()> {
        self.tx.rollback()?;
        Ok(())
    }

    fn ensure_live(&self, parent: EntityRef, referenced_by: &str) -> AppResult<()> {
        if self.staged.is_deleted(parent) || !store::exists(&self.tx, parent)? {
            return Err(AppError::dangling(parent.kind, parent.id, referenced_by));
        }
        Ok(())
    }
}

/// Run `work` inside a fresh unit of work on a pooled connection and
/// commit it with `hook`. Any error rolls the transaction back.
pub fn run<H, T, F>(pool: &DbPool, hook: &H, work: F) -> AppResult<(T, Committed<H::Outcome>)>
where
    H: CommitHook,
    F: FnOnce(&mut UnitOfWork<'_>) -> AppResult<T>,
{
    let mut conn = pool.get()?;
    let mut uow = UnitOfWork::begin(&mut conn)?;
    let value = work(&mut uow)?;
    let committed = uow.commit(hook)?;
    Ok((value, committed))
}
