// Entity store: row access, count queries and cascade rules.
// Everything takes a `&Connection` so it runs equally inside an open
// transaction (a `Transaction` derefs to `Connection`).
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{
    Comment, Entity, EntityKind, EntityRef, NewComment, NewPost, NewUser, Post, User,
};
use crate::error::{AppError, AppResult};

const USER_COLUMNS: &str = "id, username, email, posts_count, comments_count, created_at";
const POST_COLUMNS: &str = "id, author_id, title, body, comments_count, created_at";
const COMMENT_COLUMNS: &str = "id, author_id, post_id, body, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        posts_count: row.get(3)?,
        comments_count: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        author_id: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        comments_count: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        author_id: row.get(1)?,
        post_id: row.get(2)?,
        body: row.get(3)?,
        created_at: row.get(4)?,
    })
}

// --- Loaders ---

pub fn find_user(conn: &Connection, id: i64) -> AppResult<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn find_post(conn: &Connection, id: i64) -> AppResult<Option<Post>> {
    let post = conn
        .query_row(
            &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
            params![id],
            post_from_row,
        )
        .optional()?;
    Ok(post)
}

pub fn find_comment(conn: &Connection, id: i64) -> AppResult<Option<Comment>> {
    let comment = conn
        .query_row(
            &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1"),
            params![id],
            comment_from_row,
        )
        .optional()?;
    Ok(comment)
}

pub fn get_user(conn: &Connection, id: i64) -> AppResult<User> {
    find_user(conn, id)?.ok_or(AppError::NotFound(EntityRef::user(id)))
}

pub fn get_post(conn: &Connection, id: i64) -> AppResult<Post> {
    find_post(conn, id)?.ok_or(AppError::NotFound(EntityRef::post(id)))
}

pub fn get_comment(conn: &Connection, id: i64) -> AppResult<Comment> {
    find_comment(conn, id)?.ok_or(AppError::NotFound(EntityRef::comment(id)))
}

/// Load any entity by reference.
pub fn find_entity(conn: &Connection, entity: EntityRef) -> AppResult<Option<Entity>> {
    let found = match entity.kind {
        EntityKind::User => find_user(conn, entity.id)?.map(Entity::User),
        EntityKind::Post => find_post(conn, entity.id)?.map(Entity::Post),
        EntityKind::Comment => find_comment(conn, entity.id)?.map(Entity::Comment),
    };
    Ok(found)
}

pub fn exists(conn: &Connection, entity: EntityRef) -> AppResult<bool> {
    let found: bool = conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)",
            entity.kind.table()
        ),
        params![entity.id],
        |row| row.get(0),
    )?;
    Ok(found)
}

pub fn list_users(conn: &Connection) -> AppResult<Vec<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
    let users = stmt
        .query_map([], user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

pub fn list_posts(conn: &Connection) -> AppResult<Vec<Post>> {
    let mut stmt = conn.prepare(&format!("SELECT {POST_COLUMNS} FROM posts ORDER BY id"))?;
    let posts = stmt
        .query_map([], post_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(posts)
}

pub fn list_comments_for_post(conn: &Connection, post_id: i64) -> AppResult<Vec<Comment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COMMENT_COLUMNS} FROM comments WHERE post_id = ?1 ORDER BY id"
    ))?;
    let comments = stmt
        .query_map(params![post_id], comment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}

// --- Count queries ---

pub fn count_posts_by_author(conn: &Connection, user_id: i64) -> AppResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM posts WHERE author_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn count_comments_by_author(conn: &Connection, user_id: i64) -> AppResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE author_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn count_comments_on_post(conn: &Connection, post_id: i64) -> AppResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE post_id = ?1",
        params![post_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Totals {
    pub users: i64,
    pub posts: i64,
    pub comments: i64,
}

pub fn totals(conn: &Connection) -> AppResult<Totals> {
    let totals = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM posts),
                (SELECT COUNT(*) FROM comments)",
        [],
        |row| {
            Ok(Totals {
                users: row.get(0)?,
                posts: row.get(1)?,
                comments: row.get(2)?,
            })
        },
    )?;
    Ok(totals)
}

// --- Cascade rules ---

/// Direct children whose deletion follows from deleting `parent`.
/// User -> posts and comments, Post -> comments, Comment -> nothing.
/// Callers apply this repeatedly to reach the transitive closure.
pub fn cascade_children(conn: &Connection, parent: EntityRef) -> AppResult<Vec<EntityRef>> {
    let children = match parent.kind {
        EntityKind::User => {
            let mut children = ids_where(conn, "posts", "author_id", parent.id)?
                .into_iter()
                .map(EntityRef::post)
                .collect::<Vec<_>>();
            children.extend(
                ids_where(conn, "comments", "author_id", parent.id)?
                    .into_iter()
                    .map(EntityRef::comment),
            );
            children
        }
        EntityKind::Post => ids_where(conn, "comments", "post_id", parent.id)?
            .into_iter()
            .map(EntityRef::comment)
            .collect(),
        EntityKind::Comment => Vec::new(),
    };
    Ok(children)
}

fn ids_where(conn: &Connection, table: &str, column: &str, id: i64) -> AppResult<Vec<i64>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id FROM {table} WHERE {column} = ?1 ORDER BY id"
    ))?;
    let ids = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

// --- Writes (crate-private: only the unit of work and counter code write) ---

pub(crate) fn insert_user(conn: &Connection, new: &NewUser) -> AppResult<User> {
    conn.execute(
        "INSERT INTO users (username, email) VALUES (?1, ?2)",
        params![new.username, new.email],
    )?;
    get_user(conn, conn.last_insert_rowid())
}

pub(crate) fn insert_post(conn: &Connection, new: &NewPost) -> AppResult<Post> {
    conn.execute(
        "INSERT INTO posts (author_id, title, body) VALUES (?1, ?2, ?3)",
        params![new.author_id, new.title, new.body],
    )?;
    get_post(conn, conn.last_insert_rowid())
}

pub(crate) fn insert_comment(conn: &Connection, new: &NewComment) -> AppResult<Comment> {
    conn.execute(
        "INSERT INTO comments (author_id, post_id, body) VALUES (?1, ?2, ?3)",
        params![new.author_id, new.post_id, new.body],
    )?;
    get_comment(conn, conn.last_insert_rowid())
}

/// Delete a single row. Returns whether a row was removed.
pub(crate) fn delete_row(conn: &Connection, entity: EntityRef) -> AppResult<bool> {
    let rows = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", entity.kind.table()),
        params![entity.id],
    )?;
    Ok(rows > 0)
}

pub(crate) fn write_user_counters(
    conn: &Connection,
    user_id: i64,
    posts_count: i64,
    comments_count: i64,
) -> AppResult<()> {
    let rows = conn.execute(
        "UPDATE users SET posts_count = ?2, comments_count = ?3 WHERE id = ?1",
        params![user_id, posts_count, comments_count],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound(EntityRef::user(user_id)));
    }
    Ok(())
}

pub(crate) fn write_post_counter(
    conn: &Connection,
    post_id: i64,
    comments_count: i64,
) -> AppResult<()> {
    let rows = conn.execute(
        "UPDATE posts SET comments_count = ?2 WHERE id = ?1",
        params![post_id, comments_count],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound(EntityRef::post(post_id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;

    fn seed(conn: &Connection) -> (User, Post) {
        let user = insert_user(
            conn,
            &NewUser {
                username: "alice".into(),
                email: None,
            },
        )
        .unwrap();
        let post = insert_post(
            conn,
            &NewPost {
                author_id: user.id,
                title: "hello".into(),
                body: "world".into(),
            },
        )
        .unwrap();
        (user, post)
    }

    fn comment_on(conn: &Connection, post: &Post, author_id: i64) -> Comment {
        insert_comment(
            conn,
            &NewComment {
                author_id,
                post_id: post.id,
                body: "nice".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn inserted_rows_start_with_zero_counters() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let (user, post) = seed(&conn);
        assert_eq!(user.posts_count(), 0);
        assert_eq!(user.comments_count(), 0);
        assert_eq!(post.comments_count(), 0);
    }

    #[test]
    fn count_queries_reflect_rows() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let (user, post) = seed(&conn);
        comment_on(&conn, &post, user.id);
        comment_on(&conn, &post, user.id);

        assert_eq!(count_posts_by_author(&conn, user.id).unwrap(), 1);
        assert_eq!(count_comments_by_author(&conn, user.id).unwrap(), 2);
        assert_eq!(count_comments_on_post(&conn, post.id).unwrap(), 2);
        assert_eq!(
            totals(&conn).unwrap(),
            Totals {
                users: 1,
                posts: 1,
                comments: 2
            }
        );
    }

    #[test]
    fn user_cascade_lists_posts_then_comments() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let (user, post) = seed(&conn);
        let c = comment_on(&conn, &post, user.id);

        let children = cascade_children(&conn, user.entity_ref()).unwrap();
        assert_eq!(children, vec![post.entity_ref(), c.entity_ref()]);
    }

    #[test]
    fn post_cascade_lists_comments() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let (user, post) = seed(&conn);
        let a = comment_on(&conn, &post, user.id);
        let b = comment_on(&conn, &post, user.id);

        let children = cascade_children(&conn, post.entity_ref()).unwrap();
        assert_eq!(children, vec![a.entity_ref(), b.entity_ref()]);
        assert!(cascade_children(&conn, a.entity_ref()).unwrap().is_empty());
    }

    #[test]
    fn get_missing_entity_is_not_found() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        assert!(matches!(
            get_post(&conn, 42),
            Err(AppError::NotFound(r)) if r == EntityRef::post(42)
        ));
        assert!(find_entity(&conn, EntityRef::user(1)).unwrap().is_none());
    }

    #[test]
    fn writing_counters_for_missing_rows_fails() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        assert!(write_user_counters(&conn, 5, 0, 0).is_err());
        assert!(write_post_counter(&conn, 5, 0).is_err());
    }

    #[test]
    fn delete_row_reports_whether_anything_was_removed() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let (_, post) = seed(&conn);
        assert!(delete_row(&conn, post.entity_ref()).unwrap());
        assert!(!delete_row(&conn, post.entity_ref()).unwrap());
    }
}
