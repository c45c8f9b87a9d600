use serde::{Deserialize, Serialize};
use std::fmt;

/// The three entity kinds the counter engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Post,
    Comment,
}

impl EntityKind {
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::Post => "posts",
            EntityKind::Comment => "comments",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::User => "user",
            EntityKind::Post => "post",
            EntityKind::Comment => "comment",
        };
        f.write_str(name)
    }
}

/// Kind + primary key. Identity of a staged entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn user(id: i64) -> Self {
        Self {
            kind: EntityKind::User,
            id,
        }
    }

    pub fn post(id: i64) -> Self {
        Self {
            kind: EntityKind::Post,
            id,
        }
    }

    pub fn comment(id: i64) -> Self {
        Self {
            kind: EntityKind::Comment,
            id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

// Counter fields are private: only the store loads them and only the
// reconciler and recount paths write them.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub(crate) posts_count: i64,
    pub(crate) comments_count: i64,
    pub created_at: String,
}

impl User {
    pub fn posts_count(&self) -> i64 {
        self.posts_count
    }

    pub fn comments_count(&self) -> i64 {
        self.comments_count
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::user(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub body: String,
    pub(crate) comments_count: i64,
    pub created_at: String,
}

impl Post {
    pub fn comments_count(&self) -> i64 {
        self.comments_count
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::post(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub author_id: i64,
    pub post_id: i64,
    pub body: String,
    pub created_at: String,
}

impl Comment {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::comment(self.id)
    }
}

/// Any loaded entity, as held in the staged sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    User(User),
    Post(Post),
    Comment(Comment),
}

impl Entity {
    pub fn entity_ref(&self) -> EntityRef {
        match self {
            Entity::User(u) => u.entity_ref(),
            Entity::Post(p) => p.entity_ref(),
            Entity::Comment(c) => c.entity_ref(),
        }
    }
}

// --- Inserts ---

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPost {
    pub author_id: i64,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewComment {
    pub author_id: i64,
    pub post_id: i64,
    pub body: String,
}
