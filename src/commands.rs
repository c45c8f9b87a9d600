// Administrative commands. Each returns the text to print so the binary
// stays a thin dispatcher.
use std::fmt::Write as _;

use crate::config::Command;
use crate::counters::recount::{self, RecountOutcome};
use crate::db::store;
use crate::state::AppState;

pub fn dispatch(state: &AppState, command: &Command) -> anyhow::Result<String> {
    match command {
        Command::Migrate => Ok(format!(
            "Database ready at {}",
            state.config.db_path().display()
        )),
        Command::Recount { all, users, posts } => recount(state, *all, users, posts),
        Command::Check => check(state),
        Command::Stats => stats(state),
    }
}

fn recount(state: &AppState, all: bool, users: &[i64], posts: &[i64]) -> anyhow::Result<String> {
    let mut conn = state.db.get()?;

    let outcome = if all || (users.is_empty() && posts.is_empty()) {
        recount::recount_all(&mut conn)?
    } else {
        let mut outcome = RecountOutcome::default();
        if !users.is_empty() {
            let done = recount::recount_users(&mut conn, users)?;
            outcome.checked += done.checked;
            outcome.drift.extend(done.drift);
        }
        if !posts.is_empty() {
            let done = recount::recount_posts(&mut conn, posts)?;
            outcome.checked += done.checked;
            outcome.drift.extend(done.drift);
        }
        outcome
    };

    Ok(render("Corrected", &outcome))
}

fn check(state: &AppState) -> anyhow::Result<String> {
    let conn = state.db.get()?;
    let outcome = recount::check_all(&conn)?;
    if !outcome.is_clean() {
        anyhow::bail!("{}", render("Found", &outcome).trim_end());
    }
    Ok(render("Found", &outcome))
}

fn stats(state: &AppState) -> anyhow::Result<String> {
    let conn = state.db.get()?;
    let totals = store::totals(&conn)?;
    Ok(format!(
        "users: {}\nposts: {}\ncomments: {}\n",
        totals.users, totals.posts, totals.comments
    ))
}

fn render(verb: &str, outcome: &RecountOutcome) -> String {
    let mut out = format!(
        "Checked {} entities. {} {} drifted counter(s).\n",
        outcome.checked,
        verb,
        outcome.drift.len()
    );
    for drift in &outcome.drift {
        let _ = writeln!(out, "  {}", drift);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DatabaseConfig};
    use crate::db;

    fn test_state() -> (tempfile::TempDir, AppState) {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database = DatabaseConfig {
            path: Some(tmp.path().join("quill.db")),
            ..DatabaseConfig::default()
        };
        let pool = db::create_pool(&config.db_path(), &config.database).unwrap();
        db::run_migrations(&pool).unwrap();
        (tmp, AppState { db: pool, config })
    }

    fn seed_with_drift(state: &AppState) {
        let conn = state.db.get().unwrap();
        conn.execute_batch(
            "INSERT INTO users (id, username) VALUES (1, 'alice');
             INSERT INTO posts (id, author_id, title, body) VALUES (5, 1, 't', 'b');",
        )
        .unwrap();
    }

    #[test]
    fn stats_prints_totals() {
        let (_tmp, state) = test_state();
        seed_with_drift(&state);
        let out = dispatch(&state, &Command::Stats).unwrap();
        assert_eq!(out, "users: 1\nposts: 1\ncomments: 0\n");
    }

    #[test]
    fn check_fails_on_drift_and_passes_after_recount() {
        let (_tmp, state) = test_state();
        seed_with_drift(&state);

        let err = dispatch(&state, &Command::Check).unwrap_err();
        assert!(err.to_string().contains("user 1.posts_count"));

        let out = dispatch(
            &state,
            &Command::Recount {
                all: true,
                users: Vec::new(),
                posts: Vec::new(),
            },
        )
        .unwrap();
        assert!(out.contains("Corrected 1 drifted counter(s)"));

        let out = dispatch(&state, &Command::Check).unwrap();
        assert!(out.contains("Found 0 drifted counter(s)"));
    }

    #[test]
    fn recount_selection_touches_only_named_entities() {
        let (_tmp, state) = test_state();
        seed_with_drift(&state);

        let out = dispatch(
            &state,
            &Command::Recount {
                all: false,
                users: Vec::new(),
                posts: vec![5],
            },
        )
        .unwrap();
        assert!(out.starts_with("Checked 1 entities. Corrected 0"));

        // alice still drifted
        assert!(dispatch(&state, &Command::Check).is_err());
    }
}
