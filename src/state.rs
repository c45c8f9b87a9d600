use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::counters::Reconciler;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
}

impl AppState {
    /// Commit hook configured from `[counters]`.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(&self.config.counters)
    }
}
