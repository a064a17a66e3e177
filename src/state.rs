use sqlx::SqlitePool;

use crate::policy::PolicyConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub policy: PolicyConfig,
}
