use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool};
use uuid::Uuid;

use crate::models::{NewUser, PublicUser, Role, User};

pub async fn find_user_by_id(db: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "SELECT id, firstname, surname, email, password_hash, role, department, created_at \
         FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db)
    .await
}

/// Public records for a set of user ids, e.g. a course roster. Ids with no
/// matching row are silently absent from the result.
pub async fn find_users_by_ids(
    db: &SqlitePool,
    ids: &[String],
) -> Result<Vec<PublicUser>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::new(
        "SELECT id, firstname, surname, email, department FROM users WHERE id IN (",
    );
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.clone());
    }
    qb.push(")");
    qb.build_query_as::<PublicUser>().fetch_all(db).await
}

pub async fn find_users_by_role(
    db: &SqlitePool,
    role: Role,
) -> Result<Vec<PublicUser>, sqlx::Error> {
    sqlx::query_as::<_, PublicUser>(
        "SELECT id, firstname, surname, email, department FROM users \
         WHERE role = ? ORDER BY surname, firstname",
    )
    .bind(role)
    .fetch_all(db)
    .await
}

pub async fn insert_user(db: &SqlitePool, req: NewUser) -> Result<User, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO users (id, firstname, surname, email, password_hash, role, department, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&req.firstname)
    .bind(&req.surname)
    .bind(&req.email)
    .bind(&req.password_hash)
    .bind(req.role)
    .bind(&req.department)
    .bind(&now)
    .execute(db)
    .await?;

    Ok(User {
        id,
        firstname: req.firstname,
        surname: req.surname,
        email: req.email,
        password_hash: req.password_hash,
        role: req.role,
        department: req.department,
        created_at: now,
    })
}
