//! Course catalog operations: list/read with role-based scoping, and the
//! instructor/admin CRUD surface.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tracing::warn;

use crate::auth::Identity;
use crate::db;
use crate::db::courses::{CourseFilter, Page, Sort, UpdateOutcome};
use crate::error::AppError;
use crate::models::{
    Course, PublicUser, Role, is_valid_id, validate_create_body, validate_update_body,
};
use crate::policy;

#[derive(Debug, Default)]
pub struct ListQuery {
    pub filter: CourseFilter,
    pub sort: Option<Sort>,
    pub page: Option<Page>,
    /// Wire field names to keep in each returned course; `id` always stays.
    pub fields: Option<HashSet<String>>,
    pub enrolled_only: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_prev: bool,
    pub has_next: bool,
}

/// Without pagination parameters the endpoint keeps its original shape, a
/// bare array; with them it wraps the page in metadata.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CourseList {
    Plain(Vec<Value>),
    Paged { items: Vec<Value>, pagination: Pagination },
}

pub struct CatalogService {
    db: SqlitePool,
}

impl CatalogService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn list(&self, identity: &Identity, query: ListQuery) -> Result<CourseList, AppError> {
        let scope = policy::authorization_scope(
            identity.role,
            identity.user_id.as_deref(),
            query.enrolled_only,
        );

        let courses =
            db::courses::list_courses(&self.db, &scope, &query.filter, query.sort, query.page)
                .await?;
        let items = project(courses, query.fields.as_ref())?;

        match query.page {
            None => Ok(CourseList::Plain(items)),
            Some(page) => {
                let total = db::courses::count_courses(&self.db, &scope, &query.filter).await?;
                let total_pages = if total == 0 { 0 } else { (total + page.limit - 1) / page.limit };
                Ok(CourseList::Paged {
                    items,
                    pagination: Pagination {
                        page: page.page,
                        limit: page.limit,
                        total,
                        total_pages,
                        has_prev: page.page > 1,
                        has_next: page.page < total_pages,
                    },
                })
            }
        }
    }

    /// Single course, enriched with the instructor's display fields when
    /// they resolve. Enrichment failure never fails the read.
    pub async fn get_by_id(&self, identity: &Identity, id: &str) -> Result<Value, AppError> {
        if !is_valid_id(id) {
            return Err(AppError::InvalidId);
        }

        let course = db::courses::find_course_by_id(&self.db, id)
            .await?
            .ok_or(AppError::NotFound)?;

        if identity.role == Some(Role::Instructor) {
            let owner = identity
                .user_id
                .as_deref()
                .is_some_and(|caller| {
                    policy::is_owner(Role::Instructor, caller, course.instructor_id.as_deref())
                });
            if !owner {
                return Err(AppError::Forbidden);
            }
        }

        let mut value = serde_json::to_value(&course)?;
        if let Some(instructor_id) = &course.instructor_id {
            match db::users::find_user_by_id(&self.db, instructor_id).await {
                Ok(Some(instructor)) => {
                    value["instructor"] = json!({
                        "id": instructor.id,
                        "firstname": instructor.firstname,
                        "surname": instructor.surname,
                        "email": instructor.email,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(course_id = id, "instructor enrichment failed: {}", e),
            }
        }
        Ok(value)
    }

    pub async fn create(&self, identity: &Identity, body: &Value) -> Result<Course, AppError> {
        let (caller_id, role) = identity.require_role(&[Role::Instructor, Role::Admin])?;
        let mut doc = validate_create_body(body).map_err(AppError::Validation)?;

        // An instructor always owns what they create; only an admin may name
        // someone else.
        if role == Role::Instructor {
            doc.instructor_id = Some(caller_id.to_string());
        }
        if let Some(named) = &doc.instructor_id {
            self.ensure_instructor(named).await?;
        }

        Ok(db::courses::insert_course(&self.db, doc).await?)
    }

    pub async fn update(
        &self,
        identity: &Identity,
        id: &str,
        body: &Value,
    ) -> Result<Course, AppError> {
        if !is_valid_id(id) {
            return Err(AppError::InvalidId);
        }
        let (caller_id, role) = identity.require_role(&[Role::Instructor, Role::Admin])?;
        let update = validate_update_body(body).map_err(AppError::Validation)?;

        let snapshot = db::courses::find_enrollment_snapshot(&self.db, id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !policy::is_owner(role, caller_id, snapshot.instructor_id.as_deref()) {
            return Err(AppError::Forbidden);
        }
        if let Some(capacity) = update.capacity {
            if capacity < snapshot.student_ids.len() as i64 {
                return Err(AppError::Validation(vec![
                    "capacity cannot be less than current enrollment".to_string(),
                ]));
            }
        }
        // Only an admin may reassign ownership.
        if update.instructor_id.is_some() && role != Role::Admin {
            return Err(AppError::Forbidden);
        }
        if let Some(Some(named)) = &update.instructor_id {
            self.ensure_instructor(named).await?;
        }

        match db::courses::update_course(&self.db, id, &update).await? {
            UpdateOutcome::Updated(course) => Ok(course),
            UpdateOutcome::NotFound => Err(AppError::NotFound),
            UpdateOutcome::CapacityBelowEnrollment => Err(AppError::Validation(vec![
                "capacity cannot be less than current enrollment".to_string(),
            ])),
        }
    }

    pub async fn delete(&self, identity: &Identity, id: &str) -> Result<(), AppError> {
        if !is_valid_id(id) {
            return Err(AppError::InvalidId);
        }
        let (caller_id, role) = identity.require_role(&[Role::Instructor, Role::Admin])?;

        let snapshot = db::courses::find_enrollment_snapshot(&self.db, id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !policy::is_owner(role, caller_id, snapshot.instructor_id.as_deref()) {
            return Err(AppError::Forbidden);
        }

        if db::courses::delete_course(&self.db, id).await? {
            Ok(())
        } else {
            Err(AppError::NotFound)
        }
    }

    /// Roster of a course, owner/admin only.
    pub async fn list_students(
        &self,
        identity: &Identity,
        id: &str,
    ) -> Result<Vec<PublicUser>, AppError> {
        if !is_valid_id(id) {
            return Err(AppError::InvalidId);
        }
        let (caller_id, role) = identity.require_role(&[Role::Instructor, Role::Admin])?;

        let snapshot = db::courses::find_enrollment_snapshot(&self.db, id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !policy::is_owner(role, caller_id, snapshot.instructor_id.as_deref()) {
            return Err(AppError::Forbidden);
        }

        Ok(db::users::find_users_by_ids(&self.db, &snapshot.student_ids).await?)
    }

    /// Instructor directory for the admin assignment UI.
    pub async fn list_instructors(&self, identity: &Identity) -> Result<Vec<PublicUser>, AppError> {
        identity.require_role(&[Role::Admin])?;
        Ok(db::users::find_users_by_role(&self.db, Role::Instructor).await?)
    }

    /// A named owner must resolve to an existing user holding the instructor
    /// role; otherwise the write would fail at the foreign key.
    async fn ensure_instructor(&self, instructor_id: &str) -> Result<(), AppError> {
        let named = db::users::find_user_by_id(&self.db, instructor_id).await?;
        if named.is_none_or(|user| user.role != Role::Instructor) {
            return Err(AppError::Validation(vec![
                "instructorId must reference an instructor".to_string(),
            ]));
        }
        Ok(())
    }
}

fn project(
    courses: Vec<Course>,
    fields: Option<&HashSet<String>>,
) -> Result<Vec<Value>, AppError> {
    let mut items = Vec::with_capacity(courses.len());
    for course in courses {
        let mut value = serde_json::to_value(&course)?;
        if let (Some(fields), Value::Object(map)) = (fields, &mut value) {
            map.retain(|key, _| fields.contains(key));
        }
        items.push(value);
    }
    Ok(items)
}
