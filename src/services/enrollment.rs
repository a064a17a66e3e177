//! Enrollment orchestration: policy checks sequenced against the repository.
//!
//! Many enroll/drop requests for the same course run concurrently and no
//! in-memory reservation is held across awaits. Every read here is advisory;
//! the atomic conditional insert/delete at the data layer is the only
//! authoritative gate, and a lost race is resolved by re-reading membership.

use sqlx::SqlitePool;
use tracing::info;

use crate::auth::Identity;
use crate::db;
use crate::error::AppError;
use crate::models::{Course, Role, User, is_valid_id};
use crate::policy::{self, DropDecision, EnrollDecision, PolicyConfig};

pub struct EnrollmentService {
    db: SqlitePool,
    policy: PolicyConfig,
}

impl EnrollmentService {
    pub fn new(db: SqlitePool, policy: PolicyConfig) -> Self {
        Self { db, policy }
    }

    /// Student self-enrollment.
    pub async fn enroll(&self, identity: &Identity, course_id: &str) -> Result<Course, AppError> {
        if !is_valid_id(course_id) {
            return Err(AppError::InvalidId);
        }
        let (caller_id, _) = identity.require_role(&[Role::Student])?;
        let course = self.enroll_student(caller_id, course_id).await?;
        info!(course_id, student_id = caller_id, "student enrolled");
        Ok(course)
    }

    /// Student self-drop.
    pub async fn drop_course(
        &self,
        identity: &Identity,
        course_id: &str,
    ) -> Result<Course, AppError> {
        if !is_valid_id(course_id) {
            return Err(AppError::InvalidId);
        }
        let (caller_id, _) = identity.require_role(&[Role::Student])?;
        let course = self.drop_student(caller_id, course_id).await?;
        info!(course_id, student_id = caller_id, "student dropped");
        Ok(course)
    }

    /// Instructor/admin adds a student to a course they own.
    pub async fn assign_student(
        &self,
        identity: &Identity,
        course_id: &str,
        student_id: &str,
    ) -> Result<Course, AppError> {
        if !is_valid_id(course_id) || !is_valid_id(student_id) {
            return Err(AppError::InvalidId);
        }
        let (caller_id, role) = identity.require_role(&[Role::Instructor, Role::Admin])?;

        // The target must exist and actually be a student.
        let target = db::users::find_user_by_id(&self.db, student_id)
            .await?
            .filter(|u| u.role == Role::Student)
            .ok_or(AppError::NotFound)?;

        let snapshot = db::courses::find_enrollment_snapshot(&self.db, course_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !policy::is_owner(role, caller_id, snapshot.instructor_id.as_deref()) {
            return Err(AppError::Forbidden);
        }

        let course = self.enroll_student(&target.id, course_id).await?;
        info!(course_id, student_id, caller_id, "student assigned");
        Ok(course)
    }

    /// Instructor/admin removes a student from a course they own.
    pub async fn remove_student(
        &self,
        identity: &Identity,
        course_id: &str,
        student_id: &str,
    ) -> Result<Course, AppError> {
        if !is_valid_id(course_id) || !is_valid_id(student_id) {
            return Err(AppError::InvalidId);
        }
        let (caller_id, role) = identity.require_role(&[Role::Instructor, Role::Admin])?;

        let snapshot = db::courses::find_enrollment_snapshot(&self.db, course_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !policy::is_owner(role, caller_id, snapshot.instructor_id.as_deref()) {
            return Err(AppError::Forbidden);
        }

        let course = self.drop_student(student_id, course_id).await?;
        info!(course_id, student_id, caller_id, "student removed");
        Ok(course)
    }

    async fn enroll_student(&self, student_id: &str, course_id: &str) -> Result<Course, AppError> {
        let snapshot = db::courses::find_enrollment_snapshot(&self.db, course_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let student: Option<User> = db::users::find_user_by_id(&self.db, student_id)
            .await?
            .filter(|u| u.role == Role::Student);
        let departments = match &student {
            Some(s) => db::courses::enrolled_departments(&self.db, &s.id).await?,
            None => Vec::new(),
        };

        match policy::can_enroll(&self.policy, student.as_ref(), &snapshot, &departments) {
            EnrollDecision::Eligible => {}
            EnrollDecision::StudentNotFound => return Err(AppError::NotFound),
            decision => return Err(AppError::Conflict(decision.reason().to_string())),
        }

        let added = db::courses::try_add_student(&self.db, course_id, student_id).await?;
        if !added {
            // Lost the race between the eligibility read and the conditional
            // write. If a concurrent duplicate of this very call won, the
            // student is a member now and the retry semantics make this a
            // success; otherwise the course filled up.
            if !db::courses::is_member(&self.db, course_id, student_id).await? {
                return Err(AppError::Conflict(
                    EnrollDecision::CourseFull.reason().to_string(),
                ));
            }
        }

        db::courses::find_course_by_id(&self.db, course_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    async fn drop_student(&self, student_id: &str, course_id: &str) -> Result<Course, AppError> {
        let snapshot = db::courses::find_enrollment_snapshot(&self.db, course_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if policy::can_drop(student_id, &snapshot.student_ids) == DropDecision::NotEnrolled {
            return Err(AppError::Conflict("not enrolled in this course".to_string()));
        }

        // A false return means a concurrent drop already removed the row;
        // the requested end state holds either way.
        let _ = db::courses::try_remove_student(&self.db, course_id, student_id).await?;

        db::courses::find_course_by_id(&self.db, course_id)
            .await?
            .ok_or(AppError::NotFound)
    }
}
