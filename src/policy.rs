//! Enrollment policy engine: pure decision logic, no I/O.
//!
//! Every handler goes through the same two authorization primitives
//! ([`authorization_scope`] for list/read filtering, [`is_owner`] for
//! mutations) and every enrollment mutation through [`can_enroll`] /
//! [`can_drop`]. The functions here only compute decisions; enforcing them
//! against the database is the services' job.

use std::env;

use crate::models::{EnrollmentSnapshot, Role, User};

pub const DEFAULT_MAX_COURSES_PER_STUDENT: i64 = 5;
pub const DEFAULT_MAX_NON_MAJOR_COURSES: i64 = 2;

/// Enrollment limits. These are deployment configuration, not law: the cap
/// and quota can be tuned per installation, and the department quota can be
/// switched off entirely.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub max_courses_per_student: i64,
    /// `None` disables the non-major quota check.
    pub max_non_major_courses: Option<i64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_courses_per_student: DEFAULT_MAX_COURSES_PER_STUDENT,
            max_non_major_courses: Some(DEFAULT_MAX_NON_MAJOR_COURSES),
        }
    }
}

impl PolicyConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = env::var("MAX_COURSES_PER_STUDENT") {
            if let Ok(n) = v.parse() {
                cfg.max_courses_per_student = n;
            }
        }
        if let Ok(v) = env::var("MAX_NON_MAJOR_COURSES") {
            if let Ok(n) = v.parse() {
                cfg.max_non_major_courses = Some(n);
            }
        }
        if let Ok(v) = env::var("ENFORCE_DEPARTMENT_QUOTA") {
            if v == "false" || v == "0" {
                cfg.max_non_major_courses = None;
            }
        }
        cfg
    }
}

/// Which courses a caller may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourseScope {
    Unrestricted,
    /// Courses owned by this instructor id.
    OwnedBy(String),
    /// Courses this student is currently enrolled in.
    EnrolledIn(String),
    /// Matches no course. Used when a restricted role has no usable id.
    Nothing,
}

/// Read scope for the caller. Anonymous callers browse the full catalog;
/// instructors are confined to their own courses and fail closed when their
/// id is missing; students see everything unless they asked for the
/// enrolled-only view.
pub fn authorization_scope(
    role: Option<Role>,
    caller_id: Option<&str>,
    enrolled_only: bool,
) -> CourseScope {
    let caller_id = caller_id.map(str::trim).filter(|s| !s.is_empty());
    match role {
        None | Some(Role::Admin) => CourseScope::Unrestricted,
        Some(Role::Instructor) => match caller_id {
            Some(id) => CourseScope::OwnedBy(id.to_string()),
            None => CourseScope::Nothing,
        },
        Some(Role::Student) => {
            if enrolled_only {
                match caller_id {
                    Some(id) => CourseScope::EnrolledIn(id.to_string()),
                    None => CourseScope::Nothing,
                }
            } else {
                CourseScope::Unrestricted
            }
        }
    }
}

/// Whether the caller may mutate this course. Deny by default: an instructor
/// only owns a course whose `instructor_id` matches exactly; a course with no
/// instructor grants nothing. Students never reach ownership-gated paths, so
/// the check is inapplicable (true) for them.
pub fn is_owner(role: Role, caller_id: &str, instructor_id: Option<&str>) -> bool {
    match role {
        Role::Admin => true,
        Role::Instructor => instructor_id.is_some_and(|id| id == caller_id),
        Role::Student => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollDecision {
    Eligible,
    StudentNotFound,
    AlreadyEnrolled,
    CourseFull,
    TooManyCourses,
    NonMajorQuotaExceeded,
}

impl EnrollDecision {
    pub fn reason(self) -> &'static str {
        match self {
            EnrollDecision::Eligible => "eligible",
            EnrollDecision::StudentNotFound => "student not found",
            EnrollDecision::AlreadyEnrolled => "already enrolled in this course",
            EnrollDecision::CourseFull => "course is full",
            EnrollDecision::TooManyCourses => "maximum number of courses reached",
            EnrollDecision::NonMajorQuotaExceeded => "non-major course quota exceeded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropDecision {
    Eligible,
    NotEnrolled,
}

/// Eligibility of `student` for `course`. `enrolled_departments` holds the
/// department of every course the student is currently enrolled in.
///
/// Checks run cheapest-first: existence, duplicate membership and capacity
/// before the cross-course aggregates. The capacity verdict here is advisory;
/// the atomic conditional insert at the data layer is the authoritative gate.
pub fn can_enroll(
    cfg: &PolicyConfig,
    student: Option<&User>,
    course: &EnrollmentSnapshot,
    enrolled_departments: &[String],
) -> EnrollDecision {
    let Some(student) = student else {
        return EnrollDecision::StudentNotFound;
    };
    if course.student_ids.iter().any(|id| *id == student.id) {
        return EnrollDecision::AlreadyEnrolled;
    }
    if course.student_ids.len() as i64 >= course.capacity {
        return EnrollDecision::CourseFull;
    }
    if enrolled_departments.len() as i64 >= cfg.max_courses_per_student {
        return EnrollDecision::TooManyCourses;
    }
    if let Some(max_non_major) = cfg.max_non_major_courses {
        let candidate_non_major = !course.department.eq_ignore_ascii_case(&student.department);
        let non_major_count = enrolled_departments
            .iter()
            .filter(|d| !d.eq_ignore_ascii_case(&student.department))
            .count() as i64;
        if candidate_non_major && non_major_count >= max_non_major {
            return EnrollDecision::NonMajorQuotaExceeded;
        }
    }
    EnrollDecision::Eligible
}

pub fn can_drop(student_id: &str, member_ids: &[String]) -> DropDecision {
    if member_ids.iter().any(|id| id == student_id) {
        DropDecision::Eligible
    } else {
        DropDecision::NotEnrolled
    }
}
