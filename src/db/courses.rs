use chrono::Utc;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::models::{Course, CourseUpdate, EnrollmentSnapshot, NewCourse};
use crate::policy::CourseScope;

/// Select list shared by every course read. The enrolled count and the
/// membership array are computed from the enrollment rows on each read;
/// there is no stored counter to drift out of sync.
const COURSE_COLUMNS: &str = "\
    c.id, c.type AS kind, c.title, c.code, c.description, c.credits, c.capacity, \
    c.schedule, c.room, c.prerequisites, c.department, c.instructor_id, \
    (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) AS enrolled, \
    (SELECT GROUP_CONCAT(e.student_id) FROM enrollments e WHERE e.course_id = c.id) AS student_ids, \
    c.created_at, c.updated_at";

#[derive(Debug, FromRow)]
struct CourseRow {
    id: String,
    kind: String,
    title: String,
    code: String,
    description: String,
    credits: i64,
    capacity: i64,
    schedule: String,
    room: String,
    prerequisites: String,
    department: String,
    instructor_id: Option<String>,
    enrolled: i64,
    student_ids: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<CourseRow> for Course {
    fn from(row: CourseRow) -> Self {
        let student_ids = row
            .student_ids
            .map(|csv| csv.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        Course {
            id: row.id,
            kind: row.kind,
            title: row.title,
            code: row.code,
            description: row.description,
            credits: row.credits,
            capacity: row.capacity,
            schedule: row.schedule,
            room: row.room,
            prerequisites: row.prerequisites,
            department: row.department,
            instructor_id: row.instructor_id,
            enrolled: row.enrolled,
            student_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Caller-supplied list filters, composed with the authorization scope by
/// logical AND. All fields optional; absent fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct CourseFilter {
    pub kind: Option<String>,
    /// Case-insensitive substring match.
    pub title: Option<String>,
    /// Case-insensitive substring match.
    pub code: Option<String>,
    pub instructor_id: Option<String>,
    pub department: Option<String>,
    pub min_credits: Option<i64>,
    pub max_credits: Option<i64>,
    pub min_capacity: Option<i64>,
    pub max_capacity: Option<i64>,
    /// Exact match on the derived enrollment count.
    pub enrolled: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Title,
    Code,
    Credits,
    Capacity,
    Department,
    Enrolled,
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    pub fn parse(s: &str) -> Option<SortField> {
        match s {
            "title" => Some(SortField::Title),
            "code" => Some(SortField::Code),
            "credits" => Some(SortField::Credits),
            "capacity" => Some(SortField::Capacity),
            "department" => Some(SortField::Department),
            "enrolled" => Some(SortField::Enrolled),
            "createdAt" => Some(SortField::CreatedAt),
            "updatedAt" => Some(SortField::UpdatedAt),
            _ => None,
        }
    }

    // Whitelisted column expressions; sort input never reaches the SQL text
    // directly.
    fn column(self) -> &'static str {
        match self {
            SortField::Title => "c.title",
            SortField::Code => "c.code",
            SortField::Credits => "c.credits",
            SortField::Capacity => "c.capacity",
            SortField::Department => "c.department",
            SortField::Enrolled => "enrolled",
            SortField::CreatedAt => "c.created_at",
            SortField::UpdatedAt => "c.updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sort {
    pub field: SortField,
    pub descending: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    pub fn offset(self) -> i64 {
        (self.page - 1) * self.limit
    }
}

fn like_pattern(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

fn push_scope_and_filter(
    qb: &mut QueryBuilder<'_, Sqlite>,
    scope: &CourseScope,
    filter: &CourseFilter,
) {
    qb.push(" WHERE 1 = 1");

    match scope {
        CourseScope::Unrestricted => {}
        CourseScope::OwnedBy(id) => {
            qb.push(" AND c.instructor_id = ").push_bind(id.clone());
        }
        CourseScope::EnrolledIn(id) => {
            qb.push(
                " AND EXISTS (SELECT 1 FROM enrollments e WHERE e.course_id = c.id AND e.student_id = ",
            )
            .push_bind(id.clone())
            .push(")");
        }
        CourseScope::Nothing => {
            qb.push(" AND 0 = 1");
        }
    }

    if let Some(kind) = &filter.kind {
        qb.push(" AND c.type = ").push_bind(kind.clone());
    }
    if let Some(title) = &filter.title {
        qb.push(" AND c.title LIKE ")
            .push_bind(like_pattern(title))
            .push(" ESCAPE '\\'");
    }
    if let Some(code) = &filter.code {
        qb.push(" AND c.code LIKE ")
            .push_bind(like_pattern(code))
            .push(" ESCAPE '\\'");
    }
    if let Some(id) = &filter.instructor_id {
        qb.push(" AND c.instructor_id = ").push_bind(id.clone());
    }
    if let Some(department) = &filter.department {
        qb.push(" AND c.department = ").push_bind(department.clone());
    }
    if let Some(n) = filter.min_credits {
        qb.push(" AND c.credits >= ").push_bind(n);
    }
    if let Some(n) = filter.max_credits {
        qb.push(" AND c.credits <= ").push_bind(n);
    }
    if let Some(n) = filter.min_capacity {
        qb.push(" AND c.capacity >= ").push_bind(n);
    }
    if let Some(n) = filter.max_capacity {
        qb.push(" AND c.capacity <= ").push_bind(n);
    }
    if let Some(n) = filter.enrolled {
        qb.push(" AND (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) = ")
            .push_bind(n);
    }
}

pub async fn list_courses(
    db: &SqlitePool,
    scope: &CourseScope,
    filter: &CourseFilter,
    sort: Option<Sort>,
    page: Option<Page>,
) -> Result<Vec<Course>, sqlx::Error> {
    let mut qb = QueryBuilder::new(format!("SELECT {COURSE_COLUMNS} FROM courses c"));
    push_scope_and_filter(&mut qb, scope, filter);

    match sort {
        Some(sort) => {
            qb.push(" ORDER BY ");
            qb.push(sort.field.column());
            qb.push(if sort.descending { " DESC" } else { " ASC" });
        }
        None => {
            qb.push(" ORDER BY c.created_at ASC");
        }
    }

    if let Some(page) = page {
        qb.push(" LIMIT ").push_bind(page.limit);
        qb.push(" OFFSET ").push_bind(page.offset());
    }

    let rows = qb.build_query_as::<CourseRow>().fetch_all(db).await?;
    Ok(rows.into_iter().map(Course::from).collect())
}

pub async fn count_courses(
    db: &SqlitePool,
    scope: &CourseScope,
    filter: &CourseFilter,
) -> Result<i64, sqlx::Error> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM courses c");
    push_scope_and_filter(&mut qb, scope, filter);
    qb.build_query_scalar::<i64>().fetch_one(db).await
}

pub async fn find_course_by_id(
    db: &SqlitePool,
    id: &str,
) -> Result<Option<Course>, sqlx::Error> {
    let row = sqlx::query_as::<_, CourseRow>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses c WHERE c.id = ?"
    ))
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(row.map(Course::from))
}

/// Minimal projection for enrollment decisions: capacity, department,
/// ownership and the current membership set.
pub async fn find_enrollment_snapshot(
    db: &SqlitePool,
    id: &str,
) -> Result<Option<EnrollmentSnapshot>, sqlx::Error> {
    #[derive(FromRow)]
    struct SnapshotRow {
        capacity: i64,
        department: String,
        instructor_id: Option<String>,
    }

    let Some(row) = sqlx::query_as::<_, SnapshotRow>(
        "SELECT capacity, department, instructor_id FROM courses WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db)
    .await?
    else {
        return Ok(None);
    };

    let student_ids = member_ids(db, id).await?;
    Ok(Some(EnrollmentSnapshot {
        capacity: row.capacity,
        department: row.department,
        instructor_id: row.instructor_id,
        student_ids,
    }))
}

pub async fn member_ids(db: &SqlitePool, course_id: &str) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT student_id FROM enrollments WHERE course_id = ? ORDER BY enrolled_at",
    )
    .bind(course_id)
    .fetch_all(db)
    .await
}

pub async fn is_member(
    db: &SqlitePool,
    course_id: &str,
    student_id: &str,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM enrollments WHERE course_id = ? AND student_id = ?",
    )
    .bind(course_id)
    .bind(student_id)
    .fetch_one(db)
    .await?;
    Ok(count > 0)
}

/// Departments of every course the student is currently enrolled in. Input
/// to the per-student cap and non-major quota checks.
pub async fn enrolled_departments(
    db: &SqlitePool,
    student_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT c.department FROM courses c \
         JOIN enrollments e ON e.course_id = c.id \
         WHERE e.student_id = ?",
    )
    .bind(student_id)
    .fetch_all(db)
    .await
}

/// Atomic conditional enroll: membership is added only if the course still
/// has a free seat and the student is not already a member, checked and
/// applied in a single statement. This is the authoritative capacity gate;
/// any earlier read is advisory. Returns false when the predicate did not
/// hold at commit time.
pub async fn try_add_student(
    db: &SqlitePool,
    course_id: &str,
    student_id: &str,
) -> Result<bool, sqlx::Error> {
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        "INSERT INTO enrollments (course_id, student_id, enrolled_at) \
         SELECT ?1, ?2, ?3 \
         WHERE (SELECT COUNT(*) FROM enrollments WHERE course_id = ?1) \
               < (SELECT capacity FROM courses WHERE id = ?1) \
           AND NOT EXISTS (SELECT 1 FROM enrollments WHERE course_id = ?1 AND student_id = ?2)",
    )
    .bind(course_id)
    .bind(student_id)
    .bind(now)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Atomic conditional drop: removes the membership if present. Returns false
/// when the student was not a member at commit time.
pub async fn try_remove_student(
    db: &SqlitePool,
    course_id: &str,
    student_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM enrollments WHERE course_id = ? AND student_id = ?")
        .bind(course_id)
        .bind(student_id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn insert_course(db: &SqlitePool, doc: NewCourse) -> Result<Course, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO courses \
            (id, type, title, code, description, credits, capacity, schedule, room, \
             prerequisites, department, instructor_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&doc.kind)
    .bind(&doc.title)
    .bind(&doc.code)
    .bind(&doc.description)
    .bind(doc.credits)
    .bind(doc.capacity)
    .bind(&doc.schedule)
    .bind(&doc.room)
    .bind(&doc.prerequisites)
    .bind(&doc.department)
    .bind(&doc.instructor_id)
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await?;

    Ok(Course {
        id,
        kind: doc.kind,
        title: doc.title,
        code: doc.code,
        description: doc.description,
        credits: doc.credits,
        capacity: doc.capacity,
        schedule: doc.schedule,
        room: doc.room,
        prerequisites: doc.prerequisites,
        department: doc.department,
        instructor_id: doc.instructor_id,
        enrolled: 0,
        student_ids: Vec::new(),
        created_at: now.clone(),
        updated_at: now,
    })
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Updated(Course),
    NotFound,
    /// The write-time membership count exceeded the new capacity, so the
    /// conditional UPDATE touched no row.
    CapacityBelowEnrollment,
}

pub async fn update_course(
    db: &SqlitePool,
    id: &str,
    update: &CourseUpdate,
) -> Result<UpdateOutcome, sqlx::Error> {
    let Some(mut current) = find_course_by_id(db, id).await? else {
        return Ok(UpdateOutcome::NotFound);
    };

    if let Some(v) = &update.kind {
        current.kind = v.clone();
    }
    if let Some(v) = &update.title {
        current.title = v.clone();
    }
    if let Some(v) = &update.code {
        current.code = v.clone();
    }
    if let Some(v) = &update.description {
        current.description = v.clone();
    }
    if let Some(v) = update.credits {
        current.credits = v;
    }
    if let Some(v) = update.capacity {
        current.capacity = v;
    }
    if let Some(v) = &update.schedule {
        current.schedule = v.clone();
    }
    if let Some(v) = &update.room {
        current.room = v.clone();
    }
    if let Some(v) = &update.prerequisites {
        current.prerequisites = v.clone();
    }
    if let Some(v) = &update.department {
        current.department = v.clone();
    }
    if let Some(v) = &update.instructor_id {
        current.instructor_id = v.clone();
    }
    current.updated_at = Utc::now().to_rfc3339();

    // When capacity changes, the UPDATE re-checks the membership count in the
    // same statement; a pre-read count can go stale under a concurrent enroll.
    let mut sql = String::from(
        "UPDATE courses \
         SET type = ?, title = ?, code = ?, description = ?, credits = ?, capacity = ?, \
             schedule = ?, room = ?, prerequisites = ?, department = ?, instructor_id = ?, \
             updated_at = ? \
         WHERE id = ?",
    );
    if update.capacity.is_some() {
        sql.push_str(
            " AND (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = courses.id) <= ?",
        );
    }

    let mut query = sqlx::query(&sql)
        .bind(&current.kind)
        .bind(&current.title)
        .bind(&current.code)
        .bind(&current.description)
        .bind(current.credits)
        .bind(current.capacity)
        .bind(&current.schedule)
        .bind(&current.room)
        .bind(&current.prerequisites)
        .bind(&current.department)
        .bind(&current.instructor_id)
        .bind(&current.updated_at)
        .bind(id);
    if update.capacity.is_some() {
        query = query.bind(current.capacity);
    }

    let result = query.execute(db).await?;
    if result.rows_affected() == 0 {
        return if find_course_by_id(db, id).await?.is_some() {
            Ok(UpdateOutcome::CapacityBelowEnrollment)
        } else {
            Ok(UpdateOutcome::NotFound)
        };
    }

    Ok(UpdateOutcome::Updated(current))
}

/// Deletes a course; membership rows go with it via ON DELETE CASCADE.
pub async fn delete_course(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}
