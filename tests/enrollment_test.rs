use registrar::auth::Identity;
use registrar::db;
use registrar::db::courses::UpdateOutcome;
use registrar::error::AppError;
use registrar::models::{Course, CourseUpdate, NewCourse, NewUser, Role};
use registrar::policy::PolicyConfig;
use registrar::services::{CatalogService, EnrollmentService};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

// A single connection keeps the in-memory database shared across all tasks
// in a test.
async fn setup_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test db");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

fn service(pool: &SqlitePool) -> EnrollmentService {
    EnrollmentService::new(pool.clone(), PolicyConfig::default())
}

fn identity(id: &str, role: Role) -> Identity {
    Identity {
        user_id: Some(id.to_string()),
        role: Some(role),
    }
}

async fn seed_user(pool: &SqlitePool, name: &str, role: Role, department: &str) -> String {
    db::users::insert_user(
        pool,
        NewUser {
            firstname: name.to_string(),
            surname: "Test".to_string(),
            email: format!("{name}@example.edu"),
            password_hash: "hash".to_string(),
            role,
            department: department.to_string(),
        },
    )
    .await
    .expect("Failed to insert user")
    .id
}

async fn seed_course(
    pool: &SqlitePool,
    title: &str,
    department: &str,
    capacity: i64,
    instructor_id: Option<String>,
) -> Course {
    db::courses::insert_course(
        pool,
        NewCourse {
            kind: "course".to_string(),
            title: title.to_string(),
            code: format!("{}-101", title.to_uppercase()),
            description: String::new(),
            credits: 3,
            capacity,
            schedule: String::new(),
            room: String::new(),
            prerequisites: String::new(),
            department: department.to_string(),
            instructor_id,
        },
    )
    .await
    .expect("Failed to insert course")
}

fn conflict_reason(err: AppError) -> String {
    match err {
        AppError::Conflict(reason) => reason,
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn capacity_scenario() {
    let pool = setup_db().await;
    let svc = service(&pool);
    let a = seed_user(&pool, "a", Role::Student, "CS").await;
    let b = seed_user(&pool, "b", Role::Student, "CS").await;
    let c = seed_user(&pool, "c", Role::Student, "CS").await;
    let course = seed_course(&pool, "algo", "CS", 2, None).await;

    let after_a = svc.enroll(&identity(&a, Role::Student), &course.id).await.unwrap();
    assert_eq!(after_a.enrolled, 1);
    let after_b = svc.enroll(&identity(&b, Role::Student), &course.id).await.unwrap();
    assert_eq!(after_b.enrolled, 2);

    let err = svc.enroll(&identity(&c, Role::Student), &course.id).await.unwrap_err();
    assert_eq!(conflict_reason(err), "course is full");

    let after_drop = svc
        .drop_course(&identity(&a, Role::Student), &course.id)
        .await
        .unwrap();
    assert_eq!(after_drop.enrolled, 1);
    assert!(!after_drop.student_ids.contains(&a));

    let after_c = svc.enroll(&identity(&c, Role::Student), &course.id).await.unwrap();
    assert_eq!(after_c.enrolled, 2);
    assert!(after_c.student_ids.contains(&c));
}

#[tokio::test]
async fn second_enroll_conflicts_without_duplicating_membership() {
    let pool = setup_db().await;
    let svc = service(&pool);
    let s = seed_user(&pool, "s", Role::Student, "CS").await;
    let course = seed_course(&pool, "db", "CS", 10, None).await;

    let first = svc.enroll(&identity(&s, Role::Student), &course.id).await.unwrap();
    assert_eq!(first.student_ids, vec![s.clone()]);

    let err = svc.enroll(&identity(&s, Role::Student), &course.id).await.unwrap_err();
    assert_eq!(conflict_reason(err), "already enrolled in this course");

    let members = db::courses::member_ids(&pool, &course.id).await.unwrap();
    assert_eq!(members, vec![s]);
}

#[tokio::test]
async fn drop_reverses_enroll() {
    let pool = setup_db().await;
    let svc = service(&pool);
    let s = seed_user(&pool, "s", Role::Student, "CS").await;
    let course = seed_course(&pool, "os", "CS", 5, None).await;
    let before = db::courses::member_ids(&pool, &course.id).await.unwrap();

    svc.enroll(&identity(&s, Role::Student), &course.id).await.unwrap();
    svc.drop_course(&identity(&s, Role::Student), &course.id).await.unwrap();

    let after = db::courses::member_ids(&pool, &course.id).await.unwrap();
    assert_eq!(before, after);

    let err = svc
        .drop_course(&identity(&s, Role::Student), &course.id)
        .await
        .unwrap_err();
    assert_eq!(conflict_reason(err), "not enrolled in this course");
}

#[tokio::test]
async fn per_student_cap_applies_across_departments() {
    let pool = setup_db().await;
    // Quota disabled so only the total cap is in play.
    let svc = EnrollmentService::new(
        pool.clone(),
        PolicyConfig {
            max_courses_per_student: 5,
            max_non_major_courses: None,
        },
    );
    let s = seed_user(&pool, "s", Role::Student, "CS").await;

    for i in 0..5 {
        let course = seed_course(&pool, &format!("cs{i}"), "CS", 10, None).await;
        svc.enroll(&identity(&s, Role::Student), &course.id).await.unwrap();
    }

    let sixth = seed_course(&pool, "extra", "CS", 10, None).await;
    let err = svc.enroll(&identity(&s, Role::Student), &sixth.id).await.unwrap_err();
    assert_eq!(conflict_reason(err), "maximum number of courses reached");
}

#[tokio::test]
async fn non_major_quota_blocks_only_foreign_departments() {
    let pool = setup_db().await;
    let svc = service(&pool);
    let s = seed_user(&pool, "s", Role::Student, "CS").await;

    let math = seed_course(&pool, "math", "Math", 10, None).await;
    let physics = seed_course(&pool, "phys", "Physics", 10, None).await;
    svc.enroll(&identity(&s, Role::Student), &math.id).await.unwrap();
    svc.enroll(&identity(&s, Role::Student), &physics.id).await.unwrap();

    let history = seed_course(&pool, "hist", "History", 10, None).await;
    let err = svc.enroll(&identity(&s, Role::Student), &history.id).await.unwrap_err();
    assert_eq!(conflict_reason(err), "non-major course quota exceeded");

    // Same student can still enroll in their own department.
    let cs = seed_course(&pool, "algo", "CS", 10, None).await;
    svc.enroll(&identity(&s, Role::Student), &cs.id).await.unwrap();
}

#[tokio::test]
async fn concurrent_enrollment_never_exceeds_capacity() {
    let pool = setup_db().await;
    let capacity = 2;
    let course = seed_course(&pool, "popular", "CS", capacity, None).await;

    let mut students = Vec::new();
    for i in 0..6 {
        students.push(seed_user(&pool, &format!("s{i}"), Role::Student, "CS").await);
    }

    let mut handles = Vec::new();
    for student in &students {
        let pool = pool.clone();
        let course_id = course.id.clone();
        let student = student.clone();
        handles.push(tokio::spawn(async move {
            let svc = EnrollmentService::new(pool, PolicyConfig::default());
            svc.enroll(&identity(&student, Role::Student), &course_id).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert_eq!(conflict_reason(err), "course is full"),
        }
    }
    assert_eq!(succeeded, capacity);

    let members = db::courses::member_ids(&pool, &course.id).await.unwrap();
    assert_eq!(members.len() as i64, capacity);
}

#[tokio::test]
async fn concurrent_duplicate_enrolls_commit_one_membership() {
    let pool = setup_db().await;
    let s = seed_user(&pool, "s", Role::Student, "CS").await;
    let course = seed_course(&pool, "dup", "CS", 10, None).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let pool = pool.clone();
        let course_id = course.id.clone();
        let student = s.clone();
        handles.push(tokio::spawn(async move {
            let svc = EnrollmentService::new(pool, PolicyConfig::default());
            svc.enroll(&identity(&student, Role::Student), &course_id).await
        }));
    }

    let outcomes: Vec<_> = futures_join(handles).await;
    assert!(outcomes.iter().any(Result::is_ok));

    let members = db::courses::member_ids(&pool, &course.id).await.unwrap();
    assert_eq!(members, vec![s]);
}

async fn futures_join(
    handles: Vec<tokio::task::JoinHandle<Result<Course, AppError>>>,
) -> Vec<Result<Course, AppError>> {
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }
    outcomes
}

#[tokio::test]
async fn enroll_requires_student_identity_and_valid_id() {
    let pool = setup_db().await;
    let svc = service(&pool);
    let s = seed_user(&pool, "s", Role::Student, "CS").await;
    let course = seed_course(&pool, "sec", "CS", 5, None).await;

    let err = svc
        .enroll(&identity(&s, Role::Student), "not-a-uuid")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidId));

    let err = svc.enroll(&Identity::default(), &course.id).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));

    let i = seed_user(&pool, "i", Role::Instructor, "").await;
    let err = svc
        .enroll(&identity(&i, Role::Instructor), &course.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
}

#[tokio::test]
async fn assign_respects_ownership_and_target_role() {
    let pool = setup_db().await;
    let svc = service(&pool);
    let owner = seed_user(&pool, "owner", Role::Instructor, "").await;
    let other = seed_user(&pool, "other", Role::Instructor, "").await;
    let admin = seed_user(&pool, "admin", Role::Admin, "").await;
    let s = seed_user(&pool, "s", Role::Student, "CS").await;
    let course = seed_course(&pool, "owned", "CS", 5, Some(owner.clone())).await;

    // Foreign instructor is denied.
    let err = svc
        .assign_student(&identity(&other, Role::Instructor), &course.id, &s)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    // A non-student target is reported as missing.
    let err = svc
        .assign_student(&identity(&owner, Role::Instructor), &course.id, &other)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    // Owner assigns; the membership mutation targets the student.
    let course_after = svc
        .assign_student(&identity(&owner, Role::Instructor), &course.id, &s)
        .await
        .unwrap();
    assert_eq!(course_after.student_ids, vec![s.clone()]);

    // Admin removes without owning.
    let course_after = svc
        .remove_student(&identity(&admin, Role::Admin), &course.id, &s)
        .await
        .unwrap();
    assert!(course_after.student_ids.is_empty());

    // Removing a non-member is a conflict.
    let err = svc
        .remove_student(&identity(&owner, Role::Instructor), &course.id, &s)
        .await
        .unwrap_err();
    assert_eq!(conflict_reason(err), "not enrolled in this course");
}

#[tokio::test]
async fn instructor_list_scope_and_distinct_denials() {
    let pool = setup_db().await;
    let catalog = CatalogService::new(pool.clone());
    let i1 = seed_user(&pool, "i1", Role::Instructor, "").await;
    let i2 = seed_user(&pool, "i2", Role::Instructor, "").await;
    let mine = seed_course(&pool, "mine", "CS", 5, Some(i1.clone())).await;
    let theirs = seed_course(&pool, "theirs", "CS", 5, Some(i2.clone())).await;

    let list = catalog
        .list(&identity(&i1, Role::Instructor), Default::default())
        .await
        .unwrap();
    let items = match list {
        registrar::services::CourseList::Plain(items) => items,
        other => panic!("expected plain list, got {other:?}"),
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], serde_json::json!(mine.id));

    // Another instructor's course: 403. A nonexistent course: 404. The two
    // must stay distinguishable.
    let err = catalog
        .get_by_id(&identity(&i1, Role::Instructor), &theirs.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let missing = uuid::Uuid::new_v4().to_string();
    let err = catalog
        .get_by_id(&identity(&i1, Role::Instructor), &missing)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
}

#[tokio::test]
async fn public_course_projection_has_string_ids() {
    let pool = setup_db().await;
    let catalog = CatalogService::new(pool.clone());
    let svc = service(&pool);
    let instructor = seed_user(&pool, "prof", Role::Instructor, "").await;
    let s = seed_user(&pool, "s", Role::Student, "CS").await;
    let course = seed_course(&pool, "proj", "CS", 5, Some(instructor.clone())).await;
    svc.enroll(&identity(&s, Role::Student), &course.id).await.unwrap();

    let value = catalog
        .get_by_id(&identity(&s, Role::Student), &course.id)
        .await
        .unwrap();
    assert!(value["id"].is_string());
    assert!(value["instructorId"].is_string());
    let ids = value["studentIds"].as_array().unwrap();
    assert!(ids.iter().all(serde_json::Value::is_string));
    assert_eq!(value["enrolled"], serde_json::json!(1));
    // Instructor display enrichment rides along on detail reads.
    assert_eq!(value["instructor"]["firstname"], serde_json::json!("prof"));
}

#[tokio::test]
async fn capacity_cannot_shrink_below_membership() {
    let pool = setup_db().await;
    let catalog = CatalogService::new(pool.clone());
    let svc = service(&pool);
    let admin = seed_user(&pool, "admin", Role::Admin, "").await;
    let s1 = seed_user(&pool, "s1", Role::Student, "CS").await;
    let s2 = seed_user(&pool, "s2", Role::Student, "CS").await;
    let course = seed_course(&pool, "shrink", "CS", 5, None).await;
    svc.enroll(&identity(&s1, Role::Student), &course.id).await.unwrap();
    svc.enroll(&identity(&s2, Role::Student), &course.id).await.unwrap();

    let err = catalog
        .update(
            &identity(&admin, Role::Admin),
            &course.id,
            &serde_json::json!({"capacity": 1}),
        )
        .await
        .unwrap_err();
    match err {
        AppError::Validation(details) => {
            assert_eq!(details, vec!["capacity cannot be less than current enrollment"]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    let updated = catalog
        .update(
            &identity(&admin, Role::Admin),
            &course.id,
            &serde_json::json!({"capacity": 2}),
        )
        .await
        .unwrap();
    assert_eq!(updated.capacity, 2);
}

// The advisory pre-check can pass and then lose to an enroll that commits
// before the write; the UPDATE itself must refuse the shrink.
#[tokio::test]
async fn capacity_shrink_loses_race_to_concurrent_enroll() {
    let pool = setup_db().await;
    let s1 = seed_user(&pool, "s1", Role::Student, "CS").await;
    let s2 = seed_user(&pool, "s2", Role::Student, "CS").await;
    let course = seed_course(&pool, "race", "CS", 5, None).await;
    assert!(db::courses::try_add_student(&pool, &course.id, &s1).await.unwrap());

    // At this point a pre-read sees one member, so capacity 1 looks fine.
    let snapshot = db::courses::find_enrollment_snapshot(&pool, &course.id)
        .await
        .unwrap()
        .unwrap();
    assert!(snapshot.student_ids.len() <= 1);

    // A second enroll commits between that read and the write.
    assert!(db::courses::try_add_student(&pool, &course.id, &s2).await.unwrap());

    let update = CourseUpdate {
        capacity: Some(1),
        ..Default::default()
    };
    let outcome = db::courses::update_course(&pool, &course.id, &update).await.unwrap();
    assert!(matches!(outcome, UpdateOutcome::CapacityBelowEnrollment));

    let after = db::courses::find_course_by_id(&pool, &course.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.capacity, 5);
    assert!(after.enrolled <= after.capacity);
}

#[tokio::test]
async fn named_instructor_must_exist_and_hold_the_role() {
    let pool = setup_db().await;
    let catalog = CatalogService::new(pool.clone());
    let admin = seed_user(&pool, "admin", Role::Admin, "").await;
    let s = seed_user(&pool, "s", Role::Student, "CS").await;
    let prof = seed_user(&pool, "prof", Role::Instructor, "").await;

    let body = |instructor: &str| {
        serde_json::json!({
            "title": "Compilers",
            "code": "CS-401",
            "credits": 3,
            "capacity": 10,
            "instructorId": instructor,
        })
    };

    // Well-formed id with no matching row: a client error, not a 500.
    let ghost = uuid::Uuid::new_v4().to_string();
    let err = catalog
        .create(&identity(&admin, Role::Admin), &body(&ghost))
        .await
        .unwrap_err();
    match err {
        AppError::Validation(details) => {
            assert_eq!(details, vec!["instructorId must reference an instructor"]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    // An existing user without the instructor role is rejected the same way.
    let err = catalog
        .create(&identity(&admin, Role::Admin), &body(&s))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    // A real instructor goes through, on create and on reassignment.
    let course = catalog
        .create(&identity(&admin, Role::Admin), &body(&prof))
        .await
        .unwrap();
    assert_eq!(course.instructor_id, Some(prof.clone()));

    let err = catalog
        .update(
            &identity(&admin, Role::Admin),
            &course.id,
            &serde_json::json!({"instructorId": ghost}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let updated = catalog
        .update(
            &identity(&admin, Role::Admin),
            &course.id,
            &serde_json::json!({"instructorId": prof}),
        )
        .await
        .unwrap();
    assert_eq!(updated.instructor_id, Some(prof));
}

#[tokio::test]
async fn deleting_a_course_cascades_membership() {
    let pool = setup_db().await;
    let catalog = CatalogService::new(pool.clone());
    let svc = service(&pool);
    let admin = seed_user(&pool, "admin", Role::Admin, "").await;
    let s = seed_user(&pool, "s", Role::Student, "CS").await;
    let course = seed_course(&pool, "gone", "CS", 5, None).await;
    svc.enroll(&identity(&s, Role::Student), &course.id).await.unwrap();

    catalog
        .delete(&identity(&admin, Role::Admin), &course.id)
        .await
        .unwrap();

    let departments = db::courses::enrolled_departments(&pool, &s).await.unwrap();
    assert!(departments.is_empty());
}
