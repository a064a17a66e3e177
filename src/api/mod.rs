pub mod query;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::auth::Identity;
use crate::error::AppError;
use crate::models::{Course, PublicUser};
use crate::services::{CatalogService, CourseList, EnrollmentService};
use crate::state::AppState;

use self::query::RawListParams;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/courses", get(list_courses).post(create_course))
        .route(
            "/courses/{id}",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route("/courses/{id}/enroll", post(enroll))
        .route("/courses/{id}/drop", post(drop_course))
        .route("/courses/{id}/assign/{student_id}", post(assign_student))
        .route("/courses/{id}/remove-student/{student_id}", post(remove_student))
        .route("/courses/{id}/students", get(course_students))
        .route("/instructors", get(list_instructors))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    Ok(StatusCode::OK)
}

async fn list_courses(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<RawListParams>,
) -> Result<Json<CourseList>, AppError> {
    let service = CatalogService::new(state.db.clone());
    let list = service.list(&identity, params.into_query()).await?;
    Ok(Json(list))
}

async fn get_course(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let service = CatalogService::new(state.db.clone());
    Ok(Json(service.get_by_id(&identity, &id).await?))
}

async fn create_course(
    State(state): State<AppState>,
    identity: Identity,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Course>), AppError> {
    let service = CatalogService::new(state.db.clone());
    let course = service.create(&identity, &body).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn update_course(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Course>, AppError> {
    let service = CatalogService::new(state.db.clone());
    Ok(Json(service.update(&identity, &id, &body).await?))
}

async fn delete_course(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let service = CatalogService::new(state.db.clone());
    service.delete(&identity, &id).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn enroll(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Course>, AppError> {
    let service = EnrollmentService::new(state.db.clone(), state.policy.clone());
    Ok(Json(service.enroll(&identity, &id).await?))
}

async fn drop_course(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Course>, AppError> {
    let service = EnrollmentService::new(state.db.clone(), state.policy.clone());
    Ok(Json(service.drop_course(&identity, &id).await?))
}

async fn assign_student(
    State(state): State<AppState>,
    identity: Identity,
    Path((id, student_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let service = EnrollmentService::new(state.db.clone(), state.policy.clone());
    let course = service.assign_student(&identity, &id, &student_id).await?;
    Ok(Json(json!({ "ok": true, "course": course })))
}

async fn remove_student(
    State(state): State<AppState>,
    identity: Identity,
    Path((id, student_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let service = EnrollmentService::new(state.db.clone(), state.policy.clone());
    let course = service.remove_student(&identity, &id, &student_id).await?;
    Ok(Json(json!({ "ok": true, "course": course })))
}

async fn list_instructors(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Vec<PublicUser>>, AppError> {
    let service = CatalogService::new(state.db.clone());
    Ok(Json(service.list_instructors(&identity).await?))
}

async fn course_students(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Vec<PublicUser>>, AppError> {
    let service = CatalogService::new(state.db.clone());
    Ok(Json(service.list_students(&identity, &id).await?))
}
