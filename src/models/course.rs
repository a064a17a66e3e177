use serde::Serialize;
use serde_json::Value;

/// Full course document in its public (wire) form. `enrolled` and
/// `student_ids` are always derived from the enrollment membership rows;
/// they are never stored or updated independently.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub code: String,
    pub description: String,
    pub credits: i64,
    pub capacity: i64,
    pub schedule: String,
    pub room: String,
    pub prerequisites: String,
    pub department: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructor_id: Option<String>,
    pub enrolled: i64,
    pub student_ids: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Minimal projection loaded before an enrollment mutation: just the fields
/// the policy engine and ownership check need.
#[derive(Debug, Clone)]
pub struct EnrollmentSnapshot {
    pub capacity: i64,
    pub department: String,
    pub instructor_id: Option<String>,
    pub student_ids: Vec<String>,
}

/// Validated course-creation document.
#[derive(Debug, Clone)]
pub struct NewCourse {
    pub kind: String,
    pub title: String,
    pub code: String,
    pub description: String,
    pub credits: i64,
    pub capacity: i64,
    pub schedule: String,
    pub room: String,
    pub prerequisites: String,
    pub department: String,
    pub instructor_id: Option<String>,
}

/// Validated partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct CourseUpdate {
    pub kind: Option<String>,
    pub title: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub credits: Option<i64>,
    pub capacity: Option<i64>,
    pub schedule: Option<String>,
    pub room: Option<String>,
    pub prerequisites: Option<String>,
    pub department: Option<String>,
    pub instructor_id: Option<Option<String>>,
}

pub fn is_valid_id(id: &str) -> bool {
    uuid::Uuid::parse_str(id).is_ok()
}

fn opt_string(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(|s| s.trim().to_string())
}

// Accepts JSON numbers and numeric strings, like the web clients send.
fn opt_number(value: &Value, key: &str) -> Option<Result<i64, ()>> {
    match value.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(n.as_i64().ok_or(())),
        Some(Value::String(s)) => Some(s.trim().parse::<i64>().map_err(|_| ())),
        Some(_) => Some(Err(())),
    }
}

/// Validates a course-creation body, collecting every problem into an
/// enumerable error list. `enrolled` is not accepted: the count is derived
/// from membership and cannot be set by clients.
pub fn validate_create_body(body: &Value) -> Result<NewCourse, Vec<String>> {
    let mut errors = Vec::new();

    let title = opt_string(body, "title").unwrap_or_default();
    let code = opt_string(body, "code").unwrap_or_default();
    if title.is_empty() {
        errors.push("title is required".to_string());
    }
    if code.is_empty() {
        errors.push("code is required".to_string());
    }

    let credits = match opt_number(body, "credits") {
        Some(Ok(n)) if n > 0 => n,
        _ => {
            errors.push("credits must be a positive number".to_string());
            0
        }
    };
    let capacity = match opt_number(body, "capacity") {
        Some(Ok(n)) if n > 0 => n,
        _ => {
            errors.push("capacity must be a positive number".to_string());
            0
        }
    };

    let instructor_id = opt_string(body, "instructorId").filter(|s| !s.is_empty());
    if let Some(id) = &instructor_id {
        if !is_valid_id(id) {
            errors.push("instructorId must be a valid id".to_string());
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(NewCourse {
        kind: opt_string(body, "type")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "course".to_string()),
        title,
        code,
        description: opt_string(body, "description").unwrap_or_default(),
        credits,
        capacity,
        schedule: opt_string(body, "schedule").unwrap_or_default(),
        room: opt_string(body, "room").unwrap_or_default(),
        prerequisites: opt_string(body, "prerequisites").unwrap_or_default(),
        department: opt_string(body, "department").unwrap_or_default(),
        instructor_id,
    })
}

/// Validates a partial course update. At least one updatable field must be
/// present; `enrolled` is rejected for the same reason as on create.
pub fn validate_update_body(body: &Value) -> Result<CourseUpdate, Vec<String>> {
    let mut errors = Vec::new();
    let mut update = CourseUpdate::default();
    let mut touched = false;

    for (key, slot) in [
        ("type", &mut update.kind),
        ("title", &mut update.title),
        ("code", &mut update.code),
        ("description", &mut update.description),
    ] {
        if body.get(key).is_some() {
            touched = true;
            match opt_string(body, key).filter(|s| !s.is_empty()) {
                Some(v) => *slot = Some(v),
                None => errors.push(format!("{key} cannot be empty")),
            }
        }
    }

    if body.get("credits").is_some() {
        touched = true;
        match opt_number(body, "credits") {
            Some(Ok(n)) if n > 0 => update.credits = Some(n),
            _ => errors.push("credits must be a positive number".to_string()),
        }
    }
    if body.get("capacity").is_some() {
        touched = true;
        match opt_number(body, "capacity") {
            Some(Ok(n)) if n > 0 => update.capacity = Some(n),
            _ => errors.push("capacity must be a positive number".to_string()),
        }
    }

    for (key, slot) in [
        ("schedule", &mut update.schedule),
        ("room", &mut update.room),
        ("prerequisites", &mut update.prerequisites),
        ("department", &mut update.department),
    ] {
        if body.get(key).is_some() {
            touched = true;
            *slot = Some(opt_string(body, key).unwrap_or_default());
        }
    }

    if body.get("instructorId").is_some() {
        touched = true;
        let id = opt_string(body, "instructorId").filter(|s| !s.is_empty());
        match &id {
            Some(v) if !is_valid_id(v) => {
                errors.push("instructorId must be a valid id".to_string())
            }
            _ => update.instructor_id = Some(id),
        }
    }

    if body.get("enrolled").is_some() {
        errors.push("enrolled is derived from membership and cannot be set".to_string());
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    if !touched {
        return Err(vec!["at least one field must be provided for update".to_string()]);
    }
    Ok(update)
}
