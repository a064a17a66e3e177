pub mod course;
pub mod user;

pub use course::{
    Course, CourseUpdate, EnrollmentSnapshot, NewCourse, is_valid_id, validate_create_body,
    validate_update_body,
};
pub use user::{NewUser, PublicUser, Role, User};
