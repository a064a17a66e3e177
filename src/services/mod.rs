pub mod catalog;
pub mod enrollment;

pub use catalog::{CatalogService, CourseList, ListQuery, Pagination};
pub use enrollment::EnrollmentService;
