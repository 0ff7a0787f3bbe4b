pub mod assessment_types;
pub mod assessments;
pub mod backup;
pub mod core;
pub mod courses;
pub mod grading;
pub mod lessons;
pub mod setup;
pub mod students;
pub mod templates;
pub mod terms;
