pub mod compare;
pub mod costs;
pub mod init;
pub mod list_backends;
pub mod list_courses;
pub mod run;
pub mod validate;
