pub mod prelude;

pub mod directories;
pub mod project_access;
pub mod projects;
pub mod stored_files;
pub mod upload_sessions;
