pub use super::directories::Entity as Directories;
pub use super::project_access::Entity as ProjectAccess;
pub use super::projects::Entity as Projects;
pub use super::stored_files::Entity as StoredFiles;
pub use super::upload_sessions::Entity as UploadSessions;
