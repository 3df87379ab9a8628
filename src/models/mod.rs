pub mod access;
pub mod collaborator;
pub mod department;
pub mod project;
pub mod subtask;
pub mod task;
pub mod user;
