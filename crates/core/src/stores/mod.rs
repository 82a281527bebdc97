pub mod file;

pub use file::{validate_session_id, FileSessionStore};
