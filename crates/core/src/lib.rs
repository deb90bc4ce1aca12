pub mod error;
pub mod prefs;
pub mod types;
pub mod uri;
