pub mod preview;
pub mod schema;

pub use preview::preview_command;
pub use schema::schema_command;
