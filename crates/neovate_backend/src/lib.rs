mod env;
mod services;
mod sqlite_store;

pub use services::DesktopServices;
pub use sqlite_store::SqliteStore;
