pub mod manager;
pub mod origin;
pub mod store;

pub use manager::DatabaseManager;
pub use origin::{validate_query, OriginReader};
pub use store::{PgStore, RelationalStore, StoredRow};
