//! SQLite-backed directories for the tracker: hierarchy, AOs, entities,
//! tokens, and the violation log.

pub mod aos;
pub mod auth;
pub mod database;
pub mod entities;
pub mod error;
pub mod hierarchy;
pub mod row_helpers;
pub mod schema;
pub mod scope_filter;
pub mod violations;

pub use aos::AoRepo;
pub use auth::TokenAuthenticator;
pub use database::Database;
pub use entities::EntityRepo;
pub use error::StoreError;
pub use hierarchy::HierarchyRepo;
pub use violations::ViolationRepo;
