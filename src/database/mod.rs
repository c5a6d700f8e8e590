/*!
 * SQLite persistence for translated entities.
 *
 * - `schema`: entity descriptors, registration checks and DDL
 * - `connection`: the shared connection and transaction helper
 * - `models`: values, entities and drafts
 * - `repository`: create/update/delete/fetch of logical entities
 */

pub mod connection;
pub mod models;
pub mod repository;
pub mod schema;

pub use connection::DatabaseConnection;
pub use models::{Entity, EntityDraft, LoadedTranslations, TranslationRow, Value, ValuesRow};
pub use repository::{EntityStats, RepositoryStats, TranslationRepository};
pub use schema::{EntitySchema, SchemaRegistry, TranslationModel};
