pub mod cache;
pub mod database;
pub mod results;
pub mod schema;
