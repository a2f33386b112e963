pub mod builder;
pub mod ids;
