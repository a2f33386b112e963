pub mod filesystem;
pub mod imports;
pub mod lang;
pub mod parser;
pub mod pipeline;
pub mod relations;
pub mod symbols;
