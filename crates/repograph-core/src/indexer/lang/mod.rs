//! Per-language tree walkers feeding the symbol collector.

pub mod go;
pub mod java;
pub mod python;
pub mod typescript;
