pub mod analysis;
pub mod assembler;
pub mod config;
pub mod dig;
pub mod emit;
pub mod error;
pub mod ir;
pub mod pipeline;
