//! HTTPS Upgrade Ruleset Compiler
//!
//! This crate compiles HTTPS-Everywhere style JSON rulesets into the HXS
//! store format read by `httpse-core`.

pub mod builder;
pub mod optimizer;
pub mod parser;

pub use builder::{compile_sources, CompileOutput};
pub use optimizer::{optimize_rules, OptimizeStats};
pub use parser::{parse_ruleset_source, ParseError};
