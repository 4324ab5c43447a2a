//! Source-to-store pipeline: parse, optimize, write.

use log::info;

use httpse_core::store::build_snapshot_with_id;

use crate::optimizer::{optimize_rules, OptimizeStats};
use crate::parser::{parse_ruleset_source, ParseError};

/// A compiled store image and what the optimizer did to get there.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub bytes: Vec<u8>,
    pub stats: OptimizeStats,
    pub build_id: u32,
}

/// Compile ruleset source documents into one store image.
pub fn compile_sources<I, S>(sources: I, build_id: u32) -> Result<CompileOutput, ParseError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut entries = Vec::new();
    for source in sources {
        entries.extend(parse_ruleset_source(source.as_ref())?);
    }

    let stats = optimize_rules(&mut entries);
    let bytes = build_snapshot_with_id(&entries, build_id);
    info!(
        "compiled {} hosts / {} rules into {} bytes (build {build_id})",
        stats.hosts_after,
        stats.rules_after,
        bytes.len()
    );

    Ok(CompileOutput {
        bytes,
        stats,
        build_id,
    })
}
