use std::fs;
use std::path::Path;
use std::time::Instant;

use httpse_compiler::{compile_sources, OptimizeStats};
use httpse_core::store::Snapshot;

#[derive(Debug, Clone)]
pub struct CompileStats {
    pub optimize: OptimizeStats,
    pub source_bytes: usize,
    pub total_ms: f64,
}

pub fn compile_store_bytes(
    inputs: &[String],
    build_id: u32,
    verbose: bool,
) -> Result<(Vec<u8>, CompileStats), String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    let start = Instant::now();
    let mut sources = Vec::with_capacity(inputs.len());
    for (idx, path) in inputs.iter().enumerate() {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {}", path, e))?;
        if verbose {
            println!(
                "  [{}] {} - {} bytes",
                idx,
                Path::new(path).file_name().unwrap_or_default().to_string_lossy(),
                content.len()
            );
        }
        sources.push(content);
    }
    let source_bytes = sources.iter().map(String::len).sum();

    let output = compile_sources(&sources, build_id).map_err(|e| e.to_string())?;

    Snapshot::load(output.bytes.clone())
        .map_err(|e| format!("Generated store failed validation: {}", e))?;

    let stats = CompileStats {
        optimize: output.stats,
        source_bytes,
        total_ms: start.elapsed().as_secs_f64() * 1000.0,
    };

    Ok((output.bytes, stats))
}

/// Write through a temporary file, then rename into place.
pub fn write_store(path: &Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
    }
    let tmp = path.with_extension("hxs.tmp");
    fs::write(&tmp, bytes)
        .map_err(|e| format!("Failed to write '{}': {}", tmp.display(), e))?;
    fs::rename(&tmp, path)
        .map_err(|e| format!("Failed to move store into '{}': {}", path.display(), e))?;
    Ok(())
}

pub fn read_store(path: &Path) -> Result<Snapshot, String> {
    let bytes = fs::read(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    Snapshot::load(bytes).map_err(|e| format!("Invalid store '{}': {}", path.display(), e))
}
