use anyhow::Context;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

// Persian replies and summaries are multi-byte UTF-8, so slicing a string
// with a literal byte range (`text[..200]`, `[3..]`) can panic mid-character.
// Use `utils::string::{head, tail, preview}` instead.
// Only numeric literal ranges are flagged; `&buf[..n]` with a computed
// boundary is allowed.

fn collect_sources(dir: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read_dir failed: {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            collect_sources(&path, out)?;
        } else if path.extension().map_or(false, |ext| ext == "rs") {
            out.push(path);
        }
    }
    Ok(())
}

#[test]
fn sources_avoid_literal_byte_ranges() -> anyhow::Result<()> {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let literal_range = Regex::new(r"\[\s*(\d+\s*\.\.|\.\.=?\s*\d+)\s*\]").unwrap();

    let mut files = Vec::new();
    collect_sources(&src_dir, &mut files)?;

    let mut failures = Vec::new();
    for path in files {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        failures.extend(
            text.lines()
                .enumerate()
                .filter(|(_, line)| literal_range.is_match(line))
                .map(|(i, line)| format!("{}:{}: {}", path.display(), i + 1, line.trim())),
        );
    }

    if !failures.is_empty() {
        anyhow::bail!(
            "Found literal byte-range slices in source files:\n{}",
            failures.join("\n")
        );
    }

    Ok(())
}
