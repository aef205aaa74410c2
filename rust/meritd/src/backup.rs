use crate::model::SchoolState;
use crate::sync::check_students;
use anyhow::{anyhow, Context};
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const STATE_ENTRY: &str = "data/state.json";
pub const BUNDLE_FORMAT_V1: &str = "meritd-bundle-v1";
pub const LEGACY_JSON_FORMAT: &str = "legacy-json";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

/// Zip with a manifest and the complete snapshot, cases and config included.
pub fn export_bundle(state: &SchoolState, out_path: &Path) -> anyhow::Result<ExportSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
        "counts": {
            "students": state.students.len(),
            "teachers": state.teachers.len(),
            "cases": state.cases.len(),
        },
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(STATE_ENTRY, opts)
        .context("failed to start state entry")?;
    zip.write_all(
        serde_json::to_string(state)
            .context("failed to serialize state")?
            .as_bytes(),
    )
    .context("failed to write state entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 2,
    })
}

/// Reads and validates the whole bundle; the caller swaps state only on `Ok`.
pub fn import_bundle(in_path: &Path) -> anyhow::Result<(SchoolState, ImportSummary)> {
    if !is_zip_file(in_path)? {
        // A bare state JSON file, as written by older exports.
        let text = std::fs::read_to_string(in_path)
            .with_context(|| format!("failed to read {}", in_path.to_string_lossy()))?;
        let state: SchoolState =
            serde_json::from_str(&text).context("backup file is not valid state JSON")?;
        check_students(&state.students)?;
        return Ok((
            state,
            ImportSummary {
                bundle_format_detected: LEGACY_JSON_FORMAT.to_string(),
            },
        ));
    }

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }

    let mut state_text = String::new();
    archive
        .by_name(STATE_ENTRY)
        .context("bundle missing data/state.json")?
        .read_to_string(&mut state_text)
        .context("failed to read state entry")?;
    let state: SchoolState =
        serde_json::from_str(&state_text).context("data/state.json is not valid state")?;
    check_students(&state.students)?;

    Ok((
        state,
        ImportSummary {
            bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        },
    ))
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("meritd-backup-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn bare_state_json_is_accepted() {
        let state = seed::seed_state(&mut StdRng::seed_from_u64(9));
        let path = temp_path("state.json");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, serde_json::to_string(&state).expect("json")).expect("write");

        let (restored, summary) = import_bundle(&path).expect("import");
        assert_eq!(summary.bundle_format_detected, LEGACY_JSON_FORMAT);
        assert_eq!(restored, state);
    }

    #[test]
    fn bundle_carries_cases_and_config() {
        let mut state = seed::seed_state(&mut StdRng::seed_from_u64(10));
        state.config.language = "ms".into();
        let path = temp_path("bundle.zip");
        let export = export_bundle(&state, &path).expect("export");
        assert_eq!(export.bundle_format, BUNDLE_FORMAT_V1);
        assert!(is_zip_file(&path).expect("signature"));

        let (restored, summary) = import_bundle(&path).expect("import");
        assert_eq!(summary.bundle_format_detected, BUNDLE_FORMAT_V1);
        assert_eq!(restored.config.language, "ms");
        assert_eq!(restored, state);
    }

    #[test]
    fn bundle_with_overflowing_totals_is_refused() {
        let mut state = seed::seed_state(&mut StdRng::seed_from_u64(11));
        state.students[0].total_points = i64::MAX;
        let path = temp_path("overflow.zip");
        export_bundle(&state, &path).expect("export");
        let e = import_bundle(&path).unwrap_err();
        assert!(format!("{e:#}").contains("out of range"));
    }
}
