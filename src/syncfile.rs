use crate::envelope::{self, Envelope};
use crate::error::{CoreError, CoreResult};
use anyhow::{anyhow, Context};
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const ENVELOPE_ENTRY: &str = "envelope.json";
pub const SYNC_FORMAT_V1: &str = "form137-sync-v1";
pub const BARE_JSON_FORMAT: &str = "bare-json";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub format: String,
    pub record_count: usize,
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
pub struct LoadedSyncFile {
    pub format_detected: String,
    pub fingerprint: String,
    pub envelope: Envelope,
}

fn write_bundle(
    tmp_path: &Path,
    envelope: &Envelope,
    body: &[u8],
    fingerprint: &str,
) -> anyhow::Result<()> {
    let out_file = File::create(tmp_path).with_context(|| {
        format!("failed to create output file {}", tmp_path.to_string_lossy())
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": SYNC_FORMAT_V1,
        "version": envelope.version,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": envelope.timestamp,
        "recordCount": envelope.records.len(),
        "sha256": fingerprint,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(ENVELOPE_ENTRY, opts)
        .context("failed to start envelope entry")?;
    zip.write_all(body).context("failed to write envelope entry")?;

    let mut out_file = zip.finish().context("failed to finalize sync bundle")?;
    out_file.flush().context("failed to flush sync bundle")?;
    Ok(())
}

/// Write a sync bundle. The file appears under its final name only once
/// it is complete.
pub fn write_sync_file(envelope: &Envelope, out_path: &Path) -> anyhow::Result<ExportSummary> {
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let body = serde_json::to_vec_pretty(envelope).context("failed to serialize envelope")?;
    let fingerprint = envelope::fingerprint(&body);

    let tmp_path = out_path.with_extension("writing");
    if tmp_path.exists() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    let written = write_bundle(&tmp_path, envelope, &body, &fingerprint).and_then(|()| {
        std::fs::rename(&tmp_path, out_path).with_context(|| {
            format!("failed to move sync bundle to {}", out_path.to_string_lossy())
        })
    });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }

    Ok(ExportSummary {
        format: SYNC_FORMAT_V1.to_string(),
        record_count: envelope.records.len(),
        fingerprint,
    })
}

/// Read a sync bundle, or a bare JSON envelope written by an older build.
pub fn read_sync_file(in_path: &Path) -> CoreResult<LoadedSyncFile> {
    let bytes = std::fs::read(in_path)
        .map_err(|e| CoreError::Resource(format!("sync file {}: {e}", in_path.display())))?;

    if !is_zip(&bytes) {
        let envelope = envelope::decode(&bytes)?;
        return Ok(LoadedSyncFile {
            format_detected: BARE_JSON_FORMAT.to_string(),
            fingerprint: envelope::fingerprint(&bytes),
            envelope,
        });
    }

    let body = read_bundle_envelope(&bytes)
        .map_err(|e| CoreError::MalformedInput(format!("{e:#}")))?;
    let envelope = envelope::decode(&body)?;
    Ok(LoadedSyncFile {
        format_detected: SYNC_FORMAT_V1.to_string(),
        fingerprint: envelope::fingerprint(&body),
        envelope,
    })
}

fn read_bundle_envelope(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut archive =
        ZipArchive::new(std::io::Cursor::new(bytes)).context("invalid zip archive")?;

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
    if format != SYNC_FORMAT_V1 {
        return Err(anyhow!("unsupported sync format: {}", format));
    }

    let mut body = Vec::new();
    archive
        .by_name(ENVELOPE_ENTRY)
        .context("bundle missing envelope.json")?
        .read_to_end(&mut body)
        .context("failed to read envelope.json")?;
    Ok(body)
}

fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0x50, 0x4B, 0x03, 0x04])
}
