use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, Write};
use std::path::Path;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const DB_FILE_NAME: &str = "classbook.sqlite3";
const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/classbook.sqlite3";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";
const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";
pub const BUNDLE_FORMAT_V1: &str = "classbook-workspace-v1";
pub const PLAIN_SQLITE_FORMAT: &str = "sqlite3";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    #[serde(default)]
    version: u32,
    #[serde(default)]
    app_version: Option<String>,
    #[serde(default)]
    exported_at: Option<String>,
    #[serde(default)]
    bundle_id: Option<String>,
    #[serde(default = "default_db_entry")]
    db_entry: String,
    db_sha256: String,
}

fn default_db_entry() -> String {
    DB_ENTRY.to_string()
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub bundle_id: String,
    pub db_sha256: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub bundle_id: Option<String>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn write_entry<W: Write + Seek>(zip: &mut ZipWriter<W>, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(name, opts)
        .with_context(|| format!("failed to start entry {}", name))?;
    zip.write_all(bytes)
        .with_context(|| format!("failed to write entry {}", name))
}

/// Zips the workspace database with a manifest holding its SHA-256.
pub fn export_workspace_bundle(workspace_path: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        bail!("workspace database not found: {}", db_path.display());
    }
    let db_bytes =
        std::fs::read(&db_path).with_context(|| format!("failed to read {}", db_path.display()))?;

    let manifest = Manifest {
        format: BUNDLE_FORMAT_V1.to_string(),
        version: 1,
        app_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        exported_at: Some(chrono::Utc::now().to_rfc3339()),
        bundle_id: Some(Uuid::new_v4().to_string()),
        db_entry: DB_ENTRY.to_string(),
        db_sha256: sha256_hex(&db_bytes),
    };
    let meta = serde_json::json!({ "sourceWorkspace": workspace_path.to_string_lossy() });

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let out = File::create(out_path).with_context(|| format!("failed to create {}", out_path.display()))?;
    let mut zip = ZipWriter::new(out);
    write_entry(&mut zip, MANIFEST_ENTRY, &serde_json::to_vec_pretty(&manifest)?)?;
    write_entry(&mut zip, &manifest.db_entry, &db_bytes)?;
    write_entry(&mut zip, META_WORKSPACE_ENTRY, &serde_json::to_vec_pretty(&meta)?)?;
    zip.finish().context("failed to finalize bundle")?;

    Ok(ExportSummary {
        bundle_format: manifest.format,
        bundle_id: manifest.bundle_id.unwrap_or_default(),
        db_sha256: manifest.db_sha256,
        entry_count: 3,
    })
}

/// Restores the workspace database from a bundle, or copies a plain SQLite
/// file as is. A bundle's database replaces the current one only once its
/// checksum matched.
pub fn import_workspace_bundle(in_path: &Path, workspace_path: &Path) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path)
        .with_context(|| format!("failed to create workspace {}", workspace_path.display()))?;
    let dst = workspace_path.join(DB_FILE_NAME);

    if !is_zip_file(in_path)? {
        std::fs::copy(in_path, &dst)
            .with_context(|| format!("failed to copy {} into the workspace", in_path.display()))?;
        return Ok(ImportSummary {
            bundle_format_detected: PLAIN_SQLITE_FORMAT.to_string(),
            bundle_id: None,
        });
    }

    let file = File::open(in_path).with_context(|| format!("failed to open {}", in_path.display()))?;
    let mut archive = ZipArchive::new(file).context("invalid zip archive")?;
    let manifest: Manifest = {
        let entry = archive
            .by_name(MANIFEST_ENTRY)
            .context("bundle missing manifest.json")?;
        serde_json::from_reader(entry).context("manifest.json is invalid")?
    };
    if manifest.format != BUNDLE_FORMAT_V1 {
        bail!("unsupported bundle format: {}", manifest.format);
    }

    let mut db_bytes = Vec::new();
    archive
        .by_name(&manifest.db_entry)
        .with_context(|| format!("bundle missing {}", manifest.db_entry))?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;
    let expected = manifest.db_sha256.to_ascii_lowercase();
    let actual = sha256_hex(&db_bytes);
    if actual != expected {
        bail!("database checksum mismatch: manifest {}, entry {}", expected, actual);
    }

    let staged = workspace_path.join(format!("{}.importing", DB_FILE_NAME));
    std::fs::write(&staged, &db_bytes)
        .with_context(|| format!("failed to write {}", staged.display()))?;
    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| format!("failed to remove {}", dst.display()))?;
    }
    std::fs::rename(&staged, &dst).with_context(|| format!("failed to move database to {}", dst.display()))?;

    Ok(ImportSummary {
        bundle_format_detected: manifest.format,
        bundle_id: manifest.bundle_id,
    })
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut sig = [0u8; 4];
    let mut f = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    match f.read_exact(&mut sig) {
        Ok(()) => Ok(sig == ZIP_MAGIC),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e).context("failed to read file signature"),
    }
}
