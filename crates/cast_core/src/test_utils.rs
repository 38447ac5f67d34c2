//! Shared test fixtures: temporary vaults on a real filesystem.

use tempfile::TempDir;

use crate::fsutil;
use crate::vault::Vault;

/// Create a temporary vault with the given id and seed files.
///
/// Returns the guard keeping the directory alive alongside the opened vault.
pub fn vault_with_files(vault_id: &str, files: &[(&str, &str)]) -> (TempDir, Vault) {
    let dir = TempDir::new().expect("create temp dir");
    let vault = Vault::init(dir.path(), vault_id).expect("init vault");
    for (rel, content) in files {
        write_note(&vault, rel, content);
    }
    (dir, vault)
}

/// Write a file into a vault, creating parent directories.
pub fn write_note(vault: &Vault, rel: &str, content: &str) {
    fsutil::atomic_write(&vault.file_path(rel), content.as_bytes()).expect("write note");
}

/// Read a vault file back as a string.
pub fn read_note(vault: &Vault, rel: &str) -> String {
    std::fs::read_to_string(vault.file_path(rel)).expect("read note")
}
