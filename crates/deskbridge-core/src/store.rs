//! JSON snapshot persistence for [`MappingTable`].

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::CoreError;
use crate::mapping::MappingTable;

/// Reads the tenant's mapping snapshot.
///
/// A missing or corrupt file yields an empty table; the next save replaces it.
pub fn load_mapping(path: &Path) -> MappingTable {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "mapping file not found; starting with an empty table");
            return MappingTable::new();
        }
        Err(error) => {
            warn!(path = %path.display(), error = %error, "mapping file unreadable; starting with an empty table");
            return MappingTable::new();
        }
    };

    match serde_json::from_str::<MappingTable>(&raw) {
        Ok(table) => {
            debug!(path = %path.display(), records = table.len(), "loaded mapping table");
            table
        }
        Err(error) => {
            warn!(path = %path.display(), error = %error, "mapping file corrupt; starting with an empty table");
            MappingTable::new()
        }
    }
}

/// Writes the whole table through a sibling temp file and a rename.
pub fn save_mapping(path: &Path, table: &MappingTable) -> Result<(), CoreError> {
    let bytes = serde_json::to_vec_pretty(table).map_err(|error| {
        CoreError::persistence(format!("failed to serialize mapping table: {error}"))
    })?;

    let tmp_path = path.with_extension("json.tmp");
    let write_result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    write_result.map_err(|error| {
        let _ = fs::remove_file(&tmp_path);
        CoreError::persistence(format!(
            "failed to write mapping table to {}: {error}",
            path.display()
        ))
    })
}
