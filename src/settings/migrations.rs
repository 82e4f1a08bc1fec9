//! Ordered schema migrations (spec §4.C). Each migration is a
//! `(target_version, transform)` pair; on load every migration whose
//! target exceeds the stored version runs in order, then the document's
//! `schema_version` is bumped to the latest.

use std::fs;

use serde_json::{Map, Value};

use crate::settings::store::SettingsDocument;

pub struct Migration {
    pub target_version: u32,
    pub description: &'static str,
    pub apply: fn(&mut SettingsDocument),
}

/// Splits a monolithic `.clopignore` file found in any configured watch
/// directory into per-type `.clopignore-images` / `.clopignore-videos`
/// files. Grounded in the teacher's directory-scoped ignore-file handling;
/// this is the one built-in migration spec §4.C calls out by name.
fn split_clopignore_files(doc: &mut SettingsDocument) {
    let mut dirs: Vec<String> = Vec::new();
    for key in ["ImageDirs", "VideoDirs", "PdfDirs"] {
        if let Some(Value::Array(arr)) = doc.values.get(key) {
            for v in arr {
                if let Some(s) = v.as_str() {
                    dirs.push(s.to_string());
                }
            }
        }
    }
    for dir in dirs {
        let legacy = std::path::Path::new(&dir).join(".clopignore");
        let Ok(contents) = fs::read_to_string(&legacy) else {
            continue;
        };
        let images_path = std::path::Path::new(&dir).join(".clopignore-images");
        let videos_path = std::path::Path::new(&dir).join(".clopignore-videos");
        let _ = fs::write(&images_path, &contents);
        let _ = fs::write(&videos_path, &contents);
        let _ = fs::remove_file(&legacy);
    }
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    target_version: 2,
    description: "split monolithic .clopignore into per-type ignore files",
    apply: split_clopignore_files,
}];

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Apply every migration whose target exceeds `doc.schema_version`, in
/// ascending order, then bump the stored version to the latest. Unknown
/// keys already present in `doc.values` are left untouched — migrations
/// only ever add or reshape specific known keys.
pub fn migrate(doc: &mut SettingsDocument) {
    for migration in MIGRATIONS {
        if migration.target_version > doc.schema_version {
            (migration.apply)(doc);
            doc.schema_version = migration.target_version;
        }
    }
    if doc.schema_version < CURRENT_SCHEMA_VERSION {
        doc.schema_version = CURRENT_SCHEMA_VERSION;
    }
}

pub fn hydrate_defaults() -> Map<String, Value> {
    let mut map = Map::new();
    for name in crate::settings::keys::ALL_KEY_NAMES {
        if let Some(value) = crate::settings::keys::default_json_for(name) {
            map.insert((*name).to_string(), value);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_bumps_version_to_current() {
        let mut doc = SettingsDocument {
            schema_version: 0,
            values: Map::new(),
        };
        migrate(&mut doc);
        assert_eq!(doc.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn migrate_is_noop_when_already_current() {
        let mut doc = SettingsDocument {
            schema_version: CURRENT_SCHEMA_VERSION,
            values: Map::new(),
        };
        migrate(&mut doc);
        assert_eq!(doc.schema_version, CURRENT_SCHEMA_VERSION);
    }
}
