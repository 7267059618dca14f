//! Routing map files
//!
//! Every map is an ordered set of `key\t\t\tvalue` rows. A refresh renders
//! each map, compares the FNV-64a hash of the content with the previous
//! snapshot and rewrites only the files whose hash changed.

use crate::error::ControllerError;
use crate::utils::hash::fnv64a;
use haproxy_client::write_atomic;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Hosts served, read into `txn.host_match`.
pub const HOST: &str = "host";
/// SSL passthrough SNI to backend.
pub const SNI: &str = "sni";
/// `host+path` to backend, exact lookups.
pub const PATH_EXACT: &str = "path-exact";
/// `host+path` to backend, prefix lookups, longest key first.
pub const PATH_PREFIX: &str = "path-prefix";

/// Maps created on startup and kept on disk even when empty.
pub const PERSISTENT_MAPS: [&str; 4] = [HOST, SNI, PATH_EXACT, PATH_PREFIX];

const ROW_SEPARATOR: &str = "\t\t\t";

#[derive(Debug, Default)]
struct MapFile {
    rows: BTreeSet<(String, String)>,
    hash: Option<u64>,
    persistent: bool,
    /// HAProxy read the file at its last start or reload
    loaded: bool,
    /// Rows are emitted in descending key order
    descending: bool,
}

impl MapFile {
    fn ordered_rows(&self) -> Vec<(String, String)> {
        if self.descending {
            self.rows.iter().rev().cloned().collect()
        } else {
            self.rows.iter().cloned().collect()
        }
    }

    fn content(&self) -> String {
        let mut content = String::new();
        for (key, value) in self.ordered_rows() {
            content.push_str(&key);
            content.push_str(ROW_SEPARATOR);
            content.push_str(&value);
            content.push('\n');
        }
        content
    }
}

/// A map whose content changed while already loaded by HAProxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedMap {
    pub name: String,
    pub path: PathBuf,
    pub rows: Vec<(String, String)>,
}

/// Outcome of [`MapFiles::refresh`].
#[derive(Debug, Default)]
pub struct MapRefresh {
    /// Maps that can be updated through the runtime socket
    pub changed: Vec<ChangedMap>,
    /// A map was created or removed: HAProxy must reload to see it
    pub reload: bool,
}

/// Store of every routing map of the controller.
#[derive(Debug)]
pub struct MapFiles {
    dir: PathBuf,
    maps: BTreeMap<String, MapFile>,
}

impl MapFiles {
    /// Map store writing under `dir`, the persistent maps already declared.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let maps = PERSISTENT_MAPS
            .iter()
            .map(|name| {
                let map = MapFile {
                    persistent: true,
                    descending: *name == PATH_PREFIX,
                    ..Default::default()
                };
                ((*name).to_string(), map)
            })
            .collect();
        Self { dir: dir.into(), maps }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the map file named `name`.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.map"))
    }

    /// Path as it appears in the HAProxy configuration.
    pub fn path_str(&self, name: &str) -> String {
        self.path(name).to_string_lossy().into_owned()
    }

    /// Writes the persistent maps, empty, so the first configuration can
    /// reference them.
    pub async fn init(&mut self) -> Result<(), ControllerError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        for name in PERSISTENT_MAPS {
            let path = self.path(name);
            if let Some(map) = self.maps.get_mut(name) {
                let content = map.content();
                write_atomic(&path, content.as_bytes()).await?;
                map.hash = Some(fnv64a(content.as_bytes()));
            }
        }
        Ok(())
    }

    /// Drops every row. Called at the start of a sync.
    pub fn clean(&mut self) {
        for map in self.maps.values_mut() {
            map.rows.clear();
        }
    }

    /// Adds a row to map `name`, creating the map when missing. A row added
    /// twice is kept once.
    pub fn append(&mut self, name: &str, key: impl Into<String>, value: impl Into<String>) {
        self.maps
            .entry(name.to_string())
            .or_default()
            .rows
            .insert((key.into(), value.into()));
    }

    /// Rows of a map in file order.
    pub fn rows(&self, name: &str) -> Vec<(String, String)> {
        self.maps.get(name).map(MapFile::ordered_rows).unwrap_or_default()
    }

    /// Rendered file content of a map.
    pub fn content(&self, name: &str) -> String {
        self.maps.get(name).map(MapFile::content).unwrap_or_default()
    }

    /// Writes the maps whose content hash changed since the last refresh.
    pub async fn refresh(&mut self) -> Result<MapRefresh, ControllerError> {
        let mut outcome = MapRefresh::default();
        let mut removed = Vec::new();
        let names: Vec<String> = self.maps.keys().cloned().collect();

        for name in names {
            let path = self.path(&name);
            let Some(map) = self.maps.get_mut(&name) else {
                continue;
            };
            let content = map.content();
            let hash = fnv64a(content.as_bytes());
            if map.hash == Some(hash) {
                continue;
            }

            if map.rows.is_empty() && !map.persistent {
                debug!(map = %name, "removing empty map");
                if let Err(e) = tokio::fs::remove_file(&path).await
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    return Err(e.into());
                }
                removed.push(name);
                outcome.reload = true;
                continue;
            }

            write_atomic(&path, content.as_bytes()).await?;
            map.hash = Some(hash);
            if map.loaded {
                outcome.changed.push(ChangedMap {
                    name: name.clone(),
                    path,
                    rows: map.ordered_rows(),
                });
            } else {
                info!(map = %name, "new map file, reload required");
                outcome.reload = true;
            }
        }

        for name in removed {
            self.maps.remove(&name);
        }
        Ok(outcome)
    }

    /// Marks every map on disk as loaded. Called after a start or reload.
    pub fn mark_loaded(&mut self) {
        for map in self.maps.values_mut() {
            if map.hash.is_some() {
                map.loaded = true;
            }
        }
    }
}
