//! Frontend certificates
//!
//! TLS secrets become `<ns>_<name>.pem` bundles (certificate chain then
//! key) in the frontend certificate directory, which the HTTPS binds load
//! as a whole.

use crate::error::ControllerError;
use crate::fs_writer::FsWriter;
use crate::store::types::Secret;
use crate::utils::hash::fnv64a;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const TLS_CRT: &str = "tls.crt";
const TLS_KEY: &str = "tls.key";

/// Certificate files managed by the controller.
#[derive(Debug)]
pub struct Certificates {
    dir: PathBuf,
    /// File name → content hash of what is on disk
    written: BTreeMap<String, u64>,
    /// Files referenced during the current sync
    wanted: BTreeSet<String>,
    changed: bool,
}

impl Certificates {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: BTreeMap::new(),
            wanted: BTreeSet::new(),
            changed: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Forgets the references of the previous sync.
    pub fn clean(&mut self) {
        self.wanted.clear();
        self.changed = false;
    }

    /// True when no certificate is referenced in this sync.
    pub fn is_empty(&self) -> bool {
        self.wanted.is_empty()
    }

    /// Schedules the PEM bundle of `secret` and returns its path.
    pub async fn add_secret(&mut self, secret: &Secret, writer: &FsWriter) -> Result<PathBuf, ControllerError> {
        let id = format!("{}/{}", secret.namespace, secret.name);
        let crt = secret
            .data
            .get(TLS_CRT)
            .ok_or_else(|| ControllerError::Validation(format!("secret {id} has no {TLS_CRT}")))?;
        let key = secret
            .data
            .get(TLS_KEY)
            .ok_or_else(|| ControllerError::Validation(format!("secret {id} has no {TLS_KEY}")))?;

        let mut pem = crt.clone();
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend_from_slice(key);

        let name = format!("{}_{}.pem", secret.namespace, secret.name);
        let path = self.dir.join(&name);
        self.wanted.insert(name.clone());

        let hash = fnv64a(&pem);
        if self.written.get(&name) != Some(&hash) {
            debug!(certificate = %name, "writing certificate");
            self.written.insert(name, hash);
            self.changed = true;
            let target = path.clone();
            writer.write(move || write_file(&target, &pem)).await;
        }
        Ok(path)
    }

    /// Removes certificates no longer referenced. Returns true when the set
    /// of certificates on disk changed during this sync.
    pub async fn refresh(&mut self) -> Result<bool, ControllerError> {
        let stale: Vec<String> = self
            .written
            .keys()
            .filter(|name| !self.wanted.contains(*name))
            .cloned()
            .collect();
        for name in stale {
            info!(certificate = %name, "removing unused certificate");
            if let Err(e) = tokio::fs::remove_file(self.dir.join(&name)).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                return Err(e.into());
            }
            self.written.remove(&name);
            self.changed = true;
        }
        Ok(self.changed)
    }
}

fn write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("pem.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(name: &str, crt: &[u8]) -> Secret {
        Secret {
            namespace: "ns".to_string(),
            name: name.to_string(),
            secret_type: "kubernetes.io/tls".to_string(),
            data: BTreeMap::from([
                (TLS_CRT.to_string(), crt.to_vec()),
                (TLS_KEY.to_string(), b"KEY\n".to_vec()),
            ]),
        }
    }

    #[tokio::test]
    async fn test_bundle_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FsWriter::new();
        let mut certs = Certificates::new(dir.path());

        let path = certs.add_secret(&secret("web", b"CRT"), &writer).await.unwrap();
        writer.wait_until_writes_done().await;
        assert!(certs.refresh().await.unwrap());
        assert_eq!(path, dir.path().join("ns_web.pem"));
        assert_eq!(std::fs::read(&path).unwrap(), b"CRT\nKEY\n");

        certs.clean();
        certs.add_secret(&secret("web", b"CRT"), &writer).await.unwrap();
        assert!(!certs.refresh().await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_certificates_removed() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FsWriter::new();
        let mut certs = Certificates::new(dir.path());
        certs.add_secret(&secret("old", b"CRT"), &writer).await.unwrap();
        writer.wait_until_writes_done().await;
        certs.refresh().await.unwrap();

        certs.clean();
        assert!(certs.is_empty());
        assert!(certs.refresh().await.unwrap());
        assert!(!dir.path().join("ns_old.pem").exists());
    }

    #[tokio::test]
    async fn test_incomplete_secret_rejected() {
        let writer = FsWriter::new();
        let mut certs = Certificates::new("/tmp/certs");
        let mut s = secret("web", b"CRT");
        s.data.remove(TLS_KEY);
        assert!(matches!(
            certs.add_secret(&s, &writer).await,
            Err(ControllerError::Validation(_))
        ));
        assert!(certs.is_empty());
    }
}
