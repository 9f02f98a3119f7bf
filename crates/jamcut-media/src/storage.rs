// crates/jamcut-media/src/storage.rs
//
// Flat keyed blob store. One blob per clip id, written exactly once by the
// recorder (or an import), then read-only; every reader opens an
// independent view. Writes stream through a temp file in the store
// directory and land with an atomic rename, so readers never observe a
// half-written blob.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Directory-backed store, addressed by clip id.
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create blob store at {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of a clip's blob. The `.mp4` suffix lets the
    /// demuxing layer guess the container without probing twice.
    pub fn blob_path(&self, clip_id: Uuid) -> PathBuf {
        self.root.join(format!("{clip_id}.mp4"))
    }

    pub fn exists(&self, clip_id: Uuid) -> bool {
        self.blob_path(clip_id).is_file()
    }

    /// Open an independent read view of a blob.
    pub fn read(&self, clip_id: Uuid) -> Result<File> {
        let path = self.blob_path(clip_id);
        File::open(&path).with_context(|| format!("open blob {clip_id}"))
    }

    /// Resolve a blob to its path, failing when it does not exist.
    /// Demuxers open the file themselves from this.
    pub fn resolve(&self, clip_id: Uuid) -> Result<PathBuf> {
        let path = self.blob_path(clip_id);
        if !path.is_file() {
            return Err(anyhow!("no blob stored for clip {clip_id}"));
        }
        Ok(path)
    }

    /// Begin a streaming write for `clip_id`. Blobs are write-once:
    /// starting a writer for an existing key fails.
    pub fn writer(&self, clip_id: Uuid) -> Result<BlobWriter> {
        if self.exists(clip_id) {
            return Err(anyhow!("blob {clip_id} already stored"));
        }
        let tmp = NamedTempFile::new_in(&self.root)
            .context("create blob temp file")?;
        Ok(BlobWriter {
            tmp: Some(tmp),
            dest: self.blob_path(clip_id),
            bytes: 0,
        })
    }

    /// Adopt an already-written file as the blob for `clip_id` (rename into
    /// place). Used by the muxer, which needs a real path to encode into.
    pub fn adopt(&self, clip_id: Uuid, path: &Path) -> Result<()> {
        if self.exists(clip_id) {
            return Err(anyhow!("blob {clip_id} already stored"));
        }
        std::fs::rename(path, self.blob_path(clip_id))
            .with_context(|| format!("adopt blob {clip_id}"))?;
        eprintln!("[storage] blob stored ← {clip_id}");
        Ok(())
    }

    pub fn delete(&self, clip_id: Uuid) -> Result<()> {
        std::fs::remove_file(self.blob_path(clip_id))
            .with_context(|| format!("delete blob {clip_id}"))
    }

    /// Every clip id currently stored, in no particular order.
    pub fn list(&self) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root).context("list blob store")? {
            let path = entry?.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(id) = stem.parse::<Uuid>() {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

/// Streaming write handle. Bytes accumulate in a temp file; `finish`
/// renames it into place, making the blob visible to readers atomically.
pub struct BlobWriter {
    tmp:   Option<NamedTempFile>,
    dest:  PathBuf,
    bytes: u64,
}

impl BlobWriter {
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Publish the blob. Dropping the writer without calling this discards
    /// the temp file and leaves the store untouched.
    pub fn finish(mut self) -> Result<()> {
        let tmp = self.tmp.take().ok_or_else(|| anyhow!("writer already finished"))?;
        tmp.persist(&self.dest)
            .map_err(|e| anyhow!("persist blob to {}: {e}", self.dest.display()))?;
        eprintln!("[storage] blob stored ({} bytes) ← {}", self.bytes, self.dest.display());
        Ok(())
    }
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let tmp = self
            .tmp
            .as_mut()
            .ok_or_else(|| std::io::Error::other("writer already finished"))?;
        let n = tmp.write(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.tmp.as_mut() {
            Some(tmp) => tmp.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn store() -> (BlobStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (BlobStore::open(dir.path()).unwrap(), dir)
    }

    #[test]
    fn write_then_read_round_trip() {
        let (store, _dir) = store();
        let id = Uuid::new_v4();

        let mut w = store.writer(id).unwrap();
        w.write_all(b"hello blob").unwrap();
        assert_eq!(w.bytes_written(), 10);
        w.finish().unwrap();

        let mut body = String::new();
        store.read(id).unwrap().read_to_string(&mut body).unwrap();
        assert_eq!(body, "hello blob");
        assert!(store.exists(id));
    }

    #[test]
    fn unfinished_writer_leaves_no_blob() {
        let (store, _dir) = store();
        let id = Uuid::new_v4();
        {
            let mut w = store.writer(id).unwrap();
            w.write_all(b"partial").unwrap();
            // dropped without finish()
        }
        assert!(!store.exists(id));
        assert!(store.read(id).is_err());
    }

    #[test]
    fn blobs_are_write_once() {
        let (store, _dir) = store();
        let id = Uuid::new_v4();
        let mut w = store.writer(id).unwrap();
        w.write_all(b"first").unwrap();
        w.finish().unwrap();

        assert!(store.writer(id).is_err());
    }

    #[test]
    fn concurrent_readers_see_independent_positions() {
        let (store, _dir) = store();
        let id = Uuid::new_v4();
        let mut w = store.writer(id).unwrap();
        w.write_all(b"abcdef").unwrap();
        w.finish().unwrap();

        let mut r1 = store.read(id).unwrap();
        let mut r2 = store.read(id).unwrap();
        let mut a = [0u8; 3];
        r1.read_exact(&mut a).unwrap();
        let mut b = [0u8; 6];
        r2.read_exact(&mut b).unwrap();
        assert_eq!(&a, b"abc");
        assert_eq!(&b, b"abcdef");
    }

    #[test]
    fn list_and_delete() {
        let (store, _dir) = store();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        for id in [a, b] {
            let mut w = store.writer(id).unwrap();
            w.write_all(b"x").unwrap();
            w.finish().unwrap();
        }

        let mut ids = store.list().unwrap();
        ids.sort();
        let mut want = vec![a, b];
        want.sort();
        assert_eq!(ids, want);

        store.delete(a).unwrap();
        assert!(!store.exists(a));
        assert_eq!(store.list().unwrap(), vec![b]);
    }
}
