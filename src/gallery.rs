//! Embedding galleries and where they live.
//!
//! A gallery belongs to one modality and one extraction model. The model
//! tag and vector length are fixed by the first vector stored, and every
//! later vector must agree with both.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{VerifyError, VerifyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Face,
    Voice,
}

impl Modality {
    pub fn file_name(self) -> &'static str {
        match self {
            Modality::Face => "faces.bin",
            Modality::Voice => "voices.bin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingGallery {
    modality: Modality,
    model_version: String,
    dim: Option<usize>,
    identities: BTreeMap<String, Vec<Vec<f32>>>,
}

impl EmbeddingGallery {
    pub fn new(modality: Modality, model_version: impl Into<String>) -> Self {
        Self {
            modality,
            model_version: model_version.into(),
            dim: None,
            identities: BTreeMap::new(),
        }
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.identities.keys().map(String::as_str)
    }

    pub fn vectors(&self, identity: &str) -> Option<&[Vec<f32>]> {
        self.identities.get(identity).map(Vec::as_slice)
    }

    /// Every `(identity, vector)` pair in identity order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.identities
            .iter()
            .flat_map(|(id, vs)| vs.iter().map(move |v| (id.as_str(), v.as_slice())))
    }

    pub fn len(&self) -> usize {
        self.identities.values().map(Vec::len).sum()
    }

    /// Refuse vectors from another model or of the wrong length.
    pub fn check(&self, model_version: &str, vector: &[f32]) -> VerifyResult<()> {
        if model_version != self.model_version {
            return Err(VerifyError::ModelMismatch {
                expected: self.model_version.clone(),
                actual: model_version.to_string(),
            });
        }
        match self.dim {
            Some(dim) if dim != vector.len() => Err(VerifyError::ModelMismatch {
                expected: format!("{} ({dim} dims)", self.model_version),
                actual: format!("{model_version} ({} dims)", vector.len()),
            }),
            _ if vector.is_empty() => Err(VerifyError::EncodingFailed("empty vector".into())),
            _ => Ok(()),
        }
    }

    pub fn push(&mut self, identity: &str, model_version: &str, vector: Vec<f32>) -> VerifyResult<()> {
        self.check(model_version, &vector)?;
        self.dim = Some(vector.len());
        self.identities
            .entry(identity.to_string())
            .or_default()
            .push(vector);
        Ok(())
    }

    /// Store `vector` as the only vector for `identity`.
    pub fn replace(&mut self, identity: &str, model_version: &str, vector: Vec<f32>) -> VerifyResult<()> {
        self.check(model_version, &vector)?;
        self.dim = Some(vector.len());
        self.identities.insert(identity.to_string(), vec![vector]);
        Ok(())
    }

    /// Drop an identity; returns whether it was enrolled.
    pub fn remove(&mut self, identity: &str) -> bool {
        let removed = self.identities.remove(identity).is_some();
        if self.identities.is_empty() {
            self.dim = None;
        }
        removed
    }
}

/// Persistence backend for a gallery.
pub trait GalleryStore: Send + Sync {
    fn load(&self, modality: Modality) -> VerifyResult<Option<EmbeddingGallery>>;
    fn save(&self, gallery: &EmbeddingGallery) -> VerifyResult<()>;
}

/// Galleries kept for the life of the process.
#[derive(Default)]
pub struct MemoryStore {
    galleries: Mutex<BTreeMap<String, EmbeddingGallery>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(modality: Modality) -> String {
    modality.file_name().to_string()
}

impl GalleryStore for MemoryStore {
    fn load(&self, modality: Modality) -> VerifyResult<Option<EmbeddingGallery>> {
        let galleries = self
            .galleries
            .lock()
            .map_err(|_| VerifyError::storage("gallery lock poisoned"))?;
        Ok(galleries.get(&key(modality)).cloned())
    }

    fn save(&self, gallery: &EmbeddingGallery) -> VerifyResult<()> {
        let mut galleries = self
            .galleries
            .lock()
            .map_err(|_| VerifyError::storage("gallery lock poisoned"))?;
        galleries.insert(key(gallery.modality()), gallery.clone());
        Ok(())
    }
}

/// One postcard file per modality under a data directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, modality: Modality) -> PathBuf {
        self.dir.join(modality.file_name())
    }
}

/// Write through a sibling temp file so readers never see a torn file.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

impl GalleryStore for FileStore {
    fn load(&self, modality: Modality) -> VerifyResult<Option<EmbeddingGallery>> {
        let file = self.path(modality);
        if !file.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&file)
            .map_err(|e| VerifyError::storage(format!("reading {}: {e}", file.display())))?;
        let gallery: EmbeddingGallery = postcard::from_bytes(&data)
            .map_err(|e| VerifyError::storage(format!("decoding {}: {e}", file.display())))?;
        if gallery.modality() != modality {
            return Err(VerifyError::storage(format!(
                "{} holds a {:?} gallery",
                file.display(),
                gallery.modality()
            )));
        }
        Ok(Some(gallery))
    }

    fn save(&self, gallery: &EmbeddingGallery) -> VerifyResult<()> {
        let file = self.path(gallery.modality());
        let data = postcard::to_allocvec(gallery).map_err(VerifyError::storage)?;
        write_atomic(&file, &data)
            .map_err(|e| VerifyError::storage(format!("writing {}: {e}", file.display())))?;
        log::debug!("saved {} vector(s) to {}", gallery.len(), file.display());
        Ok(())
    }
}

/// Load the stored gallery, or start an empty one pinned to `model_version`.
pub fn open_gallery(
    store: &dyn GalleryStore,
    modality: Modality,
    model_version: &str,
) -> VerifyResult<EmbeddingGallery> {
    match store.load(modality)? {
        Some(gallery) if gallery.model_version() == model_version => Ok(gallery),
        Some(gallery) if gallery.is_empty() => {
            Ok(EmbeddingGallery::new(modality, model_version))
        }
        Some(gallery) => Err(VerifyError::ModelMismatch {
            expected: gallery.model_version().to_string(),
            actual: model_version.to_string(),
        }),
        None => Ok(EmbeddingGallery::new(modality, model_version)),
    }
}

/// Remove an identity from every stored gallery; returns where it was found.
pub fn purge_identity(store: &dyn GalleryStore, identity: &str) -> VerifyResult<Vec<Modality>> {
    let mut purged = Vec::new();
    for modality in [Modality::Face, Modality::Voice] {
        if let Some(mut gallery) = store.load(modality)? {
            if gallery.remove(identity) {
                store.save(&gallery)?;
                purged.push(modality);
            }
        }
    }
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_vector_pins_dimension() {
        let mut g = EmbeddingGallery::new(Modality::Face, "sface");
        assert!(g.push("alice", "sface", vec![0.1, 0.2, 0.3]).is_ok());
        assert_eq!(g.dim(), Some(3));
        assert!(matches!(
            g.push("bob", "sface", vec![0.1, 0.2]),
            Err(VerifyError::ModelMismatch { .. })
        ));
        assert!(matches!(
            g.push("bob", "arcface", vec![0.1, 0.2, 0.3]),
            Err(VerifyError::ModelMismatch { .. })
        ));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_replace_and_remove() {
        let mut g = EmbeddingGallery::new(Modality::Voice, "mfcc");
        g.push("alice", "mfcc", vec![1.0, 0.0]).ok();
        g.push("alice", "mfcc", vec![0.0, 1.0]).ok();
        assert_eq!(g.vectors("alice").map(|v| v.len()), Some(2));
        g.replace("alice", "mfcc", vec![0.5, 0.5]).ok();
        assert_eq!(g.vectors("alice"), Some(&[vec![0.5, 0.5]][..]));
        assert!(g.remove("alice"));
        assert!(!g.remove("alice"));
        assert!(g.is_empty());
        assert_eq!(g.dim(), None);
    }

    #[test]
    fn test_memory_store_keeps_modalities_apart() -> VerifyResult<()> {
        let store = MemoryStore::new();
        let mut faces = EmbeddingGallery::new(Modality::Face, "sface");
        faces.push("alice", "sface", vec![1.0])?;
        store.save(&faces)?;
        assert!(store.load(Modality::Voice)?.is_none());
        assert_eq!(store.load(Modality::Face)?, Some(faces));
        Ok(())
    }

    #[test]
    fn test_purge_identity_across_modalities() -> VerifyResult<()> {
        let store = MemoryStore::new();
        let mut faces = EmbeddingGallery::new(Modality::Face, "sface");
        faces.push("alice", "sface", vec![1.0])?;
        faces.push("bob", "sface", vec![0.5])?;
        store.save(&faces)?;
        let mut voices = EmbeddingGallery::new(Modality::Voice, "mfcc");
        voices.push("bob", "mfcc", vec![0.5, 0.5])?;
        store.save(&voices)?;

        assert_eq!(purge_identity(&store, "alice")?, vec![Modality::Face]);
        assert_eq!(purge_identity(&store, "bob")?, vec![Modality::Face, Modality::Voice]);
        assert!(purge_identity(&store, "carol")?.is_empty());
        assert!(store.load(Modality::Face)?.map_or(false, |g| g.is_empty()));
        Ok(())
    }

    #[test]
    fn test_open_gallery_refuses_other_model() -> VerifyResult<()> {
        let store = MemoryStore::new();
        let mut faces = EmbeddingGallery::new(Modality::Face, "sface");
        faces.push("alice", "sface", vec![1.0])?;
        store.save(&faces)?;
        assert!(open_gallery(&store, Modality::Face, "sface").is_ok());
        assert!(matches!(
            open_gallery(&store, Modality::Face, "arcface"),
            Err(VerifyError::ModelMismatch { .. })
        ));
        Ok(())
    }
}
