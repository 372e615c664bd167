use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use super::{BinaryCursor, ByteSource, IndexEntry, Zoom};
use crate::error::{NormalizationError, Result};

/// Normalization scheme applied to raw contact counts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum NormalizationType {
    /// Raw counts, no normalization
    #[default]
    None,
    /// Vanilla coverage
    Vc,
    /// Square-root vanilla coverage
    VcSqrt,
    /// Knight-Ruiz matrix balancing
    Kr,
    /// Genome-wide Knight-Ruiz
    GwKr,
    /// Genome-wide vanilla coverage
    GwVc,
    /// Interchromosomal Knight-Ruiz
    InterKr,
    /// Interchromosomal vanilla coverage
    InterVc,
    /// Matrix scaling
    Scale,
    /// Any other label found in the file
    Other(String),
}
impl NormalizationType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "NONE",
            Self::Vc => "VC",
            Self::VcSqrt => "VC_SQRT",
            Self::Kr => "KR",
            Self::GwKr => "GW_KR",
            Self::GwVc => "GW_VC",
            Self::InterKr => "INTER_KR",
            Self::InterVc => "INTER_VC",
            Self::Scale => "SCALE",
            Self::Other(label) => label,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}
impl From<&str> for NormalizationType {
    fn from(label: &str) -> Self {
        match label {
            "NONE" => Self::None,
            "VC" => Self::Vc,
            "VC_SQRT" => Self::VcSqrt,
            "KR" => Self::Kr,
            "GW_KR" => Self::GwKr,
            "GW_VC" => Self::GwVc,
            "INTER_KR" => Self::InterKr,
            "INTER_VC" => Self::InterVc,
            "SCALE" => Self::Scale,
            other => Self::Other(other.to_string()),
        }
    }
}
impl From<String> for NormalizationType {
    fn from(label: String) -> Self {
        Self::from(label.as_str())
    }
}
impl fmt::Display for NormalizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of one stored normalization vector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormVectorKey {
    pub norm: NormalizationType,
    pub chr_index: u32,
    pub zoom: Zoom,
}
impl NormVectorKey {
    #[must_use]
    pub fn new(norm: NormalizationType, chr_index: u32, zoom: Zoom) -> Self {
        Self {
            norm,
            chr_index,
            zoom,
        }
    }
}
impl fmt::Display for NormVectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.norm, self.chr_index, self.zoom.unit, self.zoom.bin_size
        )
    }
}

/// Per-bin scaling factors for one chromosome at one resolution.
///
/// Entries may be `NaN` for masked bins.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationVector {
    pub key: NormVectorKey,
    pub values: Vec<f64>,
}
impl NormalizationVector {
    #[must_use]
    pub fn new(key: NormVectorKey, values: Vec<f64>) -> Self {
        Self { key, values }
    }

    /// Factor for `bin`; `NaN` when the bin lies outside the vector
    #[must_use]
    pub fn factor(&self, bin: i32) -> f64 {
        usize::try_from(bin)
            .ok()
            .and_then(|idx| self.values.get(idx).copied())
            .unwrap_or(f64::NAN)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Decodes a stored vector (`int32` count followed by that many `f64`).
    ///
    /// Returns `None` when every value is `NaN`.
    pub fn decode(key: NormVectorKey, bytes: &[u8]) -> Result<Option<Self>> {
        let mut cursor = BinaryCursor::new(bytes);
        let num_values = cursor.read_count("normalization vector length")?;
        let mut values = Vec::with_capacity(num_values.min(bytes.len() / 8));
        for _ in 0..num_values {
            values.push(cursor.read_double()?);
        }
        if values.iter().all(|v| v.is_nan()) {
            return Ok(None);
        }
        Ok(Some(Self::new(key, values)))
    }
}

/// Lazy, cached lookup of normalization vectors through the footer index.
///
/// Absent vectors (no index entry, or all values `NaN`) are cached too so a
/// repeated lookup never re-reads the file.
pub struct NormalizationStore {
    index: HashMap<NormVectorKey, IndexEntry>,
    cache: RwLock<HashMap<NormVectorKey, Option<Arc<NormalizationVector>>>>,
}
impl NormalizationStore {
    #[must_use]
    pub fn new(index: HashMap<NormVectorKey, IndexEntry>) -> Self {
        Self {
            index,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Number of vectors listed in the footer index
    #[must_use]
    pub fn num_indexed(&self) -> usize {
        self.index.len()
    }

    /// Number of resolved lookups currently cached (present or absent)
    #[must_use]
    pub fn num_cached(&self) -> usize {
        self.cache.read().len()
    }

    /// Resolves a vector, reading it from `source` on first access.
    ///
    /// [`NormalizationType::None`] always resolves to `None` without a lookup.
    pub fn get<S: ByteSource + ?Sized>(
        &self,
        source: &S,
        norm: &NormalizationType,
        chr_index: u32,
        zoom: Zoom,
    ) -> Result<Option<Arc<NormalizationVector>>> {
        if norm.is_none() {
            return Ok(None);
        }
        let key = NormVectorKey::new(norm.clone(), chr_index, zoom);
        if let Some(cached) = self.cache.read().get(&key) {
            return Ok(cached.clone());
        }

        let vector = match self.index.get(&key) {
            Some(entry) => {
                let bytes = source.read_at(entry.position, entry.size as usize)?;
                let decoded = NormalizationVector::decode(key.clone(), &bytes)?;
                if decoded.is_none() {
                    debug!("Normalization vector {key} is entirely NaN");
                }
                decoded.map(Arc::new)
            }
            None => None,
        };

        // concurrent misses resolve to identical values, last writer wins
        self.cache.write().insert(key, vector.clone());
        Ok(vector)
    }

    /// Like [`Self::get`] but a missing vector is an error
    pub fn require<S: ByteSource + ?Sized>(
        &self,
        source: &S,
        norm: &NormalizationType,
        chr_index: u32,
        zoom: Zoom,
    ) -> Result<Arc<NormalizationVector>> {
        self.get(source, norm, chr_index, zoom)?.ok_or_else(|| {
            NormalizationError::Missing {
                norm: norm.clone(),
                chr_index,
                zoom,
            }
            .into()
        })
    }
}
