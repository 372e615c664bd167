use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, error, info};
use parking_lot::RwLock;

use crate::cache::BlockCache;
use crate::config::ReaderConfig;
use crate::core::{
    read_fragment_sites, BlockCodec, ByteSource, Chromosome, ContactRecord,
    ExpectedValueFunction, FileHeader, Footer, IndexEntry, MatrixKey, MatrixRecord, MmapSource,
    NormalizationStore, NormalizationType, SeekableSource, Unit, Zoom,
};
use crate::error::{HeaderError, QueryError, Result};
use crate::zoom::MatrixZoomData;

/// State shared by a dataset and every matrix handed out from it
pub(crate) struct Shared {
    pub(crate) source: Box<dyn ByteSource>,
    pub(crate) codec: BlockCodec,
    pub(crate) normalization: NormalizationStore,
    pub(crate) block_cache: BlockCache,
    num_threads: AtomicUsize,
}
impl Shared {
    pub(crate) fn num_threads(&self) -> usize {
        self.num_threads.load(Ordering::Relaxed)
    }
}

/// All resolutions of one chromosome pair
pub struct Matrix {
    key: MatrixKey,
    chr1: Chromosome,
    chr2: Chromosome,
    zooms: Vec<Arc<MatrixZoomData>>,
}
impl Matrix {
    #[must_use]
    pub fn key(&self) -> MatrixKey {
        self.key
    }

    #[must_use]
    pub fn chr1(&self) -> &Chromosome {
        &self.chr1
    }

    #[must_use]
    pub fn chr2(&self) -> &Chromosome {
        &self.chr2
    }

    #[must_use]
    pub fn is_intra(&self) -> bool {
        self.key.is_intra()
    }

    /// Resolutions in file order
    #[must_use]
    pub fn zooms(&self) -> &[Arc<MatrixZoomData>] {
        &self.zooms
    }

    #[must_use]
    pub fn zoom_data(&self, zoom: &Zoom) -> Option<Arc<MatrixZoomData>> {
        self.zooms.iter().find(|zd| zd.zoom() == *zoom).cloned()
    }

    /// Like [`Self::zoom_data`] but an unknown resolution is an error
    pub fn require_zoom_data(&self, zoom: &Zoom) -> Result<Arc<MatrixZoomData>> {
        self.zoom_data(zoom)
            .ok_or_else(|| QueryError::UnknownZoom(*zoom).into())
    }
}

/// An opened contact-matrix file.
///
/// Header and footer are decoded once when opening. Matrices are read on
/// first access and kept for the lifetime of the dataset; blocks go through
/// a bounded cache shared by all matrices.
pub struct Dataset {
    header: FileHeader,
    master_index: HashMap<MatrixKey, IndexEntry>,
    expected_values: HashMap<(Zoom, NormalizationType), ExpectedValueFunction>,
    normalization_types: Vec<NormalizationType>,
    shared: Arc<Shared>,
    matrices: RwLock<HashMap<MatrixKey, Option<Arc<Matrix>>>>,
    fragment_sites: RwLock<HashMap<String, Arc<Vec<i32>>>>,
}
impl Dataset {
    /// Opens a file with the default [`ReaderConfig`]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ReaderConfig::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, config: ReaderConfig) -> Result<Self> {
        if config.use_mmap {
            Self::from_source(MmapSource::new(path)?, config)
        } else {
            Self::from_source(SeekableSource::open(path)?, config)
        }
    }

    /// Reads the header and footer from any backing store
    pub fn from_source<S: ByteSource + 'static>(source: S, config: ReaderConfig) -> Result<Self> {
        let header = FileHeader::read(&source)?;
        info!("HiC file version: {}", header.version);

        let footer = Footer::read(&source, header.footer_position, header.version)?;
        debug!(
            "Indexed {} matrices and {} normalization vectors",
            footer.master_index.len(),
            footer.norm_vector_index.len()
        );

        let shared = Shared {
            source: Box::new(source),
            codec: BlockCodec::for_version(header.version),
            normalization: NormalizationStore::new(footer.norm_vector_index),
            block_cache: BlockCache::from_config(&config),
            num_threads: AtomicUsize::new(config.num_threads),
        };
        Ok(Self {
            header,
            master_index: footer.master_index,
            expected_values: footer.expected_values,
            normalization_types: footer.normalization_types,
            shared: Arc::new(shared),
            matrices: RwLock::new(HashMap::new()),
            fragment_sites: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    #[must_use]
    pub fn version(&self) -> i32 {
        self.header.version
    }

    #[must_use]
    pub fn genome_id(&self) -> &str {
        &self.header.genome_id
    }

    #[must_use]
    pub fn attributes(&self) -> &[(String, String)] {
        &self.header.attributes
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.header.attribute(key)
    }

    /// Chromosome dictionary, in file order
    #[must_use]
    pub fn chromosomes(&self) -> &[Chromosome] {
        &self.header.chromosomes
    }

    #[must_use]
    pub fn chromosome(&self, name: &str) -> Option<&Chromosome> {
        self.header.chromosomes.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn chromosome_by_index(&self, index: u32) -> Option<&Chromosome> {
        self.header.chromosomes.get(index as usize)
    }

    /// Base-pair resolutions, coarsest first
    #[must_use]
    pub fn bp_zooms(&self) -> &[Zoom] {
        &self.header.bp_zooms
    }

    /// Fragment resolutions, coarsest first
    #[must_use]
    pub fn frag_zooms(&self) -> &[Zoom] {
        &self.header.frag_zooms
    }

    fn zooms_for(&self, unit: Unit) -> &[Zoom] {
        match unit {
            Unit::Bp => &self.header.bp_zooms,
            Unit::Frag => &self.header.frag_zooms,
        }
    }

    /// The `index`-th resolution of `unit`, coarsest first
    #[must_use]
    pub fn zoom(&self, unit: Unit, index: usize) -> Option<Zoom> {
        self.zooms_for(unit).get(index).copied()
    }

    #[must_use]
    pub fn num_zooms(&self, unit: Unit) -> usize {
        self.zooms_for(unit).len()
    }

    /// Normalization types with stored vectors; raw counts are always available
    #[must_use]
    pub fn normalization_types(&self) -> &[NormalizationType] {
        &self.normalization_types
    }

    #[must_use]
    pub fn expected_values(
        &self,
        zoom: Zoom,
        norm: &NormalizationType,
    ) -> Option<&ExpectedValueFunction> {
        self.expected_values.get(&(zoom, norm.clone()))
    }

    /// Number of restriction sites stored for `chromosome`
    #[must_use]
    pub fn fragment_site_count(&self, chromosome: &str) -> Option<u32> {
        self.header
            .fragment_sites
            .get(chromosome)
            .map(|entry| entry.num_sites)
    }

    /// Restriction-site positions of `chromosome`, read on first access
    pub fn fragment_sites(&self, chromosome: &str) -> Result<Option<Arc<Vec<i32>>>> {
        let Some(entry) = self.header.fragment_sites.get(chromosome) else {
            return Ok(None);
        };
        if let Some(sites) = self.fragment_sites.read().get(chromosome) {
            return Ok(Some(sites.clone()));
        }
        let sites = Arc::new(read_fragment_sites(self.shared.source.as_ref(), *entry)?);
        self.fragment_sites
            .write()
            .insert(chromosome.to_string(), sites.clone());
        Ok(Some(sites))
    }

    /// Returns the matrix of a chromosome pair, in either order.
    ///
    /// A pair without stored data yields `None`, and so does a matrix record
    /// that fails to decode; the failure is logged.
    pub fn get_matrix(&self, chr1: &Chromosome, chr2: &Chromosome) -> Option<Arc<Matrix>> {
        self.matrix_by_index(chr1.index, chr2.index)
    }

    pub fn matrix_by_index(&self, chr1: u32, chr2: u32) -> Option<Arc<Matrix>> {
        let key = MatrixKey::new(chr1, chr2);
        if let Some(matrix) = self.matrices.read().get(&key) {
            return matrix.clone();
        }
        match self.read_matrix(key) {
            Ok(matrix) => {
                let matrix = matrix.map(Arc::new);
                self.matrices.write().insert(key, matrix.clone());
                matrix
            }
            Err(e) => {
                error!("Error reading matrix {key}: {e}");
                None
            }
        }
    }

    fn read_matrix(&self, key: MatrixKey) -> Result<Option<Matrix>> {
        let Some(entry) = self.master_index.get(&key) else {
            return Ok(None);
        };
        let bytes = self
            .shared
            .source
            .read_at(entry.position, entry.size as usize)?;
        let record = MatrixRecord::decode(&bytes, entry.position)?;

        let lookup = |index: i32| {
            u32::try_from(index)
                .ok()
                .and_then(|i| self.chromosome_by_index(i))
                .cloned()
                .ok_or(HeaderError::UnknownChromosome(index))
        };
        let chr1 = lookup(record.chr1)?;
        let chr2 = lookup(record.chr2)?;

        let zooms = record
            .zooms
            .into_iter()
            .map(|meta| {
                Arc::new(MatrixZoomData::new(
                    key,
                    chr1.clone(),
                    chr2.clone(),
                    meta,
                    self.shared.clone(),
                ))
            })
            .collect();
        Ok(Some(Matrix {
            key,
            chr1,
            chr2,
            zooms,
        }))
    }

    /// Raw records of every chromosome pair at `zoom`, shifted onto one
    /// genome-wide axis.
    ///
    /// Each chromosome occupies `length / bin_size + 1` bins of the axis, in
    /// dictionary order; the whole-genome pseudo-chromosome is skipped.
    pub fn whole_genome_records(&self, zoom: Zoom, include_intra: bool) -> Result<Vec<ContactRecord>> {
        let chromosomes: Vec<&Chromosome> = self
            .chromosomes()
            .iter()
            .filter(|c| !c.is_whole_genome())
            .collect();

        let mut offsets = HashMap::with_capacity(chromosomes.len());
        let mut offset = 0i32;
        for chromosome in &chromosomes {
            offsets.insert(chromosome.index, offset);
            offset += chromosome.bin_count(zoom.bin_size) as i32;
        }

        let mut records = Vec::new();
        for (i, chr1) in chromosomes.iter().enumerate() {
            for chr2 in &chromosomes[i..] {
                if chr1.index == chr2.index && !include_intra {
                    continue;
                }
                let Some(matrix) = self.get_matrix(chr1, chr2) else {
                    continue;
                };
                let Some(zd) = matrix.zoom_data(&zoom) else {
                    continue;
                };
                let x_offset = offsets[&zd.chr1().index];
                let y_offset = offsets[&zd.chr2().index];
                for record in zd.iter() {
                    let record = record?;
                    records.push(ContactRecord::new(
                        record.bin_x + x_offset,
                        record.bin_y + y_offset,
                        record.count,
                    ));
                }
            }
        }
        Ok(records)
    }

    /// Enables or disables the block cache; disabling drops cached blocks
    pub fn set_use_block_cache(&self, enabled: bool) {
        self.shared.block_cache.set_enabled(enabled);
    }

    /// Worker threads used by range queries (0 means all cores)
    pub fn set_num_threads(&self, num_threads: usize) {
        self.shared.num_threads.store(num_threads, Ordering::Relaxed);
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.shared.num_threads()
    }

    pub fn clear_block_cache(&self) {
        self.shared.block_cache.clear();
    }

    #[must_use]
    pub fn block_cache_len(&self) -> usize {
        self.shared.block_cache.len()
    }
}
