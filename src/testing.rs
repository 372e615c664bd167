//! In-memory fixture files for unit tests

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::{write::ZlibEncoder, Compression};

use crate::core::{ByteSource, SeekableSource, Unit};
use crate::error::Result;

/// Block edge used by the single-block convenience matrices
pub(crate) const FIXTURE_BLOCK_BIN_COUNT: u32 = 1_000;

/// Record layout used when encoding a fixture block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordEncoding {
    /// Plain triples (versions before 7)
    Flat,
    /// Offset rows with float counts
    Rows,
    /// Offset rows with short counts
    ShortRows,
    /// Dense grid with float counts
    Grid,
    /// Dense grid with short counts
    ShortGrid,
}
impl RecordEncoding {
    pub(crate) fn for_version(version: i32) -> Self {
        if version < 7 {
            Self::Flat
        } else {
            Self::Rows
        }
    }
}

trait PutExt: Write {
    fn put_i16(&mut self, v: i16) {
        self.write_i16::<LittleEndian>(v).unwrap();
    }
    fn put_i32(&mut self, v: i32) {
        self.write_i32::<LittleEndian>(v).unwrap();
    }
    fn put_i64(&mut self, v: i64) {
        self.write_i64::<LittleEndian>(v).unwrap();
    }
    fn put_f32(&mut self, v: f32) {
        self.write_f32::<LittleEndian>(v).unwrap();
    }
    fn put_f64(&mut self, v: f64) {
        self.write_f64::<LittleEndian>(v).unwrap();
    }
    fn put_str(&mut self, s: &str) {
        self.write_all(s.as_bytes()).unwrap();
        self.write_all(&[0]).unwrap();
    }
}
impl PutExt for Vec<u8> {}

pub(crate) fn compress(payload: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    encoder.finish().unwrap()
}

/// The fixed prefix of a version 7+ block payload
pub(crate) fn packed_block_header(
    num_records: i32,
    x_offset: i32,
    y_offset: i32,
    short_counts: bool,
    encoding: u8,
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_i32(num_records);
    buf.put_i32(x_offset);
    buf.put_i32(y_offset);
    buf.push(u8::from(!short_counts));
    buf.push(encoding);
    buf
}

/// Uncompressed block payload for `(bin_x, bin_y, count)` records
pub(crate) fn encode_payload(records: &[(i32, i32, f32)], encoding: RecordEncoding) -> Vec<u8> {
    let x_offset = records.iter().map(|r| r.0).min().unwrap_or(0);
    let y_offset = records.iter().map(|r| r.1).min().unwrap_or(0);
    let num_records = records.len() as i32;
    match encoding {
        RecordEncoding::Flat => {
            let mut buf = Vec::new();
            buf.put_i32(num_records);
            for &(x, y, c) in records {
                buf.put_i32(x);
                buf.put_i32(y);
                buf.put_f32(c);
            }
            buf
        }
        RecordEncoding::Rows | RecordEncoding::ShortRows => {
            let short = encoding == RecordEncoding::ShortRows;
            let mut rows: BTreeMap<i32, Vec<(i32, f32)>> = BTreeMap::new();
            for &(x, y, c) in records {
                rows.entry(y).or_default().push((x, c));
            }
            let mut buf = packed_block_header(num_records, x_offset, y_offset, short, 1);
            buf.put_i16(rows.len() as i16);
            for (y, cols) in rows {
                buf.put_i16((y - y_offset) as i16);
                buf.put_i16(cols.len() as i16);
                for (x, c) in cols {
                    buf.put_i16((x - x_offset) as i16);
                    if short {
                        buf.put_i16(c as i16);
                    } else {
                        buf.put_f32(c);
                    }
                }
            }
            buf
        }
        RecordEncoding::Grid | RecordEncoding::ShortGrid => {
            let short = encoding == RecordEncoding::ShortGrid;
            let width = records.iter().map(|r| r.0).max().unwrap_or(0) - x_offset + 1;
            let height = records.iter().map(|r| r.1).max().unwrap_or(0) - y_offset + 1;
            let mut cells = vec![None; (width * height) as usize];
            for &(x, y, c) in records {
                cells[((y - y_offset) * width + (x - x_offset)) as usize] = Some(c);
            }
            let mut buf = packed_block_header(num_records, x_offset, y_offset, short, 2);
            buf.put_i32(cells.len() as i32);
            buf.put_i16(width as i16);
            for cell in cells {
                if short {
                    buf.put_i16(cell.map_or(i16::MIN, |c| c as i16));
                } else {
                    buf.put_f32(cell.unwrap_or(f32::NAN));
                }
            }
            buf
        }
    }
}

/// Compressed block payload for `(bin_x, bin_y, count)` records
pub(crate) fn encode_block(records: &[(i32, i32, f32)], encoding: RecordEncoding) -> Vec<u8> {
    compress(&encode_payload(records, encoding))
}

/// One resolution of a fixture matrix with its compressed blocks
#[derive(Debug, Clone)]
pub(crate) struct FixtureZoom {
    pub unit: Unit,
    pub bin_size: u32,
    pub block_bin_count: u32,
    pub block_column_count: u32,
    pub sum_counts: f32,
    /// Block number -> compressed payload
    pub blocks: BTreeMap<u32, Vec<u8>>,
}
impl FixtureZoom {
    /// Tiles `records` into blocks and encodes each of them
    pub(crate) fn from_records(
        unit: Unit,
        bin_size: u32,
        block_bin_count: u32,
        block_column_count: u32,
        records: &[(i32, i32, f32)],
        encoding: RecordEncoding,
    ) -> Self {
        let mut tiles: BTreeMap<u32, Vec<(i32, i32, f32)>> = BTreeMap::new();
        for &(x, y, c) in records {
            let number =
                (y as u32 / block_bin_count) * block_column_count + x as u32 / block_bin_count;
            tiles.entry(number).or_default().push((x, y, c));
        }
        let blocks = tiles
            .into_iter()
            .map(|(number, tile)| (number, encode_block(&tile, encoding)))
            .collect();
        Self {
            unit,
            bin_size,
            block_bin_count,
            block_column_count,
            sum_counts: records.iter().map(|r| r.2).sum(),
            blocks,
        }
    }

    /// Replaces (or adds) the stored payload of one block
    pub(crate) fn with_block(mut self, number: u32, payload: Vec<u8>) -> Self {
        self.blocks.insert(number, payload);
        self
    }

    /// Replaces the payload of one block with bytes that do not inflate
    pub(crate) fn with_corrupt_block(self, number: u32) -> Self {
        self.with_block(number, b"not a zlib stream".to_vec())
    }
}

/// A chromosome pair and its resolutions
#[derive(Debug, Clone)]
pub(crate) struct FixtureMatrix {
    pub chr1: u32,
    pub chr2: u32,
    pub zooms: Vec<FixtureZoom>,
}

/// Serializes a matrix record given the file offset of every block, in
/// ascending block-number order per zoom.
pub(crate) fn matrix_record_bytes(chr1: u32, chr2: u32, zooms: &[(&FixtureZoom, &[u64])]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_i32(chr1 as i32);
    buf.put_i32(chr2 as i32);
    buf.put_i32(zooms.len() as i32);
    for (zoom, offsets) in zooms {
        buf.put_str(zoom.unit.as_str());
        buf.put_i32(0);
        buf.put_f32(zoom.sum_counts);
        for _ in 0..3 {
            buf.put_f32(0.0);
        }
        buf.put_i32(zoom.bin_size as i32);
        buf.put_i32(zoom.block_bin_count as i32);
        buf.put_i32(zoom.block_column_count as i32);
        buf.put_i32(zoom.blocks.len() as i32);
        for ((number, payload), offset) in zoom.blocks.iter().zip(offsets.iter()) {
            buf.put_i32(*number as i32);
            buf.put_i64(*offset as i64);
            buf.put_i32(payload.len() as i32);
        }
    }
    buf
}

/// One expected-value table
#[derive(Debug, Clone)]
pub(crate) struct FixtureExpected {
    norm: Option<String>,
    unit: Unit,
    bin_size: u32,
    values: Vec<f64>,
    factors: Vec<(i32, f64)>,
}
impl FixtureExpected {
    pub(crate) fn raw(unit: Unit, bin_size: u32, values: &[f64], factors: &[(i32, f64)]) -> Self {
        Self {
            norm: None,
            unit,
            bin_size,
            values: values.to_vec(),
            factors: factors.to_vec(),
        }
    }

    pub(crate) fn normalized(
        norm: &str,
        unit: Unit,
        bin_size: u32,
        values: &[f64],
        factors: &[(i32, f64)],
    ) -> Self {
        Self {
            norm: Some(norm.to_string()),
            ..Self::raw(unit, bin_size, values, factors)
        }
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.put_str(self.unit.as_str());
        buf.put_i32(self.bin_size as i32);
        buf.put_i32(self.values.len() as i32);
        for v in &self.values {
            buf.put_f64(*v);
        }
        buf.put_i32(self.factors.len() as i32);
        for (chr, factor) in &self.factors {
            buf.put_i32(*chr);
            buf.put_f64(*factor);
        }
    }
}

#[derive(Debug, Clone)]
struct FixtureNormVector {
    norm: String,
    chr_index: u32,
    unit: Unit,
    bin_size: u32,
    values: Vec<f64>,
}

/// Assembles a complete file image: header, blocks, matrix records,
/// normalization vectors and footer, in that order.
#[derive(Debug, Clone)]
pub(crate) struct FixtureBuilder {
    version: i32,
    genome: String,
    attributes: Vec<(String, String)>,
    chromosomes: Vec<(String, u32)>,
    bp_resolutions: Vec<u32>,
    frag_resolutions: Vec<u32>,
    fragment_sites: Vec<(String, Vec<i32>)>,
    matrices: Vec<FixtureMatrix>,
    expected: Vec<FixtureExpected>,
    norm_vectors: Vec<FixtureNormVector>,
    normalized_section: bool,
}
impl FixtureBuilder {
    pub(crate) fn new(version: i32) -> Self {
        Self {
            version,
            genome: "test".to_string(),
            attributes: Vec::new(),
            chromosomes: Vec::new(),
            bp_resolutions: Vec::new(),
            frag_resolutions: Vec::new(),
            fragment_sites: Vec::new(),
            matrices: Vec::new(),
            expected: Vec::new(),
            norm_vectors: Vec::new(),
            normalized_section: true,
        }
    }

    pub(crate) fn genome(mut self, genome: &str) -> Self {
        self.genome = genome.to_string();
        self
    }

    pub(crate) fn attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    pub(crate) fn chromosome(mut self, name: &str, length: u32) -> Self {
        self.chromosomes.push((name.to_string(), length));
        self
    }

    pub(crate) fn bp_resolutions(mut self, bin_sizes: &[u32]) -> Self {
        self.bp_resolutions = bin_sizes.to_vec();
        self
    }

    pub(crate) fn frag_resolutions(mut self, bin_sizes: &[u32]) -> Self {
        self.frag_resolutions = bin_sizes.to_vec();
        self
    }

    pub(crate) fn fragment_sites(mut self, chromosome: &str, sites: &[i32]) -> Self {
        self.fragment_sites.push((chromosome.to_string(), sites.to_vec()));
        self
    }

    pub(crate) fn matrix(mut self, matrix: FixtureMatrix) -> Self {
        self.matrices.push(matrix);
        self
    }

    /// Intrachromosomal matrix with one BP resolution stored in a single block
    pub(crate) fn intra_matrix(self, chr: u32, bin_size: u32, records: Vec<(i32, i32, f32)>) -> Self {
        self.matrix_with_zooms(chr, chr, &[bin_size], records)
    }

    /// Matrix holding the same records at every listed BP resolution
    pub(crate) fn matrix_with_zooms(
        self,
        chr1: u32,
        chr2: u32,
        bin_sizes: &[u32],
        records: Vec<(i32, i32, f32)>,
    ) -> Self {
        let encoding = RecordEncoding::for_version(self.version);
        let zooms = bin_sizes
            .iter()
            .map(|&bin_size| {
                FixtureZoom::from_records(
                    Unit::Bp,
                    bin_size,
                    FIXTURE_BLOCK_BIN_COUNT,
                    1,
                    &records,
                    encoding,
                )
            })
            .collect();
        self.matrix(FixtureMatrix { chr1, chr2, zooms })
    }

    pub(crate) fn expected(mut self, expected: FixtureExpected) -> Self {
        self.expected.push(expected);
        self
    }

    pub(crate) fn norm_vector(
        mut self,
        norm: &str,
        chr_index: u32,
        unit: Unit,
        bin_size: u32,
        values: &[f64],
    ) -> Self {
        self.norm_vectors.push(FixtureNormVector {
            norm: norm.to_string(),
            chr_index,
            unit,
            bin_size,
            values: values.to_vec(),
        });
        self
    }

    /// Ends the file right after the length-prefixed footer section
    pub(crate) fn without_normalized_section(mut self) -> Self {
        self.normalized_section = false;
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_header(&mut buf);

        // block payloads, then matrix records pointing at them
        let mut block_offsets: Vec<Vec<Vec<u64>>> = Vec::with_capacity(self.matrices.len());
        for matrix in &self.matrices {
            let mut per_zoom = Vec::with_capacity(matrix.zooms.len());
            for zoom in &matrix.zooms {
                let mut offsets = Vec::with_capacity(zoom.blocks.len());
                for payload in zoom.blocks.values() {
                    offsets.push(buf.len() as u64);
                    buf.extend_from_slice(payload);
                }
                per_zoom.push(offsets);
            }
            block_offsets.push(per_zoom);
        }

        let mut master_index = Vec::with_capacity(self.matrices.len());
        for (matrix, offsets) in self.matrices.iter().zip(&block_offsets) {
            let zooms: Vec<(&FixtureZoom, &[u64])> = matrix
                .zooms
                .iter()
                .zip(offsets.iter())
                .map(|(zoom, offsets)| (zoom, offsets.as_slice()))
                .collect();
            let record = matrix_record_bytes(matrix.chr1, matrix.chr2, &zooms);
            master_index.push((
                format!("{}_{}", matrix.chr1, matrix.chr2),
                buf.len() as u64,
                record.len(),
            ));
            buf.extend_from_slice(&record);
        }

        let mut norm_index = Vec::with_capacity(self.norm_vectors.len());
        for vector in &self.norm_vectors {
            let position = buf.len() as u64;
            buf.put_i32(vector.values.len() as i32);
            for v in &vector.values {
                buf.put_f64(*v);
            }
            norm_index.push((vector, position, buf.len() as u64 - position));
        }

        let footer_position = buf.len() as u64;
        buf[8..16].copy_from_slice(&(footer_position as i64).to_le_bytes());

        let mut section = Vec::new();
        section.put_i32(master_index.len() as i32);
        for (key, position, size) in &master_index {
            section.put_str(key);
            section.put_i64(*position as i64);
            section.put_i32(*size as i32);
        }
        let raw: Vec<&FixtureExpected> = self.expected.iter().filter(|e| e.norm.is_none()).collect();
        section.put_i32(raw.len() as i32);
        for expected in raw {
            expected.write(&mut section);
        }
        buf.put_i32(section.len() as i32);
        buf.extend_from_slice(&section);

        if self.normalized_section && self.version >= 6 {
            let normalized: Vec<&FixtureExpected> =
                self.expected.iter().filter(|e| e.norm.is_some()).collect();
            buf.put_i32(normalized.len() as i32);
            for expected in normalized {
                buf.put_str(expected.norm.as_deref().unwrap_or("NONE"));
                expected.write(&mut buf);
            }
            buf.put_i32(norm_index.len() as i32);
            for (vector, position, size) in norm_index {
                buf.put_str(&vector.norm);
                buf.put_i32(vector.chr_index as i32);
                buf.put_str(vector.unit.as_str());
                buf.put_i32(vector.bin_size as i32);
                buf.put_i64(position as i64);
                buf.put_i32(size as i32);
            }
        }
        buf
    }

    fn write_header(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(crate::FILE_MAGIC);
        buf.put_i32(self.version);
        // footer position, patched once known
        buf.put_i64(0);
        buf.put_str(&self.genome);
        if self.version > 4 {
            buf.put_i32(self.attributes.len() as i32);
            for (key, value) in &self.attributes {
                buf.put_str(key);
                buf.put_str(value);
            }
        }
        buf.put_i32(self.chromosomes.len() as i32);
        for (name, length) in &self.chromosomes {
            buf.put_str(name);
            buf.put_i32(*length as i32);
        }
        for resolutions in [&self.bp_resolutions, &self.frag_resolutions] {
            buf.put_i32(resolutions.len() as i32);
            for bin_size in resolutions {
                buf.put_i32(*bin_size as i32);
            }
        }
        if !self.frag_resolutions.is_empty() {
            for (name, _) in &self.chromosomes {
                let sites = self
                    .fragment_sites
                    .iter()
                    .find(|(chr, _)| chr == name)
                    .map(|(_, sites)| sites.as_slice())
                    .unwrap_or_default();
                buf.put_i32(sites.len() as i32);
                for site in sites {
                    buf.put_i32(*site);
                }
            }
        }
    }
}

/// In-memory source that counts the reads reaching it
pub(crate) struct CountingSource {
    inner: SeekableSource<Cursor<Vec<u8>>>,
    reads: Arc<AtomicUsize>,
}
impl CountingSource {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: SeekableSource::new(Cursor::new(bytes)).unwrap(),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}
impl ByteSource for CountingSource {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_at(offset, len)
    }
}
