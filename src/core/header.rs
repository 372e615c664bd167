use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::{
    BinaryCursor, ByteSource, SourceReader, FILE_MAGIC, MAX_SUPPORTED_VERSION,
    MIN_SUPPORTED_VERSION,
};
use crate::error::{HeaderError, Result};

/// A named sequence of the genome.
///
/// Index `0` is conventionally the whole-genome pseudo-chromosome `All`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chromosome {
    pub index: u32,
    pub name: String,
    pub length: u32,
}
impl Chromosome {
    #[must_use]
    pub fn new(index: u32, name: impl Into<String>, length: u32) -> Self {
        Self {
            index,
            name: name.into(),
            length,
        }
    }

    /// Number of bins this chromosome spans at `bin_size`
    #[must_use]
    pub fn bin_count(&self, bin_size: u32) -> u32 {
        self.length / bin_size.max(1) + 1
    }

    #[must_use]
    pub fn is_whole_genome(&self) -> bool {
        self.name.eq_ignore_ascii_case(crate::CHR_ALL)
    }
}

/// Unit a resolution is measured in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Unit {
    /// Base pairs
    Bp,
    /// Restriction fragments
    Frag,
}
impl Unit {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bp => "BP",
            Self::Frag => "FRAG",
        }
    }
}
impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for Unit {
    type Err = HeaderError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "BP" => Ok(Self::Bp),
            "FRAG" => Ok(Self::Frag),
            other => Err(HeaderError::UnknownUnit(other.to_string())),
        }
    }
}

/// One resolution level: a unit and a bin size.
///
/// Ordered by `(unit, bin_size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Zoom {
    pub unit: Unit,
    pub bin_size: u32,
}
impl Zoom {
    #[must_use]
    pub fn new(unit: Unit, bin_size: u32) -> Self {
        Self { unit, bin_size }
    }
}
impl fmt::Display for Zoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.unit, self.bin_size)
    }
}

/// Location of one chromosome's restriction-site array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentSiteEntry {
    /// Absolute offset of the first site
    pub position: u64,
    /// Number of `int32` sites stored
    pub num_sites: u32,
}

/// The decoded file header.
#[derive(Debug, Clone)]
pub struct FileHeader {
    /// Format version
    pub version: i32,
    /// Absolute offset of the footer (master index)
    pub footer_position: u64,
    /// Genome assembly identifier
    pub genome_id: String,
    /// Free-form key/value attributes (version 5 and later)
    pub attributes: Vec<(String, String)>,
    /// Chromosome dictionary, in file order
    pub chromosomes: Vec<Chromosome>,
    /// Base-pair resolutions, descending by bin size
    pub bp_zooms: Vec<Zoom>,
    /// Fragment resolutions, descending by bin size
    pub frag_zooms: Vec<Zoom>,
    /// Skip-index over the per-chromosome restriction sites
    pub fragment_sites: HashMap<String, FragmentSiteEntry>,
}
impl FileHeader {
    /// Decodes the header from the start of `source`
    pub fn read<S: ByteSource + ?Sized>(source: &S) -> Result<Self> {
        let mut cursor = BinaryCursor::new(SourceReader::new(source, 0).buffered());

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if magic != *FILE_MAGIC {
            let end = magic.iter().position(|&b| b == 0).unwrap_or(magic.len());
            return Err(
                HeaderError::NotThisFormat(String::from_utf8_lossy(&magic[..end]).into_owned())
                    .into(),
            );
        }

        let version = cursor.read_int()?;
        if !(MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION).contains(&version) {
            return Err(HeaderError::UnsupportedVersion(version).into());
        }

        let footer_position = cursor.read_offset("footer position")?;
        let genome_id = cursor.read_string()?;

        let mut attributes = Vec::new();
        if version > 4 {
            let num_attributes = cursor.read_count("attribute count")?;
            attributes.reserve(num_attributes.min(1024));
            for _ in 0..num_attributes {
                let key = cursor.read_string()?;
                let value = cursor.read_string()?;
                attributes.push((key, value));
            }
        }

        let num_chromosomes = cursor.read_count("chromosome count")?;
        let mut chromosomes = Vec::with_capacity(num_chromosomes.min(4096));
        for index in 0..num_chromosomes {
            let name = cursor.read_string()?;
            let length = cursor.read_count("chromosome length")?;
            chromosomes.push(Chromosome::new(index as u32, name, length as u32));
        }

        let bp_zooms = read_zooms(&mut cursor, Unit::Bp)?;
        let frag_zooms = read_zooms(&mut cursor, Unit::Frag)?;

        // restriction sites are only indexed here, their values are read on demand
        let mut fragment_sites = HashMap::new();
        if !frag_zooms.is_empty() {
            for chromosome in &chromosomes {
                let num_sites = cursor.read_count("fragment site count")?;
                let entry = FragmentSiteEntry {
                    position: cursor.position(),
                    num_sites: num_sites as u32,
                };
                fragment_sites.insert(chromosome.name.clone(), entry);
                cursor.skip(num_sites as u64 * 4)?;
            }
        }

        Ok(Self {
            version,
            footer_position,
            genome_id,
            attributes,
            chromosomes,
            bp_zooms,
            frag_zooms,
            fragment_sites,
        })
    }

    /// Returns the attribute value stored under `key`
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn read_zooms<R: std::io::BufRead>(cursor: &mut BinaryCursor<R>, unit: Unit) -> Result<Vec<Zoom>> {
    let num_zooms = cursor.read_count("resolution count")?;
    let mut zooms = Vec::with_capacity(num_zooms.min(256));
    for _ in 0..num_zooms {
        let bin_size = cursor.read_count("bin size")?;
        zooms.push(Zoom::new(unit, bin_size as u32));
    }
    zooms.sort_by(|a, b| b.cmp(a));
    Ok(zooms)
}

/// Reads the restriction-site array described by `entry`
pub(crate) fn read_fragment_sites<S: ByteSource + ?Sized>(
    source: &S,
    entry: FragmentSiteEntry,
) -> Result<Vec<i32>> {
    let bytes = source.read_at(entry.position, entry.num_sites as usize * 4)?;
    let mut cursor = BinaryCursor::with_position(bytes.as_slice(), entry.position);
    (0..entry.num_sites).map(|_| cursor.read_int()).collect()
}
