use flate2::read::GzDecoder;
use indicatif::ProgressBar;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::debug;

use crate::error::ImportError;

pub mod health_xml;

pub use health_xml::{
    parse, DailyAccumulator, HealthExportParser, ParseStats, ParsedExport, RetentionWindow,
    SkipReason,
};

const READ_BUFFER_SIZE: usize = 256 * 1024;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Trait for the container formats a health export can arrive in
pub trait ImportFormat {
    /// Check if this importer can handle the given file
    fn can_import(&self, file_path: &Path) -> bool;

    /// Wrap the raw file bytes as a buffered XML byte stream
    fn open(&self, input: Box<dyn Read>) -> Box<dyn BufRead>;

    /// Get the format name for this importer
    fn get_format_name(&self) -> &'static str;
}

/// Uncompressed `export.xml`
pub struct XmlImporter;

impl ImportFormat for XmlImporter {
    fn can_import(&self, file_path: &Path) -> bool {
        has_extension(file_path, "xml")
    }

    fn open(&self, input: Box<dyn Read>) -> Box<dyn BufRead> {
        Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, input))
    }

    fn get_format_name(&self) -> &'static str {
        "XML"
    }
}

/// Gzip-compressed export, decompressed on the fly
pub struct GzipXmlImporter;

impl ImportFormat for GzipXmlImporter {
    fn can_import(&self, file_path: &Path) -> bool {
        has_extension(file_path, "gz") || starts_with_gzip_magic(file_path)
    }

    fn open(&self, input: Box<dyn Read>) -> Box<dyn BufRead> {
        let decoder = GzDecoder::new(BufReader::new(input));
        Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, decoder))
    }

    fn get_format_name(&self) -> &'static str {
        "XML (gzip)"
    }
}

fn has_extension(file_path: &Path, wanted: &str) -> bool {
    file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(wanted))
        .unwrap_or(false)
}

fn starts_with_gzip_magic(file_path: &Path) -> bool {
    let mut magic = [0u8; 2];
    File::open(file_path)
        .and_then(|mut file| file.read_exact(&mut magic))
        .map(|()| magic == GZIP_MAGIC)
        .unwrap_or(false)
}

/// Picks the right importer for an export file
pub struct ImportManager {
    importers: Vec<Box<dyn ImportFormat>>,
}

impl ImportManager {
    pub fn new() -> Self {
        // Gzip first: the magic-byte check also catches renamed `.xml` files
        let importers: Vec<Box<dyn ImportFormat>> =
            vec![Box::new(GzipXmlImporter), Box::new(XmlImporter)];

        Self { importers }
    }

    /// Open an export as an XML byte stream
    pub fn open(&self, file_path: &Path) -> Result<Box<dyn BufRead>, ImportError> {
        let importer = self.importer_for(file_path)?;
        debug!(
            path = %file_path.display(),
            format = importer.get_format_name(),
            "opening health export"
        );
        Ok(importer.open(Box::new(open_file(file_path)?)))
    }

    /// Open an export, reporting consumed bytes to a progress bar
    pub fn open_with_progress(
        &self,
        file_path: &Path,
        progress: ProgressBar,
    ) -> Result<Box<dyn BufRead>, ImportError> {
        let importer = self.importer_for(file_path)?;
        let file = open_file(file_path)?;
        if let Ok(metadata) = file.metadata() {
            progress.set_length(metadata.len());
        }

        // Progress counts bytes on disk, which is what the file size measures
        Ok(importer.open(Box::new(ProgressReader::new(file, progress))))
    }

    /// Name of the format that would be used for a file
    pub fn format_name(&self, file_path: &Path) -> Option<&'static str> {
        self.importer_for(file_path)
            .ok()
            .map(|importer| importer.get_format_name())
    }

    fn importer_for(&self, file_path: &Path) -> Result<&dyn ImportFormat, ImportError> {
        if !file_path.is_file() {
            return Err(ImportError::FileNotFound {
                path: file_path.to_path_buf(),
            });
        }

        self.importers
            .iter()
            .find(|importer| importer.can_import(file_path))
            .map(|importer| importer.as_ref())
            .ok_or_else(|| ImportError::UnsupportedFormat {
                path: file_path.to_path_buf(),
            })
    }
}

impl Default for ImportManager {
    fn default() -> Self {
        Self::new()
    }
}

fn open_file(file_path: &Path) -> Result<File, ImportError> {
    File::open(file_path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ImportError::FileNotFound {
            path: file_path.to_path_buf(),
        },
        _ => ImportError::Io(e),
    })
}

/// `Read` adapter that advances a progress bar
pub struct ProgressReader<R> {
    inner: R,
    progress: ProgressBar,
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, progress: ProgressBar) -> Self {
        Self { inner, progress }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.progress.inc(read as u64);
        Ok(read)
    }
}

/// SHA-256 fingerprint of an export file, used to skip unchanged uploads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub hash: String,
    pub file_size: u64,
}

impl FileFingerprint {
    pub fn generate(file_path: &Path) -> Result<Self, ImportError> {
        let mut file = open_file(file_path)?;
        let file_size = file.metadata()?.len();

        let mut hasher = Sha256::new();
        let mut buffer = [0; 8192];

        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self {
            hash: format!("{:x}", hasher.finalize()),
            file_size,
        })
    }
}
