//! Directory-backed data source: one row per file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use super::{ConversionError, DataSource, DataSourceError, DataSourceFactory};
use crate::domain::{ColumnType, ColumnTypeMapping};

/// Column holding each file's path
pub const PATH_COLUMN: &str = "path";

/// Column holding each file's contents
pub const FILE_COLUMN: &str = "file";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tif", "tiff"];

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Name-based uuid of a canonical folder path, stable across runs and builds
pub fn folder_uid(root: &Path) -> String {
    let url = format!("file://{}", root.display());
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()).to_string()
}

/// Every regular file below a directory, sorted by path
#[derive(Debug)]
pub struct FolderDataSource {
    root: PathBuf,
    reference: String,
    uid: String,
    files: Vec<PathBuf>,
}

impl FolderDataSource {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, DataSourceError> {
        let root = root.as_ref();
        debug!(root = %root.display(), "FolderDataSource::open: called");
        if !root.is_dir() {
            return Err(DataSourceError::NotFound(root.display().to_string()));
        }
        let root = root.canonicalize()?;

        let mut files: Vec<PathBuf> = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();

        let uid = folder_uid(&root);

        info!(root = %root.display(), rows = files.len(), %uid, "Opened folder dataset");
        Ok(Self {
            reference: root.display().to_string(),
            root,
            uid,
            files,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file(&self, column: &str, row: usize) -> Result<&PathBuf, ConversionError> {
        self.files.get(row).ok_or_else(|| ConversionError::RowOutOfRange {
            column: column.to_string(),
            row,
        })
    }

    fn read_file(&self, path: &Path, column: &str, row: usize, dtype: ColumnType) -> Result<Vec<u8>, ConversionError> {
        std::fs::read(path).map_err(|e| ConversionError::Unreadable {
            column: column.to_string(),
            row,
            dtype,
            reason: e.to_string(),
        })
    }
}

impl DataSource for FolderDataSource {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn reference(&self) -> &str {
        &self.reference
    }

    fn len(&self) -> usize {
        self.files.len()
    }

    fn column_names(&self) -> Vec<String> {
        vec![FILE_COLUMN.to_string(), PATH_COLUMN.to_string()]
    }

    fn guess_dtypes(&self) -> ColumnTypeMapping {
        let all_images = !self.files.is_empty() && self.files.iter().all(|p| has_image_extension(p));
        let file_type = if all_images { ColumnType::Image } else { ColumnType::Blob };
        ColumnTypeMapping::from([
            (PATH_COLUMN.to_string(), ColumnType::Str),
            (FILE_COLUMN.to_string(), file_type),
        ])
    }

    fn get_cell_data(&self, column: &str, row: usize, dtype: ColumnType) -> Result<Vec<u8>, ConversionError> {
        match column {
            FILE_COLUMN => {
                let path = self.file(column, row)?;
                if !dtype.is_file_based() {
                    return Err(ConversionError::Unreadable {
                        column: column.to_string(),
                        row,
                        dtype,
                        reason: "file contents are not a scalar value".to_string(),
                    });
                }
                self.read_file(path, column, row, dtype)
            }
            PATH_COLUMN => {
                let path = self.file(column, row)?;
                if dtype.is_file_based() {
                    // A path column declared as a file type resolves to the file itself
                    self.read_file(path, column, row, dtype)
                } else {
                    Ok(path.display().to_string().into_bytes())
                }
            }
            _ => Err(ConversionError::UnknownColumn {
                column: column.to_string(),
            }),
        }
    }
}

/// Opens directory references as [`FolderDataSource`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FolderSourceFactory;

impl DataSourceFactory for FolderSourceFactory {
    fn create(&self, reference: &str) -> Result<Arc<dyn DataSource>, DataSourceError> {
        debug!(%reference, "FolderSourceFactory::create: called");
        let path = Path::new(reference);
        if path.is_file() {
            return Err(DataSourceError::Unsupported(reference.to_string()));
        }
        Ok(Arc::new(FolderDataSource::open(path)?))
    }
}
