//! ImageIssueAnalyzer - finds quality issues in image columns

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tracing::debug;

use super::{Analyzer, AnalyzerError, ImageIssueKind, ImageQualityDetector, IssueStream};
use crate::datasource::DataSource;
use crate::domain::{ColumnType, ColumnTypeMapping, IssueReport, columns_of_type};

/// Runs a batch image detector over every image column
///
/// Unreadable cells are skipped. Readable images of a column are written to a
/// scratch directory that lives only while that column is analyzed.
pub struct ImageIssueAnalyzer {
    detector: Arc<dyn ImageQualityDetector>,
    scratch_dir: Option<PathBuf>,
}

impl ImageIssueAnalyzer {
    pub fn new(detector: Arc<dyn ImageQualityDetector>) -> Self {
        Self {
            detector,
            scratch_dir: None,
        }
    }

    /// Place scratch directories below `dir` instead of the system temp dir
    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = Some(dir);
        self
    }

    fn scratch(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("datalens-images-");
        match &self.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
    }

    fn analyze_column(&self, source: &dyn DataSource, column: &str, dtype: ColumnType) -> Result<Vec<IssueReport>, AnalyzerError> {
        debug!(%column, rows = source.len(), "ImageIssueAnalyzer::analyze_column: called");
        let scratch = self.scratch()?;

        let mut rows = Vec::new();
        let mut paths = Vec::new();
        for row in 0..source.len() {
            let bytes = match source.get_cell_data(column, row, dtype) {
                Ok(bytes) if !bytes.is_empty() => bytes,
                Ok(_) => continue,
                Err(e) => {
                    debug!(%column, row, error = %e, "analyze_column: skipping unreadable cell");
                    continue;
                }
            };
            let path = scratch.path().join(format!("{row}.img"));
            std::fs::write(&path, &bytes)?;
            rows.push(row);
            paths.push(path);
        }

        if paths.is_empty() {
            debug!(%column, "analyze_column: no readable images");
            return Ok(Vec::new());
        }

        let flags = self.detector.detect(&paths)?;
        if flags.len() != paths.len() {
            return Err(AnalyzerError::Detector(format!(
                "expected {} results, got {}",
                paths.len(),
                flags.len()
            )));
        }
        drop(scratch);

        let issues = ImageIssueKind::ALL
            .iter()
            .filter_map(|&kind| {
                let flagged: Vec<usize> = rows
                    .iter()
                    .zip(&flags)
                    .filter(|(_, f)| f.contains(&kind))
                    .map(|(row, _)| *row)
                    .collect();
                (!flagged.is_empty()).then(|| {
                    IssueReport::new(kind.title(), flagged)
                        .with_severity(kind.severity())
                        .with_columns([column])
                        .with_description(kind.description())
                })
            })
            .collect::<Vec<_>>();
        debug!(%column, count = issues.len(), "analyze_column: done");
        Ok(issues)
    }
}

impl Analyzer for ImageIssueAnalyzer {
    fn analyze<'a>(&'a self, source: &'a dyn DataSource, dtypes: &'a ColumnTypeMapping) -> IssueStream<'a> {
        let columns = columns_of_type(dtypes, ColumnType::Image);
        debug!(?columns, "ImageIssueAnalyzer::analyze: called");
        Box::new(ColumnIssues {
            analyzer: self,
            source,
            columns: columns.into(),
            pending: VecDeque::new(),
        })
    }
}

/// Analyzes one column at a time, only when its issues are asked for
struct ColumnIssues<'a> {
    analyzer: &'a ImageIssueAnalyzer,
    source: &'a dyn DataSource,
    columns: VecDeque<String>,
    pending: VecDeque<IssueReport>,
}

impl Iterator for ColumnIssues<'_> {
    type Item = Result<IssueReport, AnalyzerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(issue) = self.pending.pop_front() {
                return Some(Ok(issue));
            }
            let column = self.columns.pop_front()?;
            match self.analyzer.analyze_column(self.source, &column, ColumnType::Image) {
                Ok(issues) => self.pending.extend(issues),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ImageFlags;
    use crate::datasource::MemoryDataSource;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Mutex;

    /// Flags images by their first byte and records where they were stored
    #[derive(Default)]
    struct ByteDetector {
        blurry: Vec<u8>,
        dark: Vec<u8>,
        seen_dirs: Mutex<Vec<PathBuf>>,
        calls: Mutex<usize>,
    }

    impl ImageQualityDetector for ByteDetector {
        fn detect(&self, images: &[PathBuf]) -> Result<Vec<ImageFlags>, AnalyzerError> {
            *self.calls.lock().unwrap() += 1;
            if let Some(parent) = images.first().and_then(|p| p.parent()) {
                self.seen_dirs.lock().unwrap().push(parent.to_path_buf());
            }
            images
                .iter()
                .map(|p| -> Result<ImageFlags, AnalyzerError> {
                    let byte = std::fs::read(p)?[0];
                    let mut flags = ImageFlags::new();
                    if self.blurry.contains(&byte) {
                        flags.insert(ImageIssueKind::Blurry);
                    }
                    if self.dark.contains(&byte) {
                        flags.insert(ImageIssueKind::Dark);
                    }
                    Ok(flags)
                })
                .collect()
        }
    }

    struct PanickingDetector {
        seen_dirs: Mutex<Vec<PathBuf>>,
    }

    impl ImageQualityDetector for PanickingDetector {
        fn detect(&self, images: &[PathBuf]) -> Result<Vec<ImageFlags>, AnalyzerError> {
            let parent = images[0].parent().unwrap().to_path_buf();
            self.seen_dirs.lock().unwrap().push(parent);
            panic!("detector crashed");
        }
    }

    /// Ten rows, rows 2 and 5 undecodable, each readable cell holds its row index
    fn ten_rows() -> MemoryDataSource {
        let cells = (0..10u8).map(|i| if i == 2 || i == 5 { None } else { Some(vec![i]) }).collect();
        MemoryDataSource::new("mem").with_column("imgcol", ColumnType::Image, cells)
    }

    fn collect(analyzer: &ImageIssueAnalyzer, source: &dyn DataSource) -> Vec<IssueReport> {
        let dtypes = source.guess_dtypes();
        analyzer.analyze(source, &dtypes).collect::<Result<_, _>>().unwrap()
    }

    #[test]
    fn test_blurry_row_reported_with_original_index() {
        let detector = Arc::new(ByteDetector {
            blurry: vec![3],
            ..Default::default()
        });
        let analyzer = ImageIssueAnalyzer::new(detector.clone());

        let issues = collect(&analyzer, &ten_rows());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].title(), "Blurry images");
        assert_eq!(issues[0].affected_rows(), &[3]);
        assert_eq!(issues[0].affected_columns(), Some(&["imgcol".to_string()][..]));
        assert_eq!(*detector.calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_unreadable_rows_never_reported() {
        let detector = Arc::new(ByteDetector {
            dark: (0..10).collect(),
            ..Default::default()
        });
        let analyzer = ImageIssueAnalyzer::new(detector);

        let issues = collect(&analyzer, &ten_rows());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].affected_rows(), &[0, 1, 3, 4, 6, 7, 8, 9]);
    }

    #[test]
    fn test_column_without_readable_images_yields_nothing() {
        let source = MemoryDataSource::new("mem").with_column("img", ColumnType::Image, vec![None, Some(vec![])]);
        let detector = Arc::new(ByteDetector {
            dark: (0..10).collect(),
            ..Default::default()
        });
        let analyzer = ImageIssueAnalyzer::new(detector.clone());

        assert!(collect(&analyzer, &source).is_empty());
        assert_eq!(*detector.calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_only_image_columns_analyzed() {
        let source = MemoryDataSource::new("mem")
            .with_column("a", ColumnType::Image, vec![Some(vec![1])])
            .with_column("b", ColumnType::Str, vec![Some(vec![1])])
            .with_column("c", ColumnType::Image, vec![Some(vec![1])]);
        let detector = Arc::new(ByteDetector {
            blurry: vec![1],
            ..Default::default()
        });
        let analyzer = ImageIssueAnalyzer::new(detector.clone());

        let issues = collect(&analyzer, &source);
        let columns: Vec<_> = issues.iter().map(|i| i.affected_columns().unwrap()[0].clone()).collect();
        assert_eq!(columns, vec!["a", "c"]);
        assert_eq!(*detector.calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_columns_are_analyzed_lazily() {
        let source = MemoryDataSource::new("mem")
            .with_column("a", ColumnType::Image, vec![Some(vec![1])])
            .with_column("b", ColumnType::Image, vec![Some(vec![1])]);
        let detector = Arc::new(ByteDetector {
            blurry: vec![1],
            ..Default::default()
        });
        let analyzer = ImageIssueAnalyzer::new(detector.clone());
        let dtypes = source.guess_dtypes();

        let mut stream = analyzer.analyze(&source, &dtypes);
        assert_eq!(*detector.calls.lock().unwrap(), 0);
        stream.next();
        assert_eq!(*detector.calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_scratch_dir_removed_after_column() {
        let root = TempDir::new().unwrap();
        let detector = Arc::new(ByteDetector::default());
        let analyzer = ImageIssueAnalyzer::new(detector.clone()).with_scratch_dir(root.path().join("scratch"));

        collect(&analyzer, &ten_rows());
        let dirs = detector.seen_dirs.lock().unwrap();
        assert_eq!(dirs.len(), 1);
        assert!(dirs[0].starts_with(root.path()));
        assert!(!dirs[0].exists());
    }

    #[test]
    fn test_scratch_dir_removed_on_panic() {
        let detector = Arc::new(PanickingDetector {
            seen_dirs: Mutex::new(Vec::new()),
        });
        let analyzer = ImageIssueAnalyzer::new(detector.clone());
        let source = ten_rows();

        let result = catch_unwind(AssertUnwindSafe(|| collect(&analyzer, &source)));
        assert!(result.is_err());
        let dirs = detector.seen_dirs.lock().unwrap();
        assert!(!dirs[0].exists());
    }

    #[test]
    fn test_detector_result_count_mismatch_is_error() {
        struct Short;
        impl ImageQualityDetector for Short {
            fn detect(&self, _: &[PathBuf]) -> Result<Vec<ImageFlags>, AnalyzerError> {
                Ok(vec![])
            }
        }
        let analyzer = ImageIssueAnalyzer::new(Arc::new(Short));
        let source = ten_rows();
        let dtypes = source.guess_dtypes();
        let items: Vec<_> = analyzer.analyze(&source, &dtypes).collect();
        assert!(matches!(items.as_slice(), [Err(AnalyzerError::Detector(_))]));
    }
}
