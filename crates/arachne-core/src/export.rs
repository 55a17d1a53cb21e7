//! Writes finished crawl reports to disk as CSV, a plain-text summary and JSON.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::AppError;
use crate::status::{CrawlReport, ExportedFiles};
use crate::traits::ResultSink;
use crate::util::epoch_seconds;

#[derive(Serialize)]
struct CsvRow<'a> {
    urls: &'a str,
    title: &'a str,
}

/// [`ResultSink`] writing three files per report into `out_dir`.
///
/// Each file is written independently: a failure is logged and leaves that
/// file's entry empty in the returned [`ExportedFiles`].
#[derive(Debug, Clone)]
pub struct FileExporter {
    out_dir: PathBuf,
}

impl FileExporter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn write_csv(&self, report: &CrawlReport, path: &Path) -> Result<(), AppError> {
        let mut writer = csv::Writer::from_path(path).map_err(export_error)?;
        for record in &report.records {
            writer
                .serialize(CsvRow {
                    urls: &record.url,
                    title: &record.title,
                })
                .map_err(export_error)?;
        }
        writer.flush().map_err(export_error)
    }

    fn write_summary(&self, report: &CrawlReport, path: &Path) -> Result<(), AppError> {
        fs::write(path, render_summary(report)).map_err(export_error)
    }

    fn write_json(&self, report: &CrawlReport, path: &Path) -> Result<(), AppError> {
        let json = serde_json::to_string_pretty(&report.summary())?;
        fs::write(path, json).map_err(export_error)
    }
}

impl ResultSink for FileExporter {
    async fn export(&self, report: &CrawlReport) -> Result<ExportedFiles, AppError> {
        fs::create_dir_all(&self.out_dir).map_err(|e| {
            AppError::ExportError(format!("cannot create {}: {e}", self.out_dir.display()))
        })?;

        let stamp = epoch_seconds() as u64;
        let (explorers, extractors) = (report.config.num_explorers, report.config.num_extractors);

        let csv_path = self
            .out_dir
            .join(format!("output_exp{explorers}_ext_{extractors}_{stamp}.csv"));
        let txt_path = self
            .out_dir
            .join(format!("summary_exp{explorers}_ext_{extractors}_{stamp}.txt"));
        let json_path = self.out_dir.join(format!("results_{stamp}.json"));

        let files = ExportedFiles {
            csv_filename: written("CSV", &csv_path, self.write_csv(report, &csv_path)),
            txt_filename: written("summary", &txt_path, self.write_summary(report, &txt_path)),
            json_filename: written("JSON", &json_path, self.write_json(report, &json_path)),
        };
        Ok(files)
    }
}

fn written(kind: &str, path: &Path, result: Result<(), AppError>) -> Option<String> {
    match result {
        Ok(()) => {
            tracing::info!(path = %path.display(), "{kind} written");
            Some(path.display().to_string())
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "{kind} export failed");
            None
        }
    }
}

fn export_error(e: impl std::fmt::Display) -> AppError {
    AppError::ExportError(e.to_string())
}

/// Plain-text summary: counters, rates and every extracted URL.
pub fn render_summary(report: &CrawlReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Number of URLs found: {}", report.urls_found);
    let _ = writeln!(out, "Number of pages extracted: {}", report.urls_extracted);
    let _ = writeln!(out, "Throughput: {:.2}", report.throughput);
    let _ = writeln!(out, "Extraction rate: {:.2}%", report.extraction_rate * 100.0);
    let _ = writeln!(out, "\nURLs accessed:");
    for record in &report.records {
        let _ = writeln!(out, "{}", record.url);
    }
    out
}
