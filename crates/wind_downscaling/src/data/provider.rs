use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use chrono::NaiveDate;
use log::{debug, warn};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::raster::{Raster, RasterError};

pub const INPUT_PATTERN: &str = "x_{date}.bin";
pub const BLURRED_INPUT_PATTERN: &str = "x_cosmo_{date}.bin";
pub const OUTPUT_PATTERN: &str = "y_{date}.bin";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Wrong value for data provider {}: please choose between s3 and local", .0)]
    InvalidProvider(String),
    #[error("No file for {} at {:?}", .date, .path)]
    Missing { date: NaiveDate, path: PathBuf },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Download of {} answered {}", .0, .1)]
    Status(String, reqwest::StatusCode),
    #[error("Unable to read raster: {0}")]
    Raster(#[from] RasterError),
}

/// Scoped access to a provided file. Files downloaded into the scratch
/// directory are removed when the handle is dropped.
#[derive(Debug)]
pub struct ProvidedFile {
    path: PathBuf,
    owned: bool,
}

impl ProvidedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open_raster(&self) -> Result<Raster, ProviderError> {
        Ok(Raster::load(&self.path)?)
    }
}

impl Drop for ProvidedFile {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("failed to remove scratch file {:?}: {e}", self.path);
            }
        }
    }
}

pub trait FileProvider: Send + Sync {
    fn provide(&self, date: NaiveDate) -> Result<ProvidedFile, ProviderError>;
}

fn file_name(pattern: &str, date: NaiveDate) -> String {
    pattern.replace("{date}", &date.format("%Y%m%d").to_string())
}

#[derive(Debug, Clone)]
pub struct LocalFileProvider {
    folder: PathBuf,
    pattern: String,
}

impl LocalFileProvider {
    pub fn new(folder: impl Into<PathBuf>, pattern: &str) -> Self {
        Self {
            folder: folder.into(),
            pattern: pattern.into(),
        }
    }
}

impl FileProvider for LocalFileProvider {
    fn provide(&self, date: NaiveDate) -> Result<ProvidedFile, ProviderError> {
        let path = self.folder.join(file_name(&self.pattern, date));
        if !path.is_file() {
            return Err(ProviderError::Missing { date, path });
        }
        Ok(ProvidedFile { path, owned: false })
    }
}

/// Fetches files from a public bucket over HTTPS.
#[derive(Debug, Clone)]
pub struct S3FileProvider {
    bucket: String,
    prefix: String,
    pattern: String,
    scratch: PathBuf,
    client: Client,
}

impl S3FileProvider {
    pub fn new(bucket: &str, prefix: &str, pattern: &str) -> Result<Self, ProviderError> {
        let scratch = std::env::temp_dir().join("wind_downscaling").join(bucket);
        fs::create_dir_all(&scratch)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            pattern: pattern.into(),
            scratch,
            client,
        })
    }

    fn url(&self, name: &str) -> String {
        format!(
            "https://{}.s3.amazonaws.com/{}/{}",
            self.bucket, self.prefix, name
        )
    }
}

impl FileProvider for S3FileProvider {
    fn provide(&self, date: NaiveDate) -> Result<ProvidedFile, ProviderError> {
        let name = file_name(&self.pattern, date);
        let url = self.url(&name);
        debug!("downloading {url}");
        let mut response = self.client.get(&url).send()?;
        if !response.status().is_success() {
            return Err(ProviderError::Status(url, response.status()));
        }
        let path = self.scratch.join(&name);
        let handle = ProvidedFile { path, owned: true };
        let mut dest = File::create(handle.path())?;
        response.copy_to(&mut dest)?;
        Ok(handle)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum ProviderKind {
    Local,
    S3,
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            other => Err(ProviderError::InvalidProvider(other.into())),
        }
    }
}

pub const S3_BUCKET: &str = "wind-downscaling";
pub const S3_PREFIX: &str = "img_prediction_files";

/// Input and target providers for one data source.
pub fn data_providers(
    kind: ProviderKind,
    folder: &Path,
    cosmo_blurred: bool,
) -> Result<(Box<dyn FileProvider>, Box<dyn FileProvider>), ProviderError> {
    let input_pattern = if cosmo_blurred {
        BLURRED_INPUT_PATTERN
    } else {
        INPUT_PATTERN
    };
    Ok(match kind {
        ProviderKind::Local => (
            Box::new(LocalFileProvider::new(folder, input_pattern)),
            Box::new(LocalFileProvider::new(folder, OUTPUT_PATTERN)),
        ),
        ProviderKind::S3 => (
            Box::new(S3FileProvider::new(S3_BUCKET, S3_PREFIX, input_pattern)?),
            Box::new(S3FileProvider::new(S3_BUCKET, S3_PREFIX, OUTPUT_PATTERN)?),
        ),
    })
}

/// Inclusive range of days.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    pub fn num_days(&self) -> usize {
        ((self.end - self.start).num_days() + 1).max(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_provider_names_value() {
        let err = "ftp".parse::<ProviderKind>().unwrap_err();
        assert!(err.to_string().contains("ftp"));
        assert_eq!("s3".parse::<ProviderKind>().unwrap(), ProviderKind::S3);
    }

    #[test]
    fn pattern_uses_compact_date() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 7).unwrap();
        assert_eq!(file_name(INPUT_PATTERN, date), "x_20200107.bin");
    }

    #[test]
    fn local_provider_reports_missing_file() {
        let provider = LocalFileProvider::new(std::env::temp_dir(), "does_not_exist_{date}.bin");
        let date = NaiveDate::from_ymd_opt(2016, 4, 1).unwrap();
        assert!(matches!(
            provider.provide(date),
            Err(ProviderError::Missing { .. })
        ));
    }

    #[test]
    fn date_range_is_inclusive() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2016, 2, 27).unwrap(),
            NaiveDate::from_ymd_opt(2016, 3, 1).unwrap(),
        );
        assert_eq!(range.num_days(), 4);
        assert_eq!(range.days().count(), 4);
    }
}
