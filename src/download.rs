use std::future::Future;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use reqwest::header::CONTENT_LENGTH;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Fetches one remote image into a local file.
pub trait Downloader: Send + Sync {
    /// Writes the body of `url` to `dest` and returns the number of bytes
    /// written. On error `dest` may hold a partial file; the caller cleans up.
    fn download(&self, url: &str, dest: &Path) -> impl Future<Output = Result<u64>> + Send;
}

/// Streams response bodies straight to disk.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus(status));
        }
        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);

        let mut file = File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        // hyper already fails a body cut short of Content-Length; this also
        // catches a transport that hands over a different byte count.
        if declared != 0 && written != declared {
            return Err(Error::Incomplete {
                expected: declared,
                written,
            });
        }
        debug!(url, path = %dest.display(), bytes = written, "downloaded");
        Ok(written)
    }
}

/// File extension (with the leading dot) of the URL path's last segment, or
/// an empty string when there is none. Query and fragment are ignored.
pub fn file_extension(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let name = path.rsplit('/').next().unwrap_or_default();
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => name[idx..].to_string(),
        _ => String::new(),
    }
}

/// Checks that the file at `path` starts with a known image signature.
pub fn verify_image(path: &Path) -> Result<()> {
    let reader = image::ImageReader::open(path)?.with_guessed_format()?;
    match reader.format() {
        Some(_) => Ok(()),
        None => Err(Error::NotAnImage),
    }
}

/// Removes `path`, ignoring a file that is already gone.
pub fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn extension_comes_from_url_path() {
        assert_eq!(
            file_extension("https://konachan.com/image/abc/Konachan.com%20-%201%20sky.jpg"),
            ".jpg"
        );
        assert_eq!(file_extension("https://host/a/b.png?x=1.gif#frag.bmp"), ".png");
        assert_eq!(file_extension("https://host/a.dir/noext"), "");
        assert_eq!(file_extension("https://host/"), "");
        assert_eq!(file_extension("relative/pic.webp?size=2"), ".webp");
    }

    #[test]
    fn verify_image_accepts_png_and_rejects_text() {
        let dir = tempdir().unwrap();
        let png = dir.path().join("a.png");
        image::RgbImage::new(2, 2).save(&png).unwrap();
        verify_image(&png).unwrap();

        let text = dir.path().join("b.png");
        std::fs::write(&text, b"<html>not found</html>").unwrap();
        assert!(matches!(verify_image(&text), Err(Error::NotAnImage)));
    }

    #[test]
    fn remove_if_exists_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.jpg");
        remove_if_exists(&path).unwrap();
        std::fs::write(&path, b"x").unwrap();
        remove_if_exists(&path).unwrap();
        assert!(!path.exists());
    }
}
