use image::{ImageReader, RgbImage};
use reqwest::{Client as HttpClient, StatusCode};
use std::io::Cursor;
use std::time::Duration;
use url::Url;

pub const DEFAULT_MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Image larger than {limit} bytes")]
    TooLarge { limit: usize },
    #[error("Download exceeded {limit} bytes")]
    DownloadTooLarge { limit: usize },
    #[error("Invalid image URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote server answered {0}")]
    Status(StatusCode),
}

/// Turns uploads and remote URLs into RGB images.
#[derive(Clone)]
pub struct ImageAcquirer {
    http_client: HttpClient,
    max_bytes: usize,
}

impl ImageAcquirer {
    pub fn new(http_client: HttpClient, max_bytes: usize) -> Self {
        Self {
            http_client,
            max_bytes,
        }
    }

    /// Builds the HTTP client used for remote images.
    pub fn http_client(fetch_timeout: Duration) -> Result<HttpClient, reqwest::Error> {
        HttpClient::builder()
            .timeout(fetch_timeout)
            .user_agent(concat!("chart2text-api/", env!("CARGO_PKG_VERSION")))
            .build()
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn from_upload(&self, bytes: &[u8]) -> Result<RgbImage, AcquireError> {
        if bytes.len() > self.max_bytes {
            return Err(AcquireError::TooLarge {
                limit: self.max_bytes,
            });
        }
        decode_rgb(bytes)
    }

    pub async fn from_url(&self, raw_url: &str) -> Result<RgbImage, AcquireError> {
        let url = Url::parse(raw_url).map_err(|e| AcquireError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AcquireError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        log::debug!("Downloading image from {}", url);
        let mut response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AcquireError::Status(response.status()));
        }

        let mut buffer = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if buffer.len() + chunk.len() > self.max_bytes {
                return Err(AcquireError::DownloadTooLarge {
                    limit: self.max_bytes,
                });
            }
            buffer.extend_from_slice(&chunk);
        }
        log::debug!("Downloaded {} bytes", buffer.len());

        decode_rgb(&buffer)
    }
}

/// Decodes any supported encoding and converts it to 8-bit RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, AcquireError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| AcquireError::InvalidImage(e.to_string()))?;
    if reader.format().is_none() {
        return Err(AcquireError::InvalidImage(
            "unrecognised image format".to_string(),
        ));
    }
    let image = reader
        .decode()
        .map_err(|e| AcquireError::InvalidImage(e.to_string()))?;
    Ok(image.to_rgb8())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb};

    fn acquirer() -> ImageAcquirer {
        ImageAcquirer::new(HttpClient::new(), DEFAULT_MAX_IMAGE_BYTES)
    }

    #[test]
    fn converts_rgba_to_rgb() {
        let image = acquirer().from_upload(&rgba_png(4, 3)).unwrap();
        assert_eq!(image.dimensions(), (4, 3));
        assert_eq!(image.get_pixel(0, 0), &Rgb([200, 10, 30]));
    }

    #[test]
    fn converts_grayscale_to_rgb() {
        let image = acquirer().from_upload(&gray_png(2, 2)).unwrap();
        assert_eq!(image.get_pixel(1, 1), &Rgb([77, 77, 77]));
    }

    #[test]
    fn decodes_jpeg() {
        let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([0, 0, 0])));
        let image = acquirer()
            .from_upload(&encode(source, ImageFormat::Jpeg))
            .unwrap();
        assert_eq!(image.dimensions(), (8, 8));
    }

    #[test]
    fn rejects_non_image_bytes() {
        let err = acquirer().from_upload(b"%PDF-1.7 not a chart").unwrap_err();
        assert!(matches!(err, AcquireError::InvalidImage(_)));
    }

    #[test]
    fn rejects_truncated_png() {
        let mut bytes = rgba_png(16, 16);
        bytes.truncate(40);
        let err = acquirer().from_upload(&bytes).unwrap_err();
        assert!(matches!(err, AcquireError::InvalidImage(_)));
    }

    #[test]
    fn rejects_oversized_upload() {
        let acquirer = ImageAcquirer::new(HttpClient::new(), 16);
        let err = acquirer.from_upload(&rgba_png(4, 4)).unwrap_err();
        assert!(matches!(err, AcquireError::TooLarge { limit: 16 }));
    }

    #[actix_web::test]
    async fn fetches_and_decodes_remote_image() {
        let url = serve_once("200 OK", gray_png(3, 5));
        let image = acquirer().from_url(&url).await.unwrap();
        assert_eq!(image.dimensions(), (3, 5));
    }

    #[actix_web::test]
    async fn remote_error_status_is_a_fetch_failure() {
        let url = serve_once("404 Not Found", b"missing".to_vec());
        let err = acquirer().from_url(&url).await.unwrap_err();
        assert!(matches!(err, AcquireError::Status(StatusCode::NOT_FOUND)));
    }

    #[actix_web::test]
    async fn remote_non_image_is_invalid_image() {
        let url = serve_once("200 OK", b"<html>hello</html>".to_vec());
        let err = acquirer().from_url(&url).await.unwrap_err();
        assert!(matches!(err, AcquireError::InvalidImage(_)));
    }

    #[actix_web::test]
    async fn stops_downloading_past_the_size_cap() {
        let url = serve_once("200 OK", vec![0u8; 4096]);
        let acquirer = ImageAcquirer::new(HttpClient::new(), 1024);
        let err = acquirer.from_url(&url).await.unwrap_err();
        assert!(matches!(err, AcquireError::DownloadTooLarge { limit: 1024 }));
    }

    #[actix_web::test]
    async fn rejects_unsupported_urls() {
        let err = acquirer().from_url("ftp://example.com/a.png").await.unwrap_err();
        assert!(matches!(err, AcquireError::InvalidUrl(_)));
        let err = acquirer().from_url("not a url").await.unwrap_err();
        assert!(matches!(err, AcquireError::InvalidUrl(_)));
    }
}
