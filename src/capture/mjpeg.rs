use super::{CaptureError, CaptureSource, Result};
use image::RgbImage;
use std::io::Read;

/// Upper bound on a single JPEG frame; anything larger is a broken stream
/// and the frame is rejected.
const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK: usize = 8192;

/// HTTP camera source.
///
/// Handles both `multipart/x-mixed-replace` MJPEG streams (one persistent
/// connection, frames delimited by JPEG SOI/EOI markers) and plain JPEG
/// snapshot endpoints (refetched per frame).
pub struct MjpegCapture {
    url: String,
    stream: Option<HttpStream>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl MjpegCapture {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: None,
        }
    }
}

impl CaptureSource for MjpegCapture {
    fn connect(&mut self) -> Result<()> {
        tracing::info!("Connecting to {}", self.url);

        let response = ureq::get(&self.url).call().map_err(|e| CaptureError::Connect {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            tracing::debug!("Stream is multipart MJPEG");
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())));
        } else {
            tracing::debug!("Stream is a JPEG snapshot endpoint");
            self.stream = Some(HttpStream::SingleJpeg);
        }

        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RgbImage> {
        let jpeg = match self.stream.as_mut().ok_or(CaptureError::NotConnected)? {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg()?,
            HttpStream::SingleJpeg => fetch_snapshot(&self.url)?,
        };
        decode_jpeg(&jpeg)
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Incremental reader for an MJPEG multipart body.
///
/// Accumulates bytes and slices out complete JPEGs between SOI (FFD8) and
/// EOI (FFD9) markers; part headers in between are skipped by the scan.
struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                if frame.len() > MAX_JPEG_BYTES {
                    return Err(CaptureError::Decode(format!(
                        "jpeg frame of {} bytes exceeds the {} byte cap",
                        frame.len(),
                        MAX_JPEG_BYTES
                    )));
                }
                return Ok(frame);
            }

            let read = self
                .reader
                .read(&mut chunk)
                .map_err(|e| CaptureError::Decode(format!("read mjpeg chunk: {e}")))?;
            if read == 0 {
                return Err(CaptureError::StreamEnded);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            // A buffer this large with no complete frame means we lost sync;
            // drop the stale prefix instead of growing without bound.
            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_snapshot(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url).call().map_err(|e| CaptureError::Decode(e.to_string()))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .map_err(|e| CaptureError::Decode(format!("read jpeg snapshot: {e}")))?;
    if bytes.is_empty() {
        return Err(CaptureError::Decode("empty jpeg snapshot".to_string()));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).map_err(|e| CaptureError::Decode(e.to_string()))?;
    Ok(image.into_rgb8())
}

/// Locate the first complete JPEG (SOI..=EOI) in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut start = None;
    let mut i = 0;
    while i + 1 < buffer.len() {
        if buffer[i] == 0xFF && buffer[i + 1] == 0xD8 {
            start = Some(i);
            break;
        }
        i += 1;
    }
    let start = start?;
    let mut j = start + 2;
    while j + 1 < buffer.len() {
        if buffer[j] == 0xFF && buffer[j + 1] == 0xD9 {
            return Some((start, j + 2));
        }
        j += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_jpeg_between_markers() {
        let mut data = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        data.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        data.extend_from_slice(b"\r\n--frame");

        let (start, end) = find_jpeg_bounds(&data).unwrap();
        assert_eq!(&data[start..start + 2], &[0xFF, 0xD8]);
        assert_eq!(&data[end - 2..end], &[0xFF, 0xD9]);
        assert_eq!(end - start, 7);
    }

    #[test]
    fn incomplete_jpeg_yields_none() {
        // SOI with no EOI yet
        assert!(find_jpeg_bounds(&[0xFF, 0xD8, 1, 2, 3]).is_none());
        // No SOI at all
        assert!(find_jpeg_bounds(b"headers only").is_none());
        assert!(find_jpeg_bounds(&[]).is_none());
    }

    #[test]
    fn stream_reader_extracts_consecutive_frames() {
        let mut body = Vec::new();
        for fill in [1u8, 2, 3] {
            body.extend_from_slice(b"--frame\r\n\r\n");
            body.extend_from_slice(&[0xFF, 0xD8, fill, 0xFF, 0xD9]);
        }

        let mut stream = MjpegStream::new(Box::new(std::io::Cursor::new(body)));
        for fill in [1u8, 2, 3] {
            let frame = stream.read_next_jpeg().unwrap();
            assert_eq!(frame, vec![0xFF, 0xD8, fill, 0xFF, 0xD9]);
        }
        assert!(matches!(
            stream.read_next_jpeg(),
            Err(CaptureError::StreamEnded)
        ));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut body = vec![0xFF, 0xD8];
        body.resize(MAX_JPEG_BYTES + 16, 0);
        body.extend_from_slice(&[0xFF, 0xD9]);

        let mut stream = MjpegStream::new(Box::new(std::io::Cursor::new(body)));
        assert!(matches!(
            stream.read_next_jpeg(),
            Err(CaptureError::Decode(_))
        ));
    }

    #[test]
    fn capture_before_connect_is_not_connected() {
        let mut capture = MjpegCapture::new("http://example/stream");
        assert!(matches!(
            capture.capture_frame(),
            Err(CaptureError::NotConnected)
        ));
    }
}
