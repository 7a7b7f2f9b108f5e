use eframe::egui::ColorImage;
use tracing::debug;

/// Downloads and decodes a video thumbnail for the preview next to the title.
///
/// Blocking; run it off the UI thread. Any failure just means no preview.
pub fn fetch_thumbnail(url: &str) -> Option<ColorImage> {
    let resp = match reqwest::blocking::get(url).and_then(|r| r.error_for_status()) {
        Ok(resp) => resp,
        Err(e) => {
            debug!("Thumbnail request failed for {url}: {e}");
            return None;
        }
    };
    let bytes = resp.bytes().ok()?;
    decode_thumbnail(&bytes)
}

/// Decodes image bytes into an egui image, downscaled to preview size.
pub fn decode_thumbnail(bytes: &[u8]) -> Option<ColorImage> {
    let img = image::load_from_memory(bytes).ok()?.thumbnail(240, 180).to_rgba8();
    let size = [img.width() as usize, img.height() as usize];
    Some(ColorImage::from_rgba_unmultiplied(size, &img))
}
