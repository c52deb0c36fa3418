/// Floating-point RGBA image, the pixel grid the pipeline consumes and produces.
pub type Image = image::Rgba32FImage;

/// One pixel of an [`Image`], straight (non-premultiplied) alpha in `[0, 1]`.
pub type Pixel = image::Rgba<f32>;

/// Linear buffer index of pixel `(x, y)` in a row-major grid `width` pixels wide.
#[inline]
pub fn linear_index(x: u32, y: u32, width: u32) -> usize {
    (y as usize) * (width as usize) + (x as usize)
}

/// Inverse of [`linear_index`].
///
/// `width` must be non-zero.
#[inline]
pub fn coords_of(index: usize, width: u32) -> (u32, u32) {
    let w = width as usize;
    ((index % w) as u32, (index / w) as u32)
}

/// Number of pixels in a `width x height` grid, or `None` on overflow.
pub fn pixel_count(width: u32, height: u32) -> Option<usize> {
    (width as usize).checked_mul(height as usize)
}

/// Build an image of the given size filled with one color.
pub fn solid_image(width: u32, height: u32, rgba: [f32; 4]) -> Image {
    Image::from_pixel(width, height, image::Rgba(rgba))
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
