//! Conversion between an [`Image`] and the flat record buffer a compute kernel reads and writes.
//!
//! Records are `#[repr(C)]` plain-old-data. Their byte layout is a contract with the kernel's
//! declared record stride; nothing checks it at dispatch time, so a mismatch corrupts pixels
//! instead of failing. `tests/kernel_abi.rs` pins the strides.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::foundation::core::{Image, Pixel, coords_of, linear_index, pixel_count};
use crate::foundation::error::{FilterError, FilterResult};

/// Which record type a kernel consumes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordLayout {
    /// [`ColorRecord`]: `r, g, b` as `f32`.
    #[default]
    Color,
    /// [`PositionedColorRecord`]: `x, y` as `i32`, then `r, g, b, a` as `f32`.
    Positioned,
}

impl fmt::Display for RecordLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordLayout::Color => write!(f, "color"),
            RecordLayout::Positioned => write!(f, "positioned"),
        }
    }
}

/// A fixed-layout element of a device buffer.
pub trait PixelRecord: Pod + fmt::Debug + Send + Sync {
    /// Layout tag matching this type.
    const LAYOUT: RecordLayout;

    /// Build the record for pixel `(x, y)`.
    fn from_pixel(x: u32, y: u32, px: Pixel) -> FilterResult<Self>;

    /// Color carried by the record.
    fn to_pixel(&self) -> Pixel;

    /// Pixel this record decodes into, given its position `index` in a `width`-wide buffer.
    fn target(&self, index: usize, width: u32) -> Option<(u32, u32)>;

    /// Element stride in bytes.
    fn stride() -> usize {
        std::mem::size_of::<Self>()
    }
}

/// Color-only record (12 bytes). Alpha is dropped on encode and rebuilt as `1.0` on decode.
///
/// Decoding relies on the device returning records in upload order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct ColorRecord {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl PixelRecord for ColorRecord {
    const LAYOUT: RecordLayout = RecordLayout::Color;

    fn from_pixel(_x: u32, _y: u32, px: Pixel) -> FilterResult<Self> {
        let [r, g, b, _] = px.0;
        Ok(Self { r, g, b })
    }

    fn to_pixel(&self) -> Pixel {
        image::Rgba([self.r, self.g, self.b, 1.0])
    }

    fn target(&self, index: usize, width: u32) -> Option<(u32, u32)> {
        Some(coords_of(index, width))
    }
}

/// Record carrying its own pixel coordinates (24 bytes).
///
/// Decoding writes each record to `(x, y)`, so the device may return records in any order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct PositionedColorRecord {
    pub x: i32,
    pub y: i32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl PixelRecord for PositionedColorRecord {
    const LAYOUT: RecordLayout = RecordLayout::Positioned;

    fn from_pixel(x: u32, y: u32, px: Pixel) -> FilterResult<Self> {
        let (Ok(xi), Ok(yi)) = (i32::try_from(x), i32::try_from(y)) else {
            return Err(FilterError::invalid_dimensions(
                x,
                y,
                "pixel position does not fit a positioned record",
            ));
        };
        let [r, g, b, a] = px.0;
        Ok(Self {
            x: xi,
            y: yi,
            r,
            g,
            b,
            a,
        })
    }

    fn to_pixel(&self) -> Pixel {
        image::Rgba([self.r, self.g, self.b, self.a])
    }

    fn target(&self, _index: usize, _width: u32) -> Option<(u32, u32)> {
        let x = u32::try_from(self.x).ok()?;
        let y = u32::try_from(self.y).ok()?;
        Some((x, y))
    }
}

/// Row-major record sequence for one image: `records[y * width + x]` is pixel `(x, y)`.
///
/// Created per invocation by [`encode`], threaded through dispatch, consumed by [`decode`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordBuffer<R> {
    width: u32,
    height: u32,
    records: Vec<R>,
}

impl<R: PixelRecord> RecordBuffer<R> {
    /// Wrap `records`, checking the element count against the dimensions.
    pub fn new(width: u32, height: u32, records: Vec<R>) -> FilterResult<Self> {
        check_dimensions(width, height)?;
        let expected = pixel_count(width, height)
            .ok_or_else(|| FilterError::invalid_dimensions(width, height, "pixel count overflow"))?;
        if records.len() != expected {
            return Err(FilterError::decode(format!(
                "{width}x{height} buffer needs {expected} records, got {}",
                records.len()
            )));
        }
        Ok(Self {
            width,
            height,
            records,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn into_records(self) -> Vec<R> {
        self.records
    }

    /// Byte view in device layout.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.records)
    }

    /// Total size in bytes of the device buffer this record sequence needs.
    pub fn byte_len(&self) -> usize {
        self.records.len() * R::stride()
    }
}

/// Encode every pixel of `image` into a record at its linear index.
pub fn encode<R: PixelRecord>(image: &Image) -> FilterResult<RecordBuffer<R>> {
    let (width, height) = image.dimensions();
    check_dimensions(width, height)?;

    let mut records = Vec::with_capacity(image.len() / 4);
    for (x, y, px) in image.enumerate_pixels() {
        debug_assert_eq!(records.len(), linear_index(x, y, width));
        records.push(R::from_pixel(x, y, *px)?);
    }

    RecordBuffer::new(width, height, records)
}

/// Rebuild an image from a record buffer.
///
/// Pixels no record targets stay transparent black.
pub fn decode<R: PixelRecord>(buffer: &RecordBuffer<R>) -> FilterResult<Image> {
    let (width, height) = (buffer.width, buffer.height);
    check_dimensions(width, height)?;

    let mut out = Image::new(width, height);
    for (index, record) in buffer.records.iter().enumerate() {
        let Some((x, y)) = record.target(index, width).filter(|&(x, y)| x < width && y < height)
        else {
            return Err(FilterError::decode(format!(
                "record {index} targets a position outside {width}x{height}: {record:?}"
            )));
        };
        out.put_pixel(x, y, record.to_pixel());
    }
    Ok(out)
}

fn check_dimensions(width: u32, height: u32) -> FilterResult<()> {
    if width == 0 || height == 0 {
        return Err(FilterError::invalid_dimensions(
            width,
            height,
            "image must have non-zero width and height",
        ));
    }
    Ok(())
}

#[cfg(test)]
#[path = "../tests/unit/codec.rs"]
mod tests;
