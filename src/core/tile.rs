//! Tile pixel ownership.
//!
//! A [`Tile`] pairs a planned region with the pixel data read for it.
//! [`PixelBuffer`] holds exactly one region in canonical planar layout
//! (channels x height x width) and knows how to re-serialize itself for
//! the writer backends (interleaved rows for TIFF, single-channel planes
//! for Zarr chunks), zero-padding to a fixed tile grid where required.
use ndarray::Array3;

use crate::core::planner::TileRegion;
use crate::types::PixelType;

/// Owned pixel data for one region, planar (channels, height, width).
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Array3<u8>),
    U16(Array3<u16>),
    F32(Array3<f32>),
}

impl PixelBuffer {
    pub fn zeros(pixel_type: PixelType, channels: usize, height: usize, width: usize) -> Self {
        match pixel_type {
            PixelType::U8 => PixelBuffer::U8(Array3::zeros((channels, height, width))),
            PixelType::U16 => PixelBuffer::U16(Array3::zeros((channels, height, width))),
            PixelType::F32 => PixelBuffer::F32(Array3::zeros((channels, height, width))),
        }
    }

    pub fn pixel_type(&self) -> PixelType {
        match self {
            PixelBuffer::U8(_) => PixelType::U8,
            PixelBuffer::U16(_) => PixelType::U16,
            PixelBuffer::F32(_) => PixelType::F32,
        }
    }

    /// (channels, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        match self {
            PixelBuffer::U8(a) => a.dim(),
            PixelBuffer::U16(a) => a.dim(),
            PixelBuffer::F32(a) => a.dim(),
        }
    }

    pub fn byte_len(&self) -> usize {
        let (c, h, w) = self.dim();
        c * h * w * self.pixel_type().bytes_per_sample()
    }

    /// Little-endian bytes in interleaved row-major order (y, x, c),
    /// zero-padded on the right/bottom to `pad_h` x `pad_w`.
    pub fn interleaved_padded_bytes(&self, pad_h: usize, pad_w: usize) -> Vec<u8> {
        match self {
            PixelBuffer::U8(a) => interleave(a, pad_h, pad_w, |v, out| out.push(v)),
            PixelBuffer::U16(a) => {
                interleave(a, pad_h, pad_w, |v, out| out.extend_from_slice(&v.to_le_bytes()))
            }
            PixelBuffer::F32(a) => {
                interleave(a, pad_h, pad_w, |v, out| out.extend_from_slice(&v.to_le_bytes()))
            }
        }
    }

    /// Little-endian bytes of a single channel plane, row-major,
    /// zero-padded to `pad_h` x `pad_w`.
    pub fn channel_plane_padded_bytes(&self, channel: usize, pad_h: usize, pad_w: usize) -> Vec<u8> {
        match self {
            PixelBuffer::U8(a) => plane(a, channel, pad_h, pad_w, |v, out| out.push(v)),
            PixelBuffer::U16(a) => plane(a, channel, pad_h, pad_w, |v, out| {
                out.extend_from_slice(&v.to_le_bytes())
            }),
            PixelBuffer::F32(a) => plane(a, channel, pad_h, pad_w, |v, out| {
                out.extend_from_slice(&v.to_le_bytes())
            }),
        }
    }
}

fn interleave<T: Copy + Default>(
    a: &Array3<T>,
    pad_h: usize,
    pad_w: usize,
    put: impl Fn(T, &mut Vec<u8>),
) -> Vec<u8> {
    let (c, h, w) = a.dim();
    let mut out = Vec::with_capacity(pad_h * pad_w * c * std::mem::size_of::<T>());
    for y in 0..pad_h {
        for x in 0..pad_w {
            for ch in 0..c {
                let v = if y < h && x < w { a[[ch, y, x]] } else { T::default() };
                put(v, &mut out);
            }
        }
    }
    out
}

fn plane<T: Copy + Default>(
    a: &Array3<T>,
    channel: usize,
    pad_h: usize,
    pad_w: usize,
    put: impl Fn(T, &mut Vec<u8>),
) -> Vec<u8> {
    let (_, h, w) = a.dim();
    let mut out = Vec::with_capacity(pad_h * pad_w * std::mem::size_of::<T>());
    for y in 0..pad_h {
        for x in 0..pad_w {
            let v = if y < h && x < w { a[[channel, y, x]] } else { T::default() };
            put(v, &mut out);
        }
    }
    out
}

/// A planned region together with its pixel data.
#[derive(Debug, Clone)]
pub struct Tile {
    pub region: TileRegion,
    pub data: PixelBuffer,
}

impl Tile {
    pub fn byte_size(&self) -> usize {
        self.data.byte_len()
    }
}
