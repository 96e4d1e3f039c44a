//! Metadata translation helpers shared by the format writers.
//!
//! Each writer maps the source [`MetadataRecord`] onto its native schema.
//! Fields without a target equivalent are dropped here and reported as
//! warnings; translation never fails a job.
use crate::core::metadata::{MetadataRecord, MetadataWarning};
use crate::types::PixelType;

/// Physical pixel size normalized to micrometers, the unit all three
/// target schemas use. Unknown units drop the field with a warning.
pub fn pixel_size_micrometers(
    record: &MetadataRecord,
    target: &str,
) -> (Option<(f64, f64, Option<f64>)>, Vec<MetadataWarning>) {
    let Some(size) = &record.physical_pixel_size else {
        return (None, Vec::new());
    };
    let factor = match size.unit.trim().to_lowercase().as_str() {
        "µm" | "um" | "micrometer" | "micrometers" | "micron" | "microns" => 1.0,
        "nm" | "nanometer" | "nanometers" => 1e-3,
        "mm" | "millimeter" | "millimeters" => 1e3,
        other => {
            return (
                None,
                vec![MetadataWarning::dropped(
                    "physical_pixel_size",
                    target,
                    format!("unknown unit `{}`", other),
                )],
            );
        }
    };
    (
        Some((size.x * factor, size.y * factor, size.z.map(|z| z * factor))),
        Vec::new(),
    )
}

/// OME pixel type string for the `Pixels/@Type` attribute.
pub fn ome_pixel_type(pixel_type: PixelType) -> &'static str {
    match pixel_type {
        PixelType::U8 => "uint8",
        PixelType::U16 => "uint16",
        PixelType::F32 => "float",
    }
}

/// Zarr v2 dtype string (little-endian).
pub fn zarr_dtype(pixel_type: PixelType) -> &'static str {
    match pixel_type {
        PixelType::U8 => "|u1",
        PixelType::U16 => "<u2",
        PixelType::F32 => "<f4",
    }
}

/// OME channel color: signed 32-bit RGBA.
pub fn ome_color(rgb: [u8; 3]) -> i32 {
    (((rgb[0] as u32) << 24) | ((rgb[1] as u32) << 16) | ((rgb[2] as u32) << 8) | 0xFF) as i32
}

/// Hex RGB string for the Zarr `omero` channel block.
pub fn hex_color(rgb: [u8; 3]) -> String {
    format!("{:02X}{:02X}{:02X}", rgb[0], rgb[1], rgb[2])
}
