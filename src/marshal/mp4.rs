use byteorder::{BigEndian, ReadBytesExt};
use derivative::Derivative;
use fixed::types::{U16F16, U8F8};

use crate::marshal::{
    decode_full_box_header, take, Decode, Error, FourCC, Language, Matrix, Result,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-12:2008
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Upper bound for preallocating `count` entries of `entry_size` bytes out of
/// `input`, so that a corrupt count cannot request more memory than the box
/// holds.
fn capacity(input: &[u8], count: u32, entry_size: usize) -> usize {
    (count as usize).min(input.len() / entry_size)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-12:2008 4.3
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct FileTypeBox {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
}

impl Decode for FileTypeBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let major_brand = Decode::decode(input)?;
        let minor_version = Decode::decode(input)?;
        let mut compatible_brands = vec![];
        while input.len() >= 4 {
            compatible_brands.push(Decode::decode(input)?);
        }
        Ok(Self {
            major_brand,
            minor_version,
            compatible_brands,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-12:2008 8.2.2
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct MovieHeaderBox {
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub rate: U16F16,
    pub volume: U8F8,
    pub matrix: Matrix,
    pub next_track_id: u32,
}

impl Decode for MovieHeaderBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let (version, _flags) = decode_full_box_header(input)?;

        let creation_time;
        let modification_time;
        let timescale;
        let duration;
        match version {
            0 => {
                creation_time = u32::decode(input)? as u64;
                modification_time = u32::decode(input)? as u64;
                timescale = Decode::decode(input)?;
                duration = u32::decode(input)? as u64;
            }
            1 => {
                creation_time = Decode::decode(input)?;
                modification_time = Decode::decode(input)?;
                timescale = Decode::decode(input)?;
                duration = Decode::decode(input)?;
            }
            version => {
                return Err(Error::UnsupportedVersion {
                    r#type: "mvhd",
                    version,
                })
            }
        }
        let rate = Decode::decode(input)?;
        let volume = Decode::decode(input)?;
        take(input, 2 + 4 + 4)?; // reserved
        let matrix = Decode::decode(input)?;
        take(input, 6 * 4)?; // pre_defined
        let next_track_id = Decode::decode(input)?;
        Ok(Self {
            creation_time,
            modification_time,
            timescale,
            duration,
            rate,
            volume,
            matrix,
            next_track_id,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-12:2008 8.3.2
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct TrackHeaderBox {
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub track_id: u32,
    pub duration: u64,
    pub layer: u16,
    pub alternate_group: u16,
    pub volume: U8F8,
    pub matrix: Matrix,
    pub width: U16F16,
    pub height: U16F16,
}

impl Decode for TrackHeaderBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let (version, flags) = decode_full_box_header(input)?;

        let creation_time;
        let modification_time;
        let track_id;
        let duration;
        match version {
            0 => {
                creation_time = u32::decode(input)? as u64;
                modification_time = u32::decode(input)? as u64;
                track_id = Decode::decode(input)?;
                take(input, 4)?; // reserved
                duration = u32::decode(input)? as u64;
            }
            1 => {
                creation_time = Decode::decode(input)?;
                modification_time = Decode::decode(input)?;
                track_id = Decode::decode(input)?;
                take(input, 4)?; // reserved
                duration = Decode::decode(input)?;
            }
            version => {
                return Err(Error::UnsupportedVersion {
                    r#type: "tkhd",
                    version,
                })
            }
        }
        take(input, 4 + 4)?; // reserved
        let layer = Decode::decode(input)?;
        let alternate_group = Decode::decode(input)?;
        let volume = Decode::decode(input)?;
        take(input, 2)?; // reserved
        let matrix = Decode::decode(input)?;
        let width = Decode::decode(input)?;
        let height = Decode::decode(input)?;
        Ok(Self {
            flags,
            creation_time,
            modification_time,
            track_id,
            duration,
            layer,
            alternate_group,
            volume,
            matrix,
            width,
            height,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-12:2008 8.4.2
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct MediaHeaderBox {
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub language: Language,
}

impl Decode for MediaHeaderBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let (version, _flags) = decode_full_box_header(input)?;

        let creation_time;
        let modification_time;
        let timescale;
        let duration;
        match version {
            0 => {
                creation_time = u32::decode(input)? as u64;
                modification_time = u32::decode(input)? as u64;
                timescale = Decode::decode(input)?;
                duration = u32::decode(input)? as u64;
            }
            1 => {
                creation_time = Decode::decode(input)?;
                modification_time = Decode::decode(input)?;
                timescale = Decode::decode(input)?;
                duration = Decode::decode(input)?;
            }
            version => {
                return Err(Error::UnsupportedVersion {
                    r#type: "mdhd",
                    version,
                })
            }
        }
        let language = Language(Decode::decode(input)?);
        Ok(Self {
            creation_time,
            modification_time,
            timescale,
            duration,
            language,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-12:2008 8.4.3
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct HandlerBox {
    pub r#type: FourCC,
    pub name: String,
}

impl HandlerBox {
    pub const VIDEO: FourCC = FourCC::from_bytes(*b"vide");
}

impl Decode for HandlerBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        decode_full_box_header(input)?;

        take(input, 4)?; // pre_defined
        let r#type = Decode::decode(input)?;
        take(input, 3 * 4)?; // reserved
        let name = Decode::decode(input)?;
        Ok(Self { r#type, name })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-12:2008 8.5.2
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Fields preceding the sample entries of a `stsd` box.
#[derive(Debug)]
pub struct SampleDescriptionBox {
    pub entry_count: u32,
}

impl SampleDescriptionBox {
    pub const PREAMBLE_LENGTH: u64 = 1 + 3 + 4;
}

impl Decode for SampleDescriptionBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        decode_full_box_header(input)?;
        Ok(Self {
            entry_count: Decode::decode(input)?,
        })
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct VisualSampleEntry {
    pub data_reference_index: u16,
    pub width: u16,
    pub height: u16,
    pub horizresolution: U16F16,
    pub vertresolution: U16F16,
    pub frame_count: u16,
    #[derivative(Debug = "ignore")]
    pub compressorname: [u8; 32],
    pub depth: u16,
}

impl VisualSampleEntry {
    pub const LENGTH: u64 = 6 + 2 + 2 + 2 + 3 * 4 + 2 + 2 + 4 + 4 + 4 + 2 + 32 + 2 + 2;

    /// Compressor name, stored as a length-prefixed string in a 32 byte field.
    pub fn compressor(&self) -> String {
        let length = (self.compressorname[0] as usize).min(31);
        String::from_utf8_lossy(&self.compressorname[1..1 + length]).into_owned()
    }
}

impl Decode for VisualSampleEntry {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        take(input, 6)?; // reserved
        let data_reference_index = Decode::decode(input)?;

        take(input, 2 + 2 + 3 * 4)?; // pre_defined, reserved, pre_defined
        let width = Decode::decode(input)?;
        let height = Decode::decode(input)?;
        let horizresolution = Decode::decode(input)?;
        let vertresolution = Decode::decode(input)?;
        take(input, 4)?; // reserved
        let frame_count = Decode::decode(input)?;
        let mut compressorname = [0u8; 32];
        compressorname.copy_from_slice(take(input, 32)?);
        let depth = Decode::decode(input)?;
        take(input, 2)?; // pre_defined
        Ok(Self {
            data_reference_index,
            width,
            height,
            horizresolution,
            vertresolution,
            frame_count,
            compressorname,
            depth,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-12:2008 8.7.3
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSizeBox {
    Constant { sample_size: u32, sample_count: u32 },
    PerSample(Vec<u32>),
}

impl SampleSizeBox {
    pub fn sample_count(&self) -> u32 {
        match self {
            SampleSizeBox::Constant { sample_count, .. } => *sample_count,
            SampleSizeBox::PerSample(sizes) => sizes.len() as u32,
        }
    }

    /// Size of the sample at the 0-based `index`.
    pub fn get(&self, index: u32) -> Option<u32> {
        match self {
            SampleSizeBox::Constant {
                sample_size,
                sample_count,
            } => (index < *sample_count).then_some(*sample_size),
            SampleSizeBox::PerSample(sizes) => sizes.get(index as usize).copied(),
        }
    }
}

impl Decode for SampleSizeBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        decode_full_box_header(input)?;

        let sample_size = u32::decode(input)?;
        let sample_count = u32::decode(input)?;
        if sample_size != 0 {
            return Ok(SampleSizeBox::Constant {
                sample_size,
                sample_count,
            });
        }

        let mut sizes = Vec::with_capacity(capacity(input, sample_count, 4));
        for _ in 0..sample_count {
            sizes.push(u32::decode(input)?);
        }
        Ok(SampleSizeBox::PerSample(sizes))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-12:2008 8.7.4
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleToChunkEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleToChunkBox {
    pub entries: Vec<SampleToChunkEntry>,
}

impl Decode for SampleToChunkBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        decode_full_box_header(input)?;

        let entry_count = u32::decode(input)?;
        let mut entries = Vec::with_capacity(capacity(input, entry_count, 3 * 4));
        for _ in 0..entry_count {
            entries.push(SampleToChunkEntry {
                first_chunk: Decode::decode(input)?,
                samples_per_chunk: Decode::decode(input)?,
                sample_description_index: Decode::decode(input)?,
            });
        }
        Ok(Self { entries })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-12:2008 8.7.5
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOffsetBox {
    pub entries: Vec<u64>,
}

impl ChunkOffsetBox {
    /// Decodes the 64-bit variant, `co64`.
    pub fn decode_large(input: &mut &[u8]) -> Result<Self> {
        decode_full_box_header(input)?;

        let entry_count = u32::decode(input)?;
        let mut entries = Vec::with_capacity(capacity(input, entry_count, 8));
        for _ in 0..entry_count {
            entries.push(input.read_u64::<BigEndian>()?);
        }
        Ok(Self { entries })
    }
}

impl Decode for ChunkOffsetBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        decode_full_box_header(input)?;

        let entry_count = u32::decode(input)?;
        let mut entries = Vec::with_capacity(capacity(input, entry_count, 4));
        for _ in 0..entry_count {
            entries.push(input.read_u32::<BigEndian>()? as u64);
        }
        Ok(Self { entries })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-12:2008 8.6.2
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSampleBox {
    /// 1-based sample numbers.
    pub entries: Vec<u32>,
}

impl Decode for SyncSampleBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        decode_full_box_header(input)?;

        let entry_count = u32::decode(input)?;
        let mut entries = Vec::with_capacity(capacity(input, entry_count, 4));
        for _ in 0..entry_count {
            entries.push(Decode::decode(input)?);
        }
        Ok(Self { entries })
    }
}
