use byteorder::ReadBytesExt;

use crate::marshal::{take, Decode, Error, Result};

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-15 5.3.3.1
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Body of an `avcC` box: the parameter sets needed ahead of the coded
/// frames, and the width of the length prefix in front of each NAL unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSetRecord {
    pub profile_indication: u8,
    pub profile_compatibility: u8,
    pub level_indication: u8,
    /// 1, 2 or 4.
    pub nal_length_size: u8,
    pub sequence_parameter_sets: Vec<Vec<u8>>,
    pub picture_parameter_sets: Vec<Vec<u8>>,
}

impl ParameterSetRecord {
    pub fn sps(&self) -> Option<&[u8]> {
        self.sequence_parameter_sets.first().map(Vec::as_slice)
    }

    pub fn pps(&self) -> Option<&[u8]> {
        self.picture_parameter_sets.first().map(Vec::as_slice)
    }

    /// Every SPS followed by every PPS, in record order.
    pub fn nal_units(&self) -> impl Iterator<Item = &[u8]> {
        self.sequence_parameter_sets
            .iter()
            .chain(&self.picture_parameter_sets)
            .map(Vec::as_slice)
    }
}

fn decode_parameter_sets(input: &mut &[u8], count: u8) -> Result<Vec<Vec<u8>>> {
    let mut parameter_sets = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let length = u16::decode(input)?;
        parameter_sets.push(take(input, length as usize)?.to_vec());
    }
    Ok(parameter_sets)
}

impl Decode for ParameterSetRecord {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let configuration_version = input.read_u8()?;
        if configuration_version != 1 {
            return Err(Error::InvalidConfiguration(
                "unsupported configuration version",
            ));
        }
        let profile_indication = input.read_u8()?;
        let profile_compatibility = input.read_u8()?;
        let level_indication = input.read_u8()?;
        let nal_length_size = (input.read_u8()? & 0x03) + 1;
        if nal_length_size == 3 {
            return Err(Error::InvalidConfiguration("NAL length size of 3 bytes"));
        }

        let sps_count = input.read_u8()? & 0x1F;
        if sps_count == 0 {
            return Err(Error::InvalidConfiguration("no sequence parameter set"));
        }
        let sequence_parameter_sets = decode_parameter_sets(input, sps_count)?;
        let pps_count = input.read_u8()?;
        if pps_count == 0 {
            return Err(Error::InvalidConfiguration("no picture parameter set"));
        }
        let picture_parameter_sets = decode_parameter_sets(input, pps_count)?;
        // high profile extension fields (chroma format, bit depth, SPS ext) are not needed

        Ok(Self {
            profile_indication,
            profile_compatibility,
            level_indication,
            nal_length_size,
            sequence_parameter_sets,
            picture_parameter_sets,
        })
    }
}
