use std::{
    collections::HashSet,
    io::{Read, Seek, SeekFrom, Write},
    str::FromStr,
};

use byteorder::{BigEndian, ByteOrder};
use tracing::{trace, warn};

use crate::{
    marshal::{avc::ParameterSetRecord, Error, Result},
    sample_table::SampleDescriptor,
};

pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Where SPS and PPS are written into the output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterSetPolicy {
    /// Once, ahead of the first sample.
    StreamHead,
    /// Ahead of the first sample and again ahead of every sync sample.
    #[default]
    SyncSamples,
}

impl FromStr for ParameterSetPolicy {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "stream-head" => Ok(Self::StreamHead),
            "sync-samples" => Ok(Self::SyncSamples),
            _ => Err(value.to_owned()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub samples: u32,
    pub nal_units: u64,
    pub parameter_set_injections: u32,
    pub bytes_written: u64,
}

/// Rewrites length-prefixed samples as an Annex-B byte stream.
#[derive(Debug)]
pub struct Assembler {
    nal_length_size: usize,
    parameter_sets: Vec<Vec<u8>>,
    sync_samples: HashSet<u32>,
    policy: ParameterSetPolicy,
}

impl Assembler {
    pub fn new(record: &ParameterSetRecord, sync_samples: &[u32]) -> Self {
        Self {
            nal_length_size: record.nal_length_size as usize,
            parameter_sets: record.nal_units().map(<[u8]>::to_vec).collect(),
            sync_samples: sync_samples.iter().copied().collect(),
            policy: ParameterSetPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ParameterSetPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn injects_before(&self, position: usize, sample: &SampleDescriptor) -> bool {
        position == 0
            || (self.policy == ParameterSetPolicy::SyncSamples
                && self.sync_samples.contains(&sample.sample_number()))
    }

    /// Reads each sample from `source` and writes its NAL units to `sink`.
    pub fn assemble<R: Read + Seek, W: Write>(
        &self,
        samples: &[SampleDescriptor],
        source: &mut R,
        sink: &mut W,
    ) -> Result<AssemblyStats> {
        let mut stats = AssemblyStats::default();
        let mut payload = Vec::new();
        for (position, sample) in samples.iter().enumerate() {
            if self.injects_before(position, sample) {
                for parameter_set in &self.parameter_sets {
                    write_nal_unit(sink, parameter_set, &mut stats)?;
                }
                stats.parameter_set_injections += 1;
            }

            read_sample(source, sample, &mut payload)?;
            trace!(
                sample = sample.sample_index,
                offset = sample.byte_offset,
                length = sample.byte_length,
                "sample"
            );
            self.write_sample(sink, sample, &payload, &mut stats)?;
            stats.samples += 1;
        }
        Ok(stats)
    }

    fn write_sample<W: Write>(
        &self,
        sink: &mut W,
        sample: &SampleDescriptor,
        payload: &[u8],
        stats: &mut AssemblyStats,
    ) -> Result<()> {
        let malformed = |offset| Error::MalformedPayload {
            sample_index: sample.sample_index,
            offset,
        };

        let mut offset = sample.byte_offset;
        let mut remaining = payload;
        while !remaining.is_empty() {
            if remaining.len() < self.nal_length_size {
                return Err(malformed(offset));
            }
            let (prefix, rest) = remaining.split_at(self.nal_length_size);
            let length = BigEndian::read_uint(prefix, self.nal_length_size);
            if length > rest.len() as u64 {
                return Err(malformed(offset));
            }
            let (nal_unit, rest) = rest.split_at(length as usize);
            if nal_unit.is_empty() {
                warn!(sample = sample.sample_index, offset, "dropping empty NAL unit");
            } else {
                write_nal_unit(sink, nal_unit, stats)?;
            }
            offset += (self.nal_length_size as u64) + length;
            remaining = rest;
        }
        Ok(())
    }
}

fn read_sample<R: Read + Seek>(
    source: &mut R,
    sample: &SampleDescriptor,
    payload: &mut Vec<u8>,
) -> Result<()> {
    source.seek(SeekFrom::Start(sample.byte_offset))?;
    payload.clear();
    // grows with the bytes actually present, not the declared length
    source
        .by_ref()
        .take(sample.byte_length as u64)
        .read_to_end(payload)?;
    if payload.len() < sample.byte_length as usize {
        return Err(Error::ShortRead {
            sample_index: sample.sample_index,
            offset: sample.byte_offset,
            length: sample.byte_length,
        });
    }
    Ok(())
}

fn write_nal_unit<W: Write>(sink: &mut W, nal_unit: &[u8], stats: &mut AssemblyStats) -> Result<()> {
    sink.write_all(&START_CODE)?;
    sink.write_all(nal_unit)?;
    stats.nal_units += 1;
    stats.bytes_written += (START_CODE.len() + nal_unit.len()) as u64;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn record(nal_length_size: u8) -> ParameterSetRecord {
        ParameterSetRecord {
            profile_indication: 66,
            profile_compatibility: 0xC0,
            level_indication: 30,
            nal_length_size,
            sequence_parameter_sets: vec![vec![0xAA]],
            picture_parameter_sets: vec![vec![0xBB]],
        }
    }

    /// Lays `samples` out back to back from offset 0.
    fn source(samples: &[Vec<u8>]) -> (Vec<u8>, Vec<SampleDescriptor>) {
        let mut data = Vec::new();
        let mut descriptors = Vec::new();
        for (index, sample) in samples.iter().enumerate() {
            descriptors.push(SampleDescriptor {
                sample_index: index as u32,
                chunk_index: 0,
                byte_offset: data.len() as u64,
                byte_length: sample.len() as u32,
            });
            data.extend_from_slice(sample);
        }
        (data, descriptors)
    }

    fn prefixed(units: &[&[u8]]) -> Vec<u8> {
        let mut sample = Vec::new();
        for unit in units {
            sample.extend_from_slice(&(unit.len() as u32).to_be_bytes());
            sample.extend_from_slice(unit);
        }
        sample
    }

    fn annex_b(units: &[&[u8]]) -> Vec<u8> {
        let mut stream = Vec::new();
        for unit in units {
            stream.extend_from_slice(&START_CODE);
            stream.extend_from_slice(unit);
        }
        stream
    }

    fn assemble(
        assembler: &Assembler,
        data: &[u8],
        descriptors: &[SampleDescriptor],
    ) -> Result<(Vec<u8>, AssemblyStats)> {
        let mut output = Vec::new();
        let stats = assembler.assemble(descriptors, &mut Cursor::new(data), &mut output)?;
        Ok((output, stats))
    }

    #[test]
    fn parameter_sets_lead_the_stream() {
        let first: &[u8] = &[0x65, 1, 2, 3, 4, 5];
        let second: &[u8] = &[0x41, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let (data, descriptors) = source(&[prefixed(&[first]), prefixed(&[second])]);
        assert_eq!(descriptors[0].byte_length, 10);
        assert_eq!(descriptors[1].byte_length, 15);

        let assembler = Assembler::new(&record(4), &[]);
        let (output, stats) = assemble(&assembler, &data, &descriptors).unwrap();
        assert_eq!(output, annex_b(&[&[0xAA], &[0xBB], first, second]));
        assert_eq!(
            stats,
            AssemblyStats {
                samples: 2,
                nal_units: 4,
                parameter_set_injections: 1,
                bytes_written: output.len() as u64,
            }
        );
    }

    #[test]
    fn every_nal_unit_of_a_sample() {
        let units: [&[u8]; 3] = [&[0x06, 0xFF], &[0x65, 1], &[0x65, 2, 3]];
        let (data, descriptors) = source(&[prefixed(&units)]);

        let assembler = Assembler::new(&record(4), &[]);
        let (output, stats) = assemble(&assembler, &data, &descriptors).unwrap();
        assert_eq!(output, annex_b(&[&[0xAA], &[0xBB], units[0], units[1], units[2]]));
        assert_eq!(stats.nal_units, 5);
    }

    #[test]
    fn parameter_sets_repeat_at_sync_samples() {
        let samples: Vec<Vec<u8>> = (0..4u8).map(|index| prefixed(&[&[0x65, index]])).collect();
        let (data, descriptors) = source(&samples);
        let assembler = Assembler::new(&record(4), &[1, 3]);

        let (output, stats) = assemble(&assembler, &data, &descriptors).unwrap();
        assert_eq!(
            output,
            annex_b(&[
                &[0xAA],
                &[0xBB],
                &[0x65, 0],
                &[0x65, 1],
                &[0xAA],
                &[0xBB],
                &[0x65, 2],
                &[0x65, 3],
            ])
        );
        assert_eq!(stats.parameter_set_injections, 2);

        let assembler = assembler.with_policy(ParameterSetPolicy::StreamHead);
        let (output, stats) = assemble(&assembler, &data, &descriptors).unwrap();
        assert_eq!(
            output,
            annex_b(&[&[0xAA], &[0xBB], &[0x65, 0], &[0x65, 1], &[0x65, 2], &[0x65, 3]])
        );
        assert_eq!(stats.parameter_set_injections, 1);
    }

    #[test]
    fn two_byte_length_prefix() {
        let data = [0, 3, 0x65, 7, 8, 0, 1, 0x41];
        let descriptors = [SampleDescriptor {
            sample_index: 0,
            chunk_index: 0,
            byte_offset: 0,
            byte_length: data.len() as u32,
        }];

        let assembler = Assembler::new(&record(2), &[]);
        let (output, _) = assemble(&assembler, &data, &descriptors).unwrap();
        assert_eq!(output, annex_b(&[&[0xAA], &[0xBB], &[0x65, 7, 8], &[0x41]]));
    }

    #[test]
    fn empty_nal_unit_is_dropped() {
        let (data, descriptors) = source(&[prefixed(&[&[], &[0x65, 9]])]);

        let assembler = Assembler::new(&record(4), &[]);
        let (output, stats) = assemble(&assembler, &data, &descriptors).unwrap();
        assert_eq!(output, annex_b(&[&[0xAA], &[0xBB], &[0x65, 9]]));
        assert_eq!(stats.nal_units, 3);
    }

    #[test]
    fn sample_past_end_of_source() {
        let data = prefixed(&[&[0x65, 1, 2]]);
        let descriptors = [SampleDescriptor {
            sample_index: 5,
            chunk_index: 0,
            byte_offset: 4,
            byte_length: data.len() as u32,
        }];

        let result = assemble(&Assembler::new(&record(4), &[]), &data, &descriptors);
        assert!(matches!(
            result,
            Err(Error::ShortRead {
                sample_index: 5,
                offset: 4,
                length: 7,
            })
        ));
    }

    #[test]
    fn declared_length_beyond_source() {
        let data = [0u8; 64];
        let descriptors = [SampleDescriptor {
            sample_index: 0,
            chunk_index: 0,
            byte_offset: 8,
            byte_length: u32::MAX,
        }];

        let result = assemble(&Assembler::new(&record(4), &[]), &data, &descriptors);
        assert!(matches!(
            result,
            Err(Error::ShortRead {
                offset: 8,
                length: u32::MAX,
                ..
            })
        ));
    }

    #[test]
    fn nal_unit_overruns_sample() {
        let mut data = prefixed(&[&[0x65, 1, 2]]);
        data[3] = 9;
        let (_, descriptors) = source(&[data.clone()]);

        let result = assemble(&Assembler::new(&record(4), &[]), &data, &descriptors);
        assert!(matches!(
            result,
            Err(Error::MalformedPayload {
                sample_index: 0,
                offset: 0,
            })
        ));

        // a trailing partial length prefix
        let mut data = prefixed(&[&[0x65, 1]]);
        data.extend_from_slice(&[0, 0]);
        let (_, descriptors) = source(&[data.clone()]);

        let result = assemble(&Assembler::new(&record(4), &[]), &data, &descriptors);
        assert!(matches!(
            result,
            Err(Error::MalformedPayload { offset: 6, .. })
        ));
    }

    #[test]
    fn policy_names() {
        assert_eq!("stream-head".parse::<ParameterSetPolicy>(), Ok(ParameterSetPolicy::StreamHead));
        assert_eq!("sync-samples".parse::<ParameterSetPolicy>(), Ok(ParameterSetPolicy::SyncSamples));
        assert_eq!(
            "always".parse::<ParameterSetPolicy>(),
            Err("always".to_owned())
        );
    }
}
