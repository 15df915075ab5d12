use crate::marshal::{
    mp4::{SampleSizeBox, SampleToChunkEntry},
    Error, Result,
};

/// Where one sample lives in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleDescriptor {
    /// 0-based, in decode order.
    pub sample_index: u32,
    /// 0-based.
    pub chunk_index: u32,
    pub byte_offset: u64,
    pub byte_length: u32,
}

impl SampleDescriptor {
    /// 1-based sample number, as used by `stss`.
    pub fn sample_number(&self) -> u32 {
        self.sample_index + 1
    }
}

/// Number of samples in each chunk, expanded from the `stsc` runs.
fn samples_per_chunk(chunk_count: usize, runs: &[SampleToChunkEntry]) -> Result<Vec<u32>> {
    if chunk_count == 0 {
        return Ok(Vec::new());
    }
    match runs.first() {
        Some(run) if run.first_chunk == 1 => {}
        Some(run) => {
            return Err(Error::InconsistentTables(format!(
                "first sample-to-chunk run starts at chunk {}",
                run.first_chunk
            )))
        }
        None => {
            return Err(Error::InconsistentTables(format!(
                "{chunk_count} chunks but no sample-to-chunk runs"
            )))
        }
    }

    let mut counts = Vec::with_capacity(chunk_count);
    for (index, run) in runs.iter().enumerate() {
        let last_chunk = match runs.get(index + 1) {
            Some(next) if next.first_chunk <= run.first_chunk => {
                return Err(Error::InconsistentTables(format!(
                    "sample-to-chunk run {} starts at chunk {} after chunk {}",
                    index + 1,
                    next.first_chunk,
                    run.first_chunk
                )))
            }
            Some(next) => next.first_chunk as usize - 1,
            None => chunk_count,
        };
        if last_chunk > chunk_count {
            return Err(Error::InconsistentTables(format!(
                "sample-to-chunk run {} starts past the last chunk {chunk_count}",
                index + 1
            )));
        }
        counts.resize(last_chunk, run.samples_per_chunk);
    }
    Ok(counts)
}

/// Resolves every sample to its chunk, byte offset and length.
pub fn build(
    chunk_offsets: &[u64],
    runs: &[SampleToChunkEntry],
    sizes: &SampleSizeBox,
) -> Result<Vec<SampleDescriptor>> {
    let sample_count = sizes.sample_count();
    let counts = samples_per_chunk(chunk_offsets.len(), runs)?;

    // the final chunk may come up short, but must hold at least one sample
    let declared: u64 = counts.iter().map(|&count| count as u64).sum();
    let last = counts.last().map_or(0, |&count| count as u64);
    let minimum = declared - last + last.min(1);
    if !(minimum..=declared).contains(&(sample_count as u64)) {
        return Err(Error::InconsistentTables(format!(
            "chunks hold {declared} samples, the size table {sample_count}"
        )));
    }

    let mut samples = Vec::with_capacity(sample_count as usize);
    let mut sample_index = 0u32;
    for (chunk_index, (&chunk_offset, &count)) in chunk_offsets.iter().zip(&counts).enumerate() {
        let last_chunk = chunk_index + 1 == chunk_offsets.len();
        let mut byte_offset = chunk_offset;
        for taken in 0..count {
            let Some(byte_length) = sizes.get(sample_index) else {
                // only the final chunk may come up short
                if last_chunk && taken > 0 {
                    break;
                }
                return Err(Error::InconsistentTables(format!(
                    "chunks hold more than the {sample_count} samples in the size table"
                )));
            };
            samples.push(SampleDescriptor {
                sample_index,
                chunk_index: chunk_index as u32,
                byte_offset,
                byte_length,
            });
            byte_offset = byte_offset
                .checked_add(byte_length as u64)
                .ok_or_else(|| {
                    Error::InconsistentTables(format!(
                        "sample {sample_index} overflows the file offset range"
                    ))
                })?;
            sample_index += 1;
        }
    }

    if sample_index != sample_count {
        return Err(Error::InconsistentTables(format!(
            "chunks hold {sample_index} samples, the size table {sample_count}"
        )));
    }
    Ok(samples)
}
