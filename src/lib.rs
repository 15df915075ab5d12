use std::{
    fs::{self, File},
    io::{BufWriter, Cursor, Write},
    path::Path,
};

use memmap2::Mmap;
use tracing::{info, warn};

pub mod annexb;
pub mod config;
pub mod demux;
pub mod marshal;
pub mod registry;
pub mod sample_table;
pub mod walker;

#[cfg(test)]
pub(crate) mod test_util;

pub use annexb::{Assembler, AssemblyStats, ParameterSetPolicy};
pub use config::Config;
pub use demux::Demux;
pub use marshal::{Error, Result};
pub use sample_table::SampleDescriptor;

/// Walks `source` and resolves the samples of its first AVC video track.
fn prepare(
    source: &[u8],
    policy: ParameterSetPolicy,
) -> Result<(Assembler, Vec<SampleDescriptor>)> {
    let demux = Demux::walk(source)?;
    demux.log_summary();

    let track = demux.video_track()?;
    let samples = track.samples()?;
    let assembler =
        Assembler::new(track.parameter_sets()?, track.sync_samples()).with_policy(policy);
    Ok((assembler, samples))
}

/// Extracts the first AVC video track of the container in `source` and
/// writes it to `sink` as an Annex-B elementary stream.
pub fn extract<W: Write>(
    source: &[u8],
    sink: &mut W,
    policy: ParameterSetPolicy,
) -> Result<AssemblyStats> {
    let (assembler, samples) = prepare(source, policy)?;
    assembler.assemble(&samples, &mut Cursor::new(source), sink)
}

/// Like [`extract`], reading `input` and writing `config.output`. The output
/// is only created once the tables are known to be usable, and is removed
/// again if assembly fails.
pub fn extract_file(input: &Path, config: &Config) -> Result<AssemblyStats> {
    let file = File::open(input)?;
    // SAFETY: the map is only read, and the input is not modified while extracting.
    let source = unsafe { Mmap::map(&file)? };
    let (assembler, samples) = prepare(&source, config.policy)?;

    let mut sink = BufWriter::new(File::create(&config.output)?);
    let written = assembler
        .assemble(&samples, &mut Cursor::new(&source[..]), &mut sink)
        .and_then(|stats| {
            sink.flush()?;
            Ok(stats)
        });
    let stats = match written {
        Ok(stats) => stats,
        Err(error) => {
            drop(sink);
            if let Err(remove_error) = fs::remove_file(&config.output) {
                warn!(
                    output = %config.output.display(),
                    %remove_error,
                    "partial output left behind"
                );
            }
            return Err(error);
        }
    };

    info!(
        input = %input.display(),
        output = %config.output.display(),
        samples = stats.samples,
        nal_units = stats.nal_units,
        parameter_set_injections = stats.parameter_set_injections,
        bytes = stats.bytes_written,
        "extracted"
    );
    Ok(stats)
}
