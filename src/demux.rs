use std::io::Cursor;

use derivative::Derivative;
use tracing::{debug, info, warn};

use crate::{
    marshal::{
        avc::ParameterSetRecord,
        mp4::{
            ChunkOffsetBox, FileTypeBox, HandlerBox, MediaHeaderBox, MovieHeaderBox,
            SampleDescriptionBox, SampleSizeBox, SampleToChunkBox, SyncSampleBox,
            TrackHeaderBox, VisualSampleEntry,
        },
        Decode, Error, Result,
    },
    registry::BoxRegistry,
    sample_table::{self, SampleDescriptor},
    walker::Walker,
};

/// Tables decoded from one `trak`.
#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct TrackTables {
    pub header: Option<TrackHeaderBox>,
    pub media_header: Option<MediaHeaderBox>,
    pub handler: Option<HandlerBox>,
    pub visual: Option<VisualSampleEntry>,
    /// Number of `avc1` entries seen; only the first is used.
    pub sample_entries: u32,
    pub parameter_sets: Option<ParameterSetRecord>,
    #[derivative(Debug = "ignore")]
    pub chunk_offsets: Option<ChunkOffsetBox>,
    #[derivative(Debug = "ignore")]
    pub sample_to_chunk: Option<SampleToChunkBox>,
    #[derivative(Debug = "ignore")]
    pub sample_size: Option<SampleSizeBox>,
    #[derivative(Debug = "ignore")]
    pub sync_sample: Option<SyncSampleBox>,
}

fn require<'a, T>(value: &'a Option<T>, r#type: &'static str) -> Result<&'a T> {
    value.as_ref().ok_or(Error::InvalidBoxQuantity {
        r#type,
        quantity: 0,
        expected: 1,
    })
}

fn store<T>(slot: &mut Option<T>, value: T, r#type: &'static str) -> Result<()> {
    if slot.is_some() {
        return Err(Error::InvalidBoxQuantity {
            r#type,
            quantity: 2,
            expected: 1,
        });
    }
    *slot = Some(value);
    Ok(())
}

impl TrackTables {
    pub fn is_video(&self) -> bool {
        self.handler
            .as_ref()
            .map_or(true, |handler| handler.r#type == HandlerBox::VIDEO)
    }

    pub fn parameter_sets(&self) -> Result<&ParameterSetRecord> {
        require(&self.parameter_sets, "avcC")
    }

    /// 1-based numbers of the sync samples; empty when every sample is one.
    pub fn sync_samples(&self) -> &[u32] {
        self.sync_sample
            .as_ref()
            .map(|sync_sample| sync_sample.entries.as_slice())
            .unwrap_or_default()
    }

    /// Resolves every sample of the track to its byte range.
    pub fn samples(&self) -> Result<Vec<SampleDescriptor>> {
        let chunk_offsets = require(&self.chunk_offsets, "stco")?;
        let sample_to_chunk = require(&self.sample_to_chunk, "stsc")?;
        let sample_size = require(&self.sample_size, "stsz")?;
        sample_table::build(
            &chunk_offsets.entries,
            &sample_to_chunk.entries,
            sample_size,
        )
    }
}

/// Everything the tree walk found, owned by the caller.
#[derive(Debug, Default)]
pub struct Demux {
    pub file_type: Option<FileTypeBox>,
    pub movie_header: Option<MovieHeaderBox>,
    pub tracks: Vec<TrackTables>,
}

impl Demux {
    /// Walks every box in `source` with the standard registry.
    pub fn walk(source: &[u8]) -> Result<Self> {
        let mut demux = Demux::default();
        let mut input = Cursor::new(source);
        Walker::new(BoxRegistry::global()).walk(&mut input, source.len() as u64, &mut demux)?;
        Ok(demux)
    }

    /// The track that tables are currently decoded into. Tables outside any
    /// `trak` open an implicit one.
    fn track(&mut self) -> &mut TrackTables {
        if self.tracks.is_empty() {
            self.tracks.push(TrackTables::default());
        }
        let last = self.tracks.len() - 1;
        &mut self.tracks[last]
    }

    /// First video track carrying an AVC configuration record.
    pub fn video_track(&self) -> Result<&TrackTables> {
        self.tracks
            .iter()
            .find(|track| track.is_video() && track.parameter_sets.is_some())
            .ok_or(Error::NoVideoTrack)
    }

    pub fn log_summary(&self) {
        if let Some(file_type) = &self.file_type {
            info!(
                major_brand = %file_type.major_brand,
                minor_version = file_type.minor_version,
                "file type"
            );
        }
        if let Some(header) = &self.movie_header {
            info!(
                timescale = header.timescale,
                duration = header.duration,
                "movie"
            );
        }
        for (index, track) in self.tracks.iter().enumerate() {
            let handler = track
                .handler
                .as_ref()
                .map(|handler| handler.r#type.to_string())
                .unwrap_or_default();
            let samples = track
                .sample_size
                .as_ref()
                .map_or(0, SampleSizeBox::sample_count);
            let chunks = track
                .chunk_offsets
                .as_ref()
                .map_or(0, |chunk_offsets| chunk_offsets.entries.len());
            info!(index, %handler, samples, chunks, avc = track.parameter_sets.is_some(), "track");
            if !track.is_video() {
                warn!(index, %handler, "ignoring non-video track");
            }
        }
    }
}

pub(crate) fn begin_track(_input: &mut &[u8], demux: &mut Demux) -> Result<()> {
    demux.tracks.push(TrackTables::default());
    Ok(())
}

pub(crate) fn decode_file_type(input: &mut &[u8], demux: &mut Demux) -> Result<()> {
    let file_type = FileTypeBox::decode(input)?;
    debug!(?file_type);
    store(&mut demux.file_type, file_type, "ftyp")
}

pub(crate) fn decode_movie_header(input: &mut &[u8], demux: &mut Demux) -> Result<()> {
    let header = MovieHeaderBox::decode(input)?;
    debug!(?header);
    store(&mut demux.movie_header, header, "mvhd")
}

pub(crate) fn decode_track_header(input: &mut &[u8], demux: &mut Demux) -> Result<()> {
    let header = TrackHeaderBox::decode(input)?;
    debug!(
        track_id = header.track_id,
        width = %header.width,
        height = %header.height,
        duration = header.duration,
        "track header"
    );
    store(&mut demux.track().header, header, "tkhd")
}

pub(crate) fn decode_media_header(input: &mut &[u8], demux: &mut Demux) -> Result<()> {
    let header = MediaHeaderBox::decode(input)?;
    debug!(?header);
    store(&mut demux.track().media_header, header, "mdhd")
}

pub(crate) fn decode_handler(input: &mut &[u8], demux: &mut Demux) -> Result<()> {
    let handler = HandlerBox::decode(input)?;
    debug!(?handler);
    store(&mut demux.track().handler, handler, "hdlr")
}

pub(crate) fn decode_sample_description(input: &mut &[u8], _demux: &mut Demux) -> Result<()> {
    let description = SampleDescriptionBox::decode(input)?;
    debug!(entries = description.entry_count, "sample description");
    Ok(())
}

pub(crate) fn decode_visual_sample_entry(input: &mut &[u8], demux: &mut Demux) -> Result<()> {
    let entry = VisualSampleEntry::decode(input)?;
    debug!(
        width = entry.width,
        height = entry.height,
        compressor = %entry.compressor(),
        "visual sample entry"
    );
    let track = demux.track();
    track.sample_entries += 1;
    if track.sample_entries > 1 {
        warn!(entry = track.sample_entries, "ignoring additional sample entry");
        return Ok(());
    }
    store(&mut track.visual, entry, "avc1")
}

pub(crate) fn decode_parameter_sets(input: &mut &[u8], demux: &mut Demux) -> Result<()> {
    let record = ParameterSetRecord::decode(input)?;
    debug!(
        sps = record.sequence_parameter_sets.len(),
        pps = record.picture_parameter_sets.len(),
        nal_length_size = record.nal_length_size,
        profile = record.profile_indication,
        level = record.level_indication,
        "parameter sets"
    );
    let track = demux.track();
    if track.sample_entries > 1 && track.parameter_sets.is_some() {
        // belongs to an ignored sample entry
        return Ok(());
    }
    store(&mut track.parameter_sets, record, "avcC")
}

pub(crate) fn decode_chunk_offsets(input: &mut &[u8], demux: &mut Demux) -> Result<()> {
    let chunk_offsets = ChunkOffsetBox::decode(input)?;
    debug!(chunks = chunk_offsets.entries.len(), "chunk offsets");
    store(&mut demux.track().chunk_offsets, chunk_offsets, "stco")
}

pub(crate) fn decode_large_chunk_offsets(input: &mut &[u8], demux: &mut Demux) -> Result<()> {
    let chunk_offsets = ChunkOffsetBox::decode_large(input)?;
    debug!(chunks = chunk_offsets.entries.len(), "64-bit chunk offsets");
    store(&mut demux.track().chunk_offsets, chunk_offsets, "stco")
}

pub(crate) fn decode_sample_to_chunk(input: &mut &[u8], demux: &mut Demux) -> Result<()> {
    let sample_to_chunk = SampleToChunkBox::decode(input)?;
    debug!(runs = sample_to_chunk.entries.len(), "sample to chunk");
    store(&mut demux.track().sample_to_chunk, sample_to_chunk, "stsc")
}

pub(crate) fn decode_sample_size(input: &mut &[u8], demux: &mut Demux) -> Result<()> {
    let sample_size = SampleSizeBox::decode(input)?;
    debug!(samples = sample_size.sample_count(), "sample sizes");
    store(&mut demux.track().sample_size, sample_size, "stsz")
}

pub(crate) fn decode_sync_sample(input: &mut &[u8], demux: &mut Demux) -> Result<()> {
    let sync_sample = SyncSampleBox::decode(input)?;
    debug!(sync_samples = sync_sample.entries.len(), "sync samples");
    store(&mut demux.track().sync_sample, sync_sample, "stss")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::mp4::SampleToChunkEntry;

    fn handler(r#type: &[u8; 4]) -> HandlerBox {
        HandlerBox {
            r#type: crate::marshal::FourCC::from_bytes(*r#type),
            name: String::new(),
        }
    }

    fn parameter_sets() -> ParameterSetRecord {
        ParameterSetRecord {
            profile_indication: 66,
            profile_compatibility: 0,
            level_indication: 30,
            nal_length_size: 4,
            sequence_parameter_sets: vec![vec![0x67]],
            picture_parameter_sets: vec![vec![0x68]],
        }
    }

    #[test]
    fn picks_first_avc_video_track() {
        let demux = Demux {
            tracks: vec![
                TrackTables {
                    handler: Some(handler(b"soun")),
                    ..Default::default()
                },
                TrackTables {
                    handler: Some(handler(b"vide")),
                    ..Default::default()
                },
                TrackTables {
                    handler: Some(handler(b"vide")),
                    parameter_sets: Some(parameter_sets()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let track = demux.video_track().unwrap();
        assert!(track.parameter_sets.is_some());
    }

    #[test]
    fn no_video_track() {
        let demux = Demux {
            tracks: vec![TrackTables {
                handler: Some(handler(b"soun")),
                parameter_sets: Some(parameter_sets()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(demux.video_track(), Err(Error::NoVideoTrack)));
    }

    #[test]
    fn missing_table() {
        let track = TrackTables {
            chunk_offsets: Some(ChunkOffsetBox { entries: vec![0] }),
            sample_size: Some(SampleSizeBox::PerSample(vec![4])),
            ..Default::default()
        };
        assert!(matches!(
            track.samples(),
            Err(Error::InvalidBoxQuantity {
                r#type: "stsc",
                quantity: 0,
                ..
            })
        ));
    }

    #[test]
    fn repeated_table() {
        let mut demux = Demux::default();
        let data = [0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 8];
        decode_chunk_offsets(&mut data.as_slice(), &mut demux).unwrap();
        assert!(matches!(
            decode_chunk_offsets(&mut data.as_slice(), &mut demux),
            Err(Error::InvalidBoxQuantity {
                r#type: "stco",
                quantity: 2,
                ..
            })
        ));
    }

    #[test]
    fn first_sample_entry_wins() {
        use crate::test_util::boxed;

        let sample_entry = |sps: u8| {
            let record = [1, 0x42, 0, 0x1E, 0xFF, 0xE1, 0, 2, 0x67, sps, 1, 0, 1, 0x68];
            let mut body = vec![0; VisualSampleEntry::LENGTH as usize];
            body.extend_from_slice(&boxed(b"avcC", &record));
            boxed(b"avc1", &body)
        };
        let mut stsd = vec![0, 0, 0, 0, 0, 0, 0, 2];
        stsd.extend_from_slice(&sample_entry(1));
        stsd.extend_from_slice(&sample_entry(2));
        let data = boxed(b"stbl", &boxed(b"stsd", &stsd));

        let demux = Demux::walk(&data).unwrap();
        let track = &demux.tracks[0];
        assert_eq!(track.sample_entries, 2);
        assert_eq!(track.parameter_sets().unwrap().sps(), Some(&[0x67, 1][..]));
    }

    #[test]
    fn tables_follow_current_track() {
        let mut demux = Demux::default();
        let mut empty: &[u8] = &[];
        begin_track(&mut empty, &mut demux).unwrap();
        let runs = [0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 3, 0, 0, 0, 1];
        decode_sample_to_chunk(&mut runs.as_slice(), &mut demux).unwrap();
        begin_track(&mut empty, &mut demux).unwrap();
        decode_sample_to_chunk(&mut runs.as_slice(), &mut demux).unwrap();

        assert_eq!(demux.tracks.len(), 2);
        for track in &demux.tracks {
            assert_eq!(
                track.sample_to_chunk.as_ref().unwrap().entries,
                vec![SampleToChunkEntry {
                    first_chunk: 1,
                    samples_per_chunk: 3,
                    sample_description_index: 1,
                }]
            );
        }
    }
}
