use std::{collections::HashMap, sync::OnceLock};

use bstringify::bstringify;

use crate::{
    demux::{self, Demux},
    marshal::{
        mp4::{SampleDescriptionBox, VisualSampleEntry},
        Error, FourCC, Result,
    },
};

/// Decodes a box body (or a container's preamble) into the demux context.
pub type BoxDecoder = fn(&mut &[u8], &mut Demux) -> Result<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxKind {
    /// Holds child boxes after `preamble` bytes of fixed fields.
    Container { preamble: u64 },
    Leaf,
}

#[derive(Debug, Clone, Copy)]
pub struct HandlerEntry {
    pub tag: FourCC,
    pub kind: BoxKind,
    /// For containers, decodes the preamble. A leaf without one is skipped.
    pub decode: Option<BoxDecoder>,
}

#[derive(Debug, Default)]
pub struct BoxRegistry {
    entries: HashMap<FourCC, HandlerEntry>,
}

macro_rules! register_boxes {(
    $registry:ident,
    $(
        $tag:ident => $kind:expr, $decode:expr
    );* $(;)?
) => (
    $(
        $registry.insert(HandlerEntry {
            tag: FourCC::from_bytes(*bstringify!($tag)),
            kind: $kind,
            decode: $decode,
        });
    )*
)}

const CONTAINER: BoxKind = BoxKind::Container { preamble: 0 };

impl BoxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The boxes needed to extract an AVC track.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        register_boxes!(registry,
            moov => CONTAINER, None;
            trak => CONTAINER, Some(demux::begin_track);
            mdia => CONTAINER, None;
            minf => CONTAINER, None;
            dinf => CONTAINER, None;
            stbl => CONTAINER, None;
            stsd => BoxKind::Container { preamble: SampleDescriptionBox::PREAMBLE_LENGTH },
                Some(demux::decode_sample_description);
            avc1 => BoxKind::Container { preamble: VisualSampleEntry::LENGTH },
                Some(demux::decode_visual_sample_entry);

            ftyp => BoxKind::Leaf, Some(demux::decode_file_type);
            mvhd => BoxKind::Leaf, Some(demux::decode_movie_header);
            tkhd => BoxKind::Leaf, Some(demux::decode_track_header);
            mdhd => BoxKind::Leaf, Some(demux::decode_media_header);
            hdlr => BoxKind::Leaf, Some(demux::decode_handler);
            avcC => BoxKind::Leaf, Some(demux::decode_parameter_sets);
            stco => BoxKind::Leaf, Some(demux::decode_chunk_offsets);
            co64 => BoxKind::Leaf, Some(demux::decode_large_chunk_offsets);
            stsc => BoxKind::Leaf, Some(demux::decode_sample_to_chunk);
            stsz => BoxKind::Leaf, Some(demux::decode_sample_size);
            stss => BoxKind::Leaf, Some(demux::decode_sync_sample);

            mdat => BoxKind::Leaf, None;
            free => BoxKind::Leaf, None;
            skip => BoxKind::Leaf, None;
            wide => BoxKind::Leaf, None;
            udta => BoxKind::Leaf, None;
            edts => BoxKind::Leaf, None;
            stts => BoxKind::Leaf, None;
            ctts => BoxKind::Leaf, None;
            vmhd => BoxKind::Leaf, None;
            dref => BoxKind::Leaf, None;
        );
        registry
    }

    /// Shared instance of [`BoxRegistry::standard`], built on first use.
    pub fn global() -> &'static BoxRegistry {
        static REGISTRY: OnceLock<BoxRegistry> = OnceLock::new();
        REGISTRY.get_or_init(BoxRegistry::standard)
    }

    fn insert(&mut self, entry: HandlerEntry) {
        let previous = self.entries.insert(entry.tag, entry);
        debug_assert!(previous.is_none(), "{} registered twice", entry.tag);
    }

    pub fn register(&mut self, tag: FourCC, kind: BoxKind, decode: Option<BoxDecoder>) -> Result<()> {
        if self.entries.contains_key(&tag) {
            return Err(Error::DuplicateTag(tag));
        }
        self.insert(HandlerEntry { tag, kind, decode });
        Ok(())
    }

    pub fn lookup(&self, tag: FourCC) -> Option<&HandlerEntry> {
        self.entries.get(&tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
