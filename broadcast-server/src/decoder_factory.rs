//! The concrete `DemoDecoderFactory` this binary ships with.
//!
//! The demo byte-format decoder is an external collaborator, assumed
//! available as a library; `dem-proto::DemoDecoder` is the contract that
//! library is expected to satisfy. No such crate is
//! vendored here, so this factory opens the file just far enough to report
//! a real header (map name, by filename fallback, matching
//! `DemoReader::ensure_context`'s own fallback) and otherwise returns an
//! empty decoder: zero fields, zero events, zero ticks. Swapping in a real
//! decoder crate means replacing this one factory, nothing upstream of it.

use std::path::Path;

use dem_proto::{DecoderResult, DemoDecoder, DemoDecoderFactory, DemoHeader, FakeDecoder};

pub struct PlaceholderDecoderFactory;

impl DemoDecoderFactory for PlaceholderDecoderFactory {
    fn open(&self, path: &Path) -> DecoderResult<Box<dyn DemoDecoder>> {
        let map_name = path.file_stem().and_then(|s| s.to_str()).map(str::to_string);
        let decoder = FakeDecoder::new().with_header(DemoHeader { map_name, ..Default::default() });
        Ok(Box::new(decoder))
    }
}
