//! # Container Seam
//!
//! The send path muxes access units into a byte stream written through a
//! [`ChunkWriter`]; the receive path demuxes the relayed byte stream back
//! into units. Both sides are reached through these traits so the wire
//! container can be swapped without touching the workers.

use std::io;

use thiserror::Error;

use crate::media::{EncodedUnit, StreamDescriptor};
use crate::packetizer::ChunkWriter;
use crate::relay::RelayReader;

pub mod framed;

pub use framed::{FramedDemuxer, FramedFormat, FramedMuxer};

#[derive(Debug, Error)]
pub enum DemuxError {
    /// No complete record yet; call again.
    #[error("no data available yet")]
    Again,
    #[error("end of stream")]
    Eof,
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("input error: {0}")]
    Io(#[from] io::Error),
}

pub trait Muxer: Send {
    fn write_header(&mut self) -> io::Result<()>;
    fn write_unit(&mut self, unit: &EncodedUnit) -> io::Result<()>;
    fn write_trailer(&mut self) -> io::Result<()>;
    fn writer_mut(&mut self) -> &mut ChunkWriter;
    fn into_writer(self: Box<Self>) -> ChunkWriter;
}

pub trait Demuxer: Send {
    /// Read until the stream table is known. Units seen before it are skipped.
    fn probe_streams(&mut self) -> Result<Vec<StreamDescriptor>, DemuxError>;
    fn read_next_unit(&mut self) -> Result<EncodedUnit, DemuxError>;
}

pub trait ContainerFormat: Send + Sync {
    fn name(&self) -> &'static str;
    fn open_muxer(
        &self,
        writer: ChunkWriter,
        streams: Vec<StreamDescriptor>,
    ) -> io::Result<Box<dyn Muxer>>;
    fn open_demuxer(&self, input: RelayReader) -> Box<dyn Demuxer>;
}
