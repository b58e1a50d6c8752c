#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! Chunkstream is an async streaming tokenizer and chunk traversal engine for
//! binary media containers, written in Rust.
//! The library offers:
//!  * A [`Tokenizer`] abstraction over files, async byte streams, and in-memory
//!  buffers, with position tracking, peeking, and skipping that behave identically
//!  for all three.
//!  * Declarative [`Token`]s for fixed-layout binary data: integers of either
//!  endianness from 8 to 64 bits, IEEE and 80-bit extended floats, fixed-length
//!  strings in several encodings, and bit-packed fields.
//!  * A generic [`chunk`] walker for size-delimited records (RIFF and AIFF chunks,
//!  MP4 atoms, ASF objects, FLAC metadata blocks, DSF/DSDIFF chunks) driven by a
//!  caller-supplied [`ChunkVisitor`], with strict byte accounting at every level.
//!  * Ogg page reading and logical [`ogg`] packet reassembly across page boundaries.
//!  * And, by default, structural walkers for individual formats in [`formats`]:
//!  WAVE, AIFF/AIFC, MP4, ASF, FLAC, Ogg (Vorbis, Opus, FLAC, Speex), DSF,
//!  DSDIFF, WavPack, APEv2, and ID3v2 headers.
//!
//! ## Example
//! ```no_run
//! # async fn run() -> chunkstream::Result<()> {
//! use chunkstream::{formats::riff, tokenizer, Config};
//!
//! let config = Config::default();
//! let mut tok = tokenizer::from_file("song.wav", &config).await?;
//! let info = riff::parse(&mut tok, &config).await?;
//!
//! println!("{:?} seconds", info.duration());
//! # Ok(())
//! # }
//! ```
//!
//! Walkers read structure and raw values only: mapping tag fields to a common
//! vocabulary, or decoding any audio, is left to the caller.
//!
//! [`Tokenizer`]: tokenizer::Tokenizer
//! [`Token`]: token::Token
//! [`ChunkVisitor`]: chunk::ChunkVisitor

#![warn(clippy::pedantic)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::len_without_is_empty,
    // TODO: would require significant rewriting of all existing docs
    clippy::missing_errors_doc,
)]

pub mod chunk;
mod config;
pub mod constants;
pub mod error;
#[cfg(feature = "formats")]
pub mod formats;
pub mod ogg;
pub mod token;
pub mod tokenizer;

pub use crate::{
    config::Config,
    error::{Error, Result},
};
