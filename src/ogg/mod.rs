//! Ogg physical pages and logical packet reassembly.
//!
//! Ogg applies the same size accounting as the chunked formats, but across page
//! boundaries: a page's lacing table splits its payload into segments, and a
//! logical packet is the concatenation of segments up to the first one shorter
//! than 255 bytes, wherever that lands.

mod packet;
mod page;

pub use self::{packet::*, page::*};
