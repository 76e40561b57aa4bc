//! JPEG 2000 Part 1 (ISO/IEC 15444-1) codec implementation.
//!
//! - `parser` / `writer`: codestream marker-segment syntax.
//! - `marker`: marker codes and the header structs they decode into.
//! - `packet`: tier-2 packet headers and progression-order traversal.
//! - `tag_tree`: the quadtree used by packet-header inclusion signalling.
//! - `image`: the image/tile/component/code-block data model.
//! - `mq_coder`: the MQ arithmetic coder (tier-1).
//! - `tier1`: bit-plane context modelling and coding passes (tier-1).
//! - `dwt`: the 5/3 reversible and 9/7 irreversible wavelet transforms.
//! - `quantization`: scalar dead-zone quantisation.
//! - `color`: the reversible/irreversible multi-component transforms.
//! - `rate_control`: PCRD-opt layer selection.
//! - `encoder` / `decoder`: the top-level pipelines tying it all together.

pub mod bit_io;
pub mod color;
pub mod decoder;
pub mod dwt;
pub mod encoder;
pub mod image;
pub mod marker;
pub mod mq_coder;
pub mod packet;
pub mod parser;
pub mod quantization;
pub mod rate_control;
pub mod tag_tree;
pub mod tier1;
pub mod writer;
