/*!
# j2k-core

A pure Rust implementation of the core JPEG 2000 codec (ISO/IEC 15444-1
Part 1): the discrete wavelet transform, the EBCOT tier-1 entropy coder,
tier-2 packet assembly and PCRD-opt rate control.

## Modules

- [`config`]: encoder/decoder configuration ([`Configuration`], [`config::DecodeConfiguration`]).
- [`error`]: the [`Jpeg2000Error`] error type and [`error::DecodeWarning`].
- [`jpeg2000`]: the codec itself — codestream syntax, DWT, tier-1/tier-2, rate control.

## Example

```no_run
use j2k_core::config::Configuration;
use j2k_core::jpeg2000::image::{Component, Image};
use j2k_core::jpeg2000::{decoder, encoder};

let image = Image {
    width: 64,
    height: 64,
    x_offset: 0,
    y_offset: 0,
    components: vec![Component {
        bit_depth: 8,
        signed: false,
        sub_x: 1,
        sub_y: 1,
        width: 64,
        height: 64,
        samples: vec![0; 64 * 64],
    }],
};

let config = Configuration::lossless(5);
let codestream = encoder::encode(&image, &config).unwrap();
let decoded = decoder::decode(&codestream, &Default::default()).unwrap();
assert_eq!(decoded.image.width, 64);
```
*/

pub mod config;
pub mod error;
pub mod jpeg2000;

pub use config::Configuration;
pub use error::Jpeg2000Error;
pub use jpeg2000::image::{Component, DecodedImage, Image};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::{decoder, encoder};

    fn gradient_image(width: u32, height: u32) -> Image {
        let mut samples = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                samples.push(((x * 5 + y * 13) % 256) as i32);
            }
        }
        Image {
            width,
            height,
            x_offset: 0,
            y_offset: 0,
            components: vec![Component {
                bit_depth: 8,
                signed: false,
                sub_x: 1,
                sub_y: 1,
                width,
                height,
                samples,
            }],
        }
    }

    #[test]
    fn encode_decode_roundtrip_is_lossless() {
        let image = gradient_image(32, 32);
        let mut config = Configuration::lossless(2);
        config.code_block_size = config::CodeBlockSize { width: 16, height: 16 };

        let codestream = encoder::encode(&image, &config).unwrap();
        let decoded = decoder::decode(&codestream, &Default::default()).unwrap();

        assert_eq!(decoded.image.components[0].samples, image.components[0].samples);
    }
}
