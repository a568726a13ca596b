//! C6: `Tex`, a logical texture pairing an `Image` with a `Sampler` and a
//! dimensionality. No teacher equivalent survived retrieval beyond the
//! `Image`/`Sampler` pair themselves (see `image.rs`); `Tex` itself is
//! spec §3's entity, implemented directly.

use crate::image::{Image, ImageDims, Sampler};

pub struct Tex {
    pub image: Image,
    pub sampler: Sampler,
    pub dims: ImageDims,
}

impl Tex {
    pub fn new(image: Image, sampler: Sampler) -> Self {
        let dims = image.dims();
        Tex {
            image,
            sampler,
            dims,
        }
    }
}
