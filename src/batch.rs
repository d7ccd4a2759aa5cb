//! Parallel decode of disjoint regions.
//!
//! Each region gets its own archive clone positioned at its offset.  Clones
//! share the immutable name and version tables and nothing else, so the
//! regions can be decoded on separate threads.  With the `parallel` feature
//! the work runs on Rayon's pool; otherwise it runs sequentially.  Results
//! are returned in input order either way, one per region: a failing region
//! does not stop the others.

use serde::Serialize;

use crate::archive::{Archive, Source};
use crate::error::{ErrorKind, Result};
use crate::property::{PropertyDecoder, StructFallback};

/// `len` bytes starting at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub offset: u64,
    pub len:    u64,
}

impl Region {
    pub const fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }
}

fn decode_one<S, T, F>(ar: &Archive<S>, region: Region, f: &F) -> Result<T>
where
    S: Source,
    F: Fn(&mut Archive<S>) -> Result<T>,
{
    let mut cursor = ar.clone_at(region.offset)?;
    let value = f(&mut cursor)?;
    let consumed = cursor.position() - region.offset;
    if consumed > region.len {
        return Err(cursor.error(ErrorKind::TagOverrun {
            name: format!("region@{:#x}", region.offset),
            consumed,
            size: region.len,
        }));
    }
    Ok(value)
}

/// Run `f` over every region on its own clone of `ar`.
pub fn decode_regions<S, T, F>(ar: &Archive<S>, regions: &[Region], f: F) -> Vec<Result<T>>
where
    S: Source + Send + Sync,
    T: Send,
    F: Fn(&mut Archive<S>) -> Result<T> + Sync,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        regions.par_iter().map(|&r| decode_one(ar, r, &f)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        regions.iter().map(|&r| decode_one(ar, r, &f)).collect()
    }
}

/// Tagged property lists at each region.
pub fn decode_property_lists<S>(
    decoder: &PropertyDecoder,
    ar:      &Archive<S>,
    regions: &[Region],
) -> Vec<Result<StructFallback>>
where
    S: Source + Send + Sync,
{
    decode_regions(ar, regions, |cursor| {
        let name = format!("@{:#x}", cursor.position());
        decoder.read_properties(cursor, &name)
    })
}
