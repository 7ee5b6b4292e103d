//! CAR (Content Addressable aRchive) serialization
//!
//! Firehose events carry the blocks written by a mutation as CARv1 bytes:
//! a varint-length-prefixed DAG-CBOR header `{version: 1, roots: [commit]}`
//! followed by length-prefixed `(cid ∥ data)` frames.

use crate::error::{RepoError, Result};
use bytes::Bytes;
use cid::Cid;
use iroh_car::{CarHeader, CarReader, CarWriter};

/// Encode blocks as CAR bytes rooted at `root`.
///
/// Frames are written in the order given; repository operations pass their
/// write log so replicas see blocks in write order.
pub async fn write_car_bytes(
    root: Cid,
    blocks: impl IntoIterator<Item = (Cid, Bytes)>,
) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let header = CarHeader::new_v1(vec![root]);
    let mut writer = CarWriter::new(header, &mut buffer);

    for (cid, data) in blocks {
        writer.write(cid, data.as_ref()).await.map_err(RepoError::car)?;
    }
    writer.finish().await.map_err(RepoError::car)?;

    Ok(buffer)
}

/// A parsed CAR payload
#[derive(Debug, Clone)]
pub struct ParsedCar {
    /// Root CIDs from the header
    pub roots: Vec<Cid>,
    /// Blocks in frame order
    pub blocks: Vec<(Cid, Bytes)>,
}

/// Decode CAR bytes into the header roots and ordered blocks.
pub async fn read_car_bytes(bytes: &[u8]) -> Result<ParsedCar> {
    let mut reader = CarReader::new(bytes).await.map_err(RepoError::car)?;
    let roots = reader.header().roots().to_vec();

    let mut blocks = Vec::new();
    while let Some((cid, data)) = reader.next_block().await.map_err(RepoError::car)? {
        blocks.push((cid, Bytes::from(data)));
    }

    Ok(ParsedCar { roots, blocks })
}
