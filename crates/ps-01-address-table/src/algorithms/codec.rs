//! # Snapshot Persistence Codec
//!
//! On-disk and on-wire form of a [`Snapshot`]:
//!
//! ```text
//! +----------------------+-------------------------------------------------+
//! | SnapshotHeader       | magic "PSSN" | version | body_len | sha256(body) |
//! +----------------------+-------------------------------------------------+
//! | SnapshotBody         | references (ordered) | reverse map | timestamp  |
//! |                      | roots | buffer                                   |
//! +----------------------+-------------------------------------------------+
//! ```
//!
//! Only network addresses can be persisted. Decoding checks the header,
//! the checksum, the reverse map against the ordered references, the object
//! ordering invariant and every root index before returning.

use crate::domain::{invariant_object_precedes_element, AddressTable, Index, Snapshot};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared_types::{NetworkAddress, Reference, SnapshotError, TimeStamp};
use tracing::debug;

/// Magic bytes for identification.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"PSSN";

/// Current format version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Snapshot file header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Magic bytes.
    pub magic: [u8; 4],
    /// Format version.
    pub version: u16,
    /// Body length in bytes.
    pub body_len: u64,
    /// SHA-256 of the body.
    pub checksum: [u8; 32],
}

impl SnapshotHeader {
    /// Header for `body`.
    pub fn for_body(body: &[u8]) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            body_len: body.len() as u64,
            checksum: Sha256::digest(body).into(),
        }
    }

    /// Validate magic and version.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: self.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotBody {
    references: Vec<NetworkAddress>,
    reverse: Vec<(NetworkAddress, Index)>,
    timestamp: TimeStamp,
    roots: Vec<Index>,
    buffer: Vec<u8>,
}

fn corrupt(error: bincode::Error) -> SnapshotError {
    SnapshotError::Corrupt(error.to_string())
}

/// Encode `snapshot`. Heap addresses must be translated first.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Vec<u8>, SnapshotError> {
    snapshot.validate()?;
    let mut references = Vec::with_capacity(snapshot.table().len());
    for (index, reference) in snapshot.table().iter() {
        match reference {
            Reference::Network(net) => references.push(*net),
            Reference::Heap(_) => return Err(SnapshotError::HeapAddress(index as usize)),
        }
    }
    let mut reverse: Vec<(NetworkAddress, Index)> = references
        .iter()
        .enumerate()
        .map(|(i, r)| (*r, i as Index))
        .collect();
    reverse.sort();

    let body = SnapshotBody {
        references,
        reverse,
        timestamp: snapshot.timestamp(),
        roots: snapshot.roots().to_vec(),
        buffer: snapshot.buffer().to_vec(),
    };
    let body_bytes = bincode::serialize(&body).map_err(corrupt)?;
    let header = SnapshotHeader::for_body(&body_bytes);

    let mut out = bincode::serialize(&header).map_err(corrupt)?;
    out.extend_from_slice(&body_bytes);
    debug!(
        references = body.references.len(),
        bytes = out.len(),
        "[ps-01] snapshot encoded"
    );
    Ok(out)
}

/// Decode bytes written by [`encode_snapshot`].
pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, SnapshotError> {
    let mut rest = bytes;
    let header: SnapshotHeader = bincode::deserialize_from(&mut rest).map_err(corrupt)?;
    header.validate()?;
    if rest.len() as u64 != header.body_len {
        return Err(SnapshotError::Corrupt(format!(
            "body is {} bytes, header says {}",
            rest.len(),
            header.body_len
        )));
    }
    let digest: [u8; 32] = Sha256::digest(rest).into();
    if digest != header.checksum {
        return Err(SnapshotError::ChecksumMismatch);
    }

    let body: SnapshotBody = bincode::deserialize(rest).map_err(corrupt)?;
    let table = AddressTable::from_references(
        body.references.iter().copied().map(Reference::Network).collect(),
    )
    .map_err(|e| SnapshotError::Corrupt(e.to_string()))?;

    if body.reverse.len() != table.len() {
        return Err(SnapshotError::Corrupt("reverse map size mismatch".into()));
    }
    for (reference, index) in &body.reverse {
        if table.index_of(&Reference::Network(*reference)) != Some(*index) {
            return Err(SnapshotError::Corrupt(format!(
                "reverse map disagrees at index {index}"
            )));
        }
    }
    invariant_object_precedes_element(&table)
        .map_err(|e| SnapshotError::Corrupt(e.to_string()))?;

    let snapshot = Snapshot::from_parts(body.timestamp, table, body.roots, body.buffer);
    snapshot.validate()?;
    Ok(snapshot)
}
