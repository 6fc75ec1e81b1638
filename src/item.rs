//! The [`PurgeItem`] wire format.
//!
//! A purge item is a single deletion intent: enough state to remove every backing object of an
//! inode without consulting live metadata again. It is encoded with a small versioned frame —
//! `(compat_version, current_version, length)` followed by the fields in a fixed order, followed
//! by a trailing repeat of `length` — so that a reader which only understands an older
//! `current_version` can still tell it is looking at a newer, incompatible layout and refuse to
//! decode rather than misinterpret the bytes.

use std::collections::BTreeSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use snafu::{ensure, Snafu};

/// The current and oldest-compatible versions of the [`PurgeItem`] frame.
///
/// `CURRENT_VERSION` is bumped whenever a field is added or reordered; `COMPAT_VERSION` stays
/// fixed at the oldest version that remains byte-compatible with `CURRENT_VERSION`'s decoder. A
/// decoder refuses anything with `current_version > CURRENT_VERSION`.
pub const COMPAT_VERSION: u8 = 1;
pub const CURRENT_VERSION: u8 = 1;

/// Feature flag bit on [`Layout`] indicating the encoding understands a pool namespace
/// (layout-v2). Older decoders that do not know this bit must still be able to read the rest of
/// the frame; it is the `current_version` bump, not this flag, that gates hard incompatibility.
const LAYOUT_FLAG_HAS_POOL_NAMESPACE: u8 = 0b0000_0001;

const FRAME_HEADER_LEN: usize = 1 + 1 + 4;
const FRAME_TRAILER_LEN: usize = 4;

/// Errors that can occur while decoding a [`PurgeItem`] frame.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ItemCodecError {
    #[snafu(display("frame too short: need at least {} bytes, got {}", need, got))]
    FrameTooShort { need: usize, got: usize },

    #[snafu(display(
        "unsupported item version: current_version {} exceeds the newest version this decoder understands ({})",
        found,
        supported
    ))]
    UnsupportedVersion { found: u8, supported: u8 },

    #[snafu(display(
        "frame length mismatch: header declared {} bytes of body, buffer has {} remaining",
        declared,
        remaining
    ))]
    LengthMismatch { declared: u32, remaining: usize },

    #[snafu(display(
        "trailing length check failed: header said {}, trailer said {}",
        header,
        trailer
    ))]
    TrailerMismatch { header: u32, trailer: u32 },

    #[snafu(display("field '{}' was truncated", field))]
    TruncatedField { field: &'static str },

    #[snafu(display("field '{}' had an invalid value: {}", field, reason))]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

/// Striping parameters mapping a file's byte range to object IDs.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Layout {
    pub stripe_unit: u64,
    pub stripe_count: u32,
    pub object_size: u64,
    pub primary_pool: i64,
    /// Namespace the backtrace object lives in, when it differs from the default namespace used
    /// by the ranged purge. `None` means the default (empty) namespace.
    pub pool_ns: Option<String>,
}

impl Layout {
    /// Whether this layout's namespace is non-empty, i.e. distinct from the default namespace
    /// that a ranged purge operates in.
    pub fn has_pool_namespace(&self) -> bool {
        self.pool_ns.as_deref().is_some_and(|ns| !ns.is_empty())
    }
}

/// The snapshot sequence and enclosing snapshot-id list attached to a destructive operation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SnapContext {
    pub seq: u64,
    pub snaps: Vec<u64>,
}

impl SnapContext {
    /// A context is well-formed when its sequence is at least as large as every listed snapshot
    /// ID, matching the invariant in the data model.
    pub fn is_well_formed(&self) -> bool {
        self.snaps.iter().all(|&snap| snap <= self.seq)
    }
}

/// A single deletion intent: immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PurgeItem {
    pub inode_id: u64,
    pub size: u64,
    pub layout: Layout,
    pub old_pools: BTreeSet<i64>,
    pub snap_context: SnapContext,
}

impl PurgeItem {
    /// Encodes this item into its on-disk/journal-entry representation.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        encode_body(self, &mut body);

        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len() + FRAME_TRAILER_LEN);
        frame.put_u8(COMPAT_VERSION);
        frame.put_u8(CURRENT_VERSION);
        frame.put_u32(body.len() as u32);
        frame.extend_from_slice(&body);
        frame.put_u32(body.len() as u32);
        frame.freeze()
    }

    /// Decodes an item previously produced by [`PurgeItem::encode`].
    pub fn decode(mut buf: &[u8]) -> Result<PurgeItem, ItemCodecError> {
        ensure!(
            buf.len() >= FRAME_HEADER_LEN + FRAME_TRAILER_LEN,
            FrameTooShortSnafu {
                need: FRAME_HEADER_LEN + FRAME_TRAILER_LEN,
                got: buf.len(),
            }
        );

        let _compat_version = buf.get_u8();
        let current_version = buf.get_u8();
        ensure!(
            current_version <= CURRENT_VERSION,
            UnsupportedVersionSnafu {
                found: current_version,
                supported: CURRENT_VERSION,
            }
        );

        let declared_len = buf.get_u32();
        let remaining_after_header = buf.len();
        ensure!(
            remaining_after_header >= declared_len as usize + FRAME_TRAILER_LEN,
            LengthMismatchSnafu {
                declared: declared_len,
                remaining: remaining_after_header,
            }
        );

        let (mut body, mut rest) = buf.split_at(declared_len as usize);
        let item = decode_body(&mut body)?;

        let trailer_len = rest.get_u32();
        ensure!(
            trailer_len == declared_len,
            TrailerMismatchSnafu {
                header: declared_len,
                trailer: trailer_len,
            }
        );

        Ok(item)
    }
}

fn encode_body(item: &PurgeItem, out: &mut BytesMut) {
    out.put_u64(item.inode_id);
    out.put_u64(item.size);
    encode_layout(&item.layout, out);

    out.put_u32(item.old_pools.len() as u32);
    for pool in &item.old_pools {
        out.put_i64(*pool);
    }

    out.put_u64(item.snap_context.seq);
    out.put_u32(item.snap_context.snaps.len() as u32);
    for snap in &item.snap_context.snaps {
        out.put_u64(*snap);
    }
}

fn encode_layout(layout: &Layout, out: &mut BytesMut) {
    let mut flags = 0u8;
    if layout.has_pool_namespace() {
        flags |= LAYOUT_FLAG_HAS_POOL_NAMESPACE;
    }
    out.put_u8(flags);
    out.put_u64(layout.stripe_unit);
    out.put_u32(layout.stripe_count);
    out.put_u64(layout.object_size);
    out.put_i64(layout.primary_pool);

    match &layout.pool_ns {
        Some(ns) if flags & LAYOUT_FLAG_HAS_POOL_NAMESPACE != 0 => {
            out.put_u32(ns.len() as u32);
            out.extend_from_slice(ns.as_bytes());
        }
        _ => out.put_u32(0),
    }
}

fn decode_body(buf: &mut &[u8]) -> Result<PurgeItem, ItemCodecError> {
    let inode_id = take_u64(buf, "inode_id")?;
    let size = take_u64(buf, "size")?;
    let layout = decode_layout(buf)?;

    let old_pools_count = take_u32(buf, "old_pools.len")?;
    let mut old_pools = BTreeSet::new();
    for _ in 0..old_pools_count {
        old_pools.insert(take_i64(buf, "old_pools[]")?);
    }

    let seq = take_u64(buf, "snap_context.seq")?;
    let snaps_count = take_u32(buf, "snap_context.snaps.len")?;
    let mut snaps = Vec::with_capacity(snaps_count as usize);
    for _ in 0..snaps_count {
        snaps.push(take_u64(buf, "snap_context.snaps[]")?);
    }
    let snap_context = SnapContext { seq, snaps };
    ensure!(
        snap_context.is_well_formed(),
        InvalidFieldSnafu {
            field: "snap_context",
            reason: "sequence is smaller than a listed snapshot id",
        }
    );

    Ok(PurgeItem {
        inode_id,
        size,
        layout,
        old_pools,
        snap_context,
    })
}

fn decode_layout(buf: &mut &[u8]) -> Result<Layout, ItemCodecError> {
    let flags = take_u8(buf, "layout.flags")?;
    let stripe_unit = take_u64(buf, "layout.stripe_unit")?;
    let stripe_count = take_u32(buf, "layout.stripe_count")?;
    let object_size = take_u64(buf, "layout.object_size")?;
    let primary_pool = take_i64(buf, "layout.primary_pool")?;

    let ns_len = take_u32(buf, "layout.pool_ns.len")? as usize;
    ensure!(
        buf.len() >= ns_len,
        TruncatedFieldSnafu {
            field: "layout.pool_ns",
        }
    );
    let (ns_bytes, rest) = buf.split_at(ns_len);
    *buf = rest;

    let pool_ns = if flags & LAYOUT_FLAG_HAS_POOL_NAMESPACE != 0 && ns_len > 0 {
        Some(
            std::str::from_utf8(ns_bytes)
                .map_err(|_| ItemCodecError::InvalidField {
                    field: "layout.pool_ns",
                    reason: "not valid utf-8".to_string(),
                })?
                .to_string(),
        )
    } else {
        None
    };

    ensure!(
        primary_pool >= 0,
        InvalidFieldSnafu {
            field: "layout.primary_pool",
            reason: "must be a valid (non-negative) pool id",
        }
    );

    Ok(Layout {
        stripe_unit,
        stripe_count,
        object_size,
        primary_pool,
        pool_ns,
    })
}

fn take_u8(buf: &mut &[u8], field: &'static str) -> Result<u8, ItemCodecError> {
    ensure!(buf.has_remaining(), TruncatedFieldSnafu { field });
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut &[u8], field: &'static str) -> Result<u32, ItemCodecError> {
    ensure!(buf.remaining() >= 4, TruncatedFieldSnafu { field });
    Ok(buf.get_u32())
}

fn take_u64(buf: &mut &[u8], field: &'static str) -> Result<u64, ItemCodecError> {
    ensure!(buf.remaining() >= 8, TruncatedFieldSnafu { field });
    Ok(buf.get_u64())
}

fn take_i64(buf: &mut &[u8], field: &'static str) -> Result<i64, ItemCodecError> {
    ensure!(buf.remaining() >= 8, TruncatedFieldSnafu { field });
    Ok(buf.get_i64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> PurgeItem {
        PurgeItem {
            inode_id: 0x1000_0000_0000_0042,
            size: 16 * 1024 * 1024,
            layout: Layout {
                stripe_unit: 4 * 1024 * 1024,
                stripe_count: 1,
                object_size: 4 * 1024 * 1024,
                primary_pool: 3,
                pool_ns: None,
            },
            old_pools: BTreeSet::from([7, 9]),
            snap_context: SnapContext {
                seq: 42,
                snaps: vec![10, 20, 40],
            },
        }
    }

    #[test]
    fn round_trips_a_well_formed_item() {
        let item = sample_item();
        let encoded = item.encode();
        let decoded = PurgeItem::decode(&encoded).expect("should decode");
        assert_eq!(item, decoded);
    }

    #[test]
    fn round_trips_a_namespaced_layout() {
        let mut item = sample_item();
        item.layout.pool_ns = Some("ns-a".to_string());
        let encoded = item.encode();
        let decoded = PurgeItem::decode(&encoded).expect("should decode");
        assert_eq!(item, decoded);
        assert!(decoded.layout.has_pool_namespace());
    }

    #[test]
    fn round_trips_a_zero_size_item_with_no_old_pools() {
        let mut item = sample_item();
        item.size = 0;
        item.old_pools.clear();
        let encoded = item.encode();
        let decoded = PurgeItem::decode(&encoded).expect("should decode");
        assert_eq!(item, decoded);
    }

    #[test]
    fn rejects_an_unsupported_future_version() {
        let item = sample_item();
        let mut encoded = item.encode().to_vec();
        encoded[1] = CURRENT_VERSION + 1;
        let err = PurgeItem::decode(&encoded).unwrap_err();
        assert!(matches!(err, ItemCodecError::UnsupportedVersion { .. }));
    }

    #[test]
    fn rejects_a_truncated_frame() {
        let item = sample_item();
        let encoded = item.encode();
        let truncated = &encoded[..encoded.len() - 6];
        let err = PurgeItem::decode(truncated).unwrap_err();
        assert!(matches!(
            err,
            ItemCodecError::LengthMismatch { .. } | ItemCodecError::FrameTooShort { .. }
        ));
    }

    #[test]
    fn rejects_a_corrupted_trailer() {
        let item = sample_item();
        let mut encoded = item.encode().to_vec();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        let err = PurgeItem::decode(&encoded).unwrap_err();
        assert!(matches!(err, ItemCodecError::TrailerMismatch { .. }));
    }

    proptest::proptest! {
        #[test]
        fn round_trip_holds_for_arbitrary_items(
            inode_id: u64,
            size: u64,
            stripe_unit: u64,
            stripe_count: u32,
            object_size: u64,
            primary_pool in 0i64..i64::MAX,
            has_ns: bool,
            old_pools in proptest::collection::btree_set(0i64..1000, 0..8),
            seq in 0u64..10_000,
            snap_count in 0usize..8,
        ) {
            let snaps: Vec<u64> = (0..snap_count as u64).map(|i| i % (seq + 1)).collect();
            let item = PurgeItem {
                inode_id,
                size,
                layout: Layout {
                    stripe_unit,
                    stripe_count,
                    object_size,
                    primary_pool,
                    pool_ns: if has_ns { Some("ns".to_string()) } else { None },
                },
                old_pools,
                snap_context: SnapContext { seq, snaps },
            };
            let encoded = item.encode();
            let decoded = PurgeItem::decode(&encoded).unwrap();
            proptest::prop_assert_eq!(item, decoded);
        }
    }
}
