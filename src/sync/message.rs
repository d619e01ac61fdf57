//! Wire format of one incremental sync message.
//!
//! `[i32 publish_count]` followed by `publish_count` records of
//! `[global][u8 attribute][i32 pair_count][pair_count × (i32 rank, u8 attribute)]`.

use crate::algs::wire::WireRegistry;
use crate::index::GlobalIndex;
use crate::index::attribute::Attribute;
use crate::index_error::IndexSyncError;

/// "I hold `global` as `attribute`, and these processes hold it too."
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Announcement<G, A> {
    pub global: G,
    pub attribute: A,
    pub knowers: Vec<(usize, A)>,
}

pub(crate) fn encoded_len<G: GlobalIndex, A>(
    wire: &WireRegistry,
    announcements: &[Announcement<G, A>],
) -> Result<usize, IndexSyncError> {
    let header = wire.pack_size::<i32>(1)?;
    let record = wire.pack_size::<G>(1)? + wire.pack_size::<u8>(1)? + wire.pack_size::<i32>(1)?;
    let pair = wire.pack_size::<i32>(1)? + wire.pack_size::<u8>(1)?;
    let pairs: usize = announcements.iter().map(|a| a.knowers.len()).sum();
    Ok(header + record * announcements.len() + pair * pairs)
}

pub(crate) fn encode<G: GlobalIndex, A: Attribute>(
    wire: &WireRegistry,
    announcements: &[Announcement<G, A>],
) -> Result<Vec<u8>, IndexSyncError> {
    let len = encoded_len(wire, announcements)?;
    let mut p = wire.packer(len);
    p.pack_count(announcements.len())?;
    for a in announcements {
        p.pack(a.global)?;
        p.pack(a.attribute.to_wire())?;
        p.pack_count(a.knowers.len())?;
        for &(rank, attribute) in &a.knowers {
            p.pack_count(rank)?;
            p.pack(attribute.to_wire())?;
        }
    }
    debug_assert_eq!(p.len(), len);
    Ok(p.finish())
}

pub(crate) fn decode<G: GlobalIndex, A: Attribute>(
    wire: &WireRegistry,
    buf: &[u8],
) -> Result<Vec<Announcement<G, A>>, IndexSyncError> {
    let attr = |code: u8| A::from_wire(code).ok_or(IndexSyncError::UnknownAttribute(code));
    let mut u = wire.unpacker(buf);
    let publish = u.unpack_count()?;
    let mut out = Vec::with_capacity(publish);
    for _ in 0..publish {
        let global: G = u.unpack()?;
        let attribute = attr(u.unpack()?)?;
        let n = u.unpack_count()?;
        let mut knowers = Vec::with_capacity(n);
        for _ in 0..n {
            let rank = u.unpack_count()?;
            knowers.push((rank, attr(u.unpack()?)?));
        }
        out.push(Announcement {
            global,
            attribute,
            knowers,
        });
    }
    u.finish()?;
    Ok(out)
}
