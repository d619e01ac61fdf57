//! Little-endian scalar wire encoding and the explicit wire-type registry.
//!
//! Every scalar that crosses the transport is described once in a
//! [`WireRegistry`]. The registry is built per process at start-up and handed
//! to the exchange routines through [`CommContext`](crate::remote::CommContext);
//! there is no process-wide cache of datatype descriptors.

use std::any::TypeId;
use std::mem::size_of;

use bytemuck::Pod;
use hashbrown::HashMap;
use static_assertions::const_assert_eq;

use crate::index_error::IndexSyncError;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 2;

/// A fixed-width scalar that can be packed into a byte buffer.
///
/// All multi-byte values are **little-endian** on the wire.
pub trait WireScalar: Copy + 'static {
    /// Encoded width in bytes.
    const WIRE_SIZE: usize;
    /// Human-readable name used in registry errors.
    const NAME: &'static str;

    fn write_le(self, out: &mut Vec<u8>);
    /// Decode from exactly [`Self::WIRE_SIZE`] bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

fn write_pod<T: Pod>(v: T, out: &mut Vec<u8>) {
    out.extend_from_slice(bytemuck::bytes_of(&v));
}

macro_rules! impl_wire_int {
    ($($t:ty),* $(,)?) => {$(
        impl WireScalar for $t {
            const WIRE_SIZE: usize = size_of::<$t>();
            const NAME: &'static str = stringify!($t);

            #[inline]
            fn write_le(self, out: &mut Vec<u8>) {
                write_pod(self.to_le(), out);
            }
            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                <$t>::from_le(bytemuck::pod_read_unaligned(bytes))
            }
        }
    )*};
}

impl_wire_int!(u8, i32, u32, i64, u64);

impl WireScalar for bool {
    const WIRE_SIZE: usize = 1;
    const NAME: &'static str = "bool";

    #[inline]
    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }
    #[inline]
    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// `usize` always travels as a `u64`.
impl WireScalar for usize {
    const WIRE_SIZE: usize = 8;
    const NAME: &'static str = "usize";

    #[inline]
    fn write_le(self, out: &mut Vec<u8>) {
        (self as u64).write_le(out);
    }
    #[inline]
    fn read_le(bytes: &[u8]) -> Self {
        u64::read_le(bytes) as usize
    }
}

/// Descriptor of one registered wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireDescriptor {
    pub name: &'static str,
    pub size: usize,
}

/// Registry of the scalar types a process is prepared to put on the wire.
#[derive(Debug, Clone)]
pub struct WireRegistry {
    types: HashMap<TypeId, WireDescriptor>,
}

impl Default for WireRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WireRegistry {
    /// Registry with the builtin scalars (`bool`, `u8`, `i32`, `u32`, `i64`, `u64`, `usize`).
    pub fn new() -> Self {
        let mut reg = Self::empty();
        reg.register::<bool>()
            .register::<u8>()
            .register::<i32>()
            .register::<u32>()
            .register::<i64>()
            .register::<u64>()
            .register::<usize>();
        reg
    }

    /// Registry without any types.
    pub fn empty() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Register `T`; registering twice is a no-op.
    pub fn register<T: WireScalar>(&mut self) -> &mut Self {
        self.types.entry(TypeId::of::<T>()).or_insert(WireDescriptor {
            name: T::NAME,
            size: T::WIRE_SIZE,
        });
        self
    }

    pub fn is_registered<T: WireScalar>(&self) -> bool {
        self.types.contains_key(&TypeId::of::<T>())
    }

    pub fn descriptor<T: WireScalar>(&self) -> Result<WireDescriptor, IndexSyncError> {
        self.types
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or(IndexSyncError::TypeNotRegistered(T::NAME))
    }

    /// Bytes needed to pack `count` values of `T`.
    pub fn pack_size<T: WireScalar>(&self, count: usize) -> Result<usize, IndexSyncError> {
        Ok(self.descriptor::<T>()?.size * count)
    }

    pub fn packer(&self, capacity: usize) -> Packer<'_> {
        Packer {
            registry: self,
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn unpacker<'b>(&self, buf: &'b [u8]) -> Unpacker<'_, 'b> {
        Unpacker {
            registry: self,
            buf,
            pos: 0,
        }
    }
}

/// Append-only encoder bound to a registry.
pub struct Packer<'r> {
    registry: &'r WireRegistry,
    buf: Vec<u8>,
}

impl Packer<'_> {
    pub fn pack<T: WireScalar>(&mut self, value: T) -> Result<(), IndexSyncError> {
        self.registry.descriptor::<T>()?;
        value.write_le(&mut self.buf);
        Ok(())
    }

    /// Pack a length as the `i32` count used by every message header.
    pub fn pack_count(&mut self, n: usize) -> Result<(), IndexSyncError> {
        let n = i32::try_from(n)
            .map_err(|_| IndexSyncError::WireDecode(format!("count {n} does not fit in i32")))?;
        self.pack(n)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor-based decoder over a received buffer.
pub struct Unpacker<'r, 'b> {
    registry: &'r WireRegistry,
    buf: &'b [u8],
    pos: usize,
}

impl Unpacker<'_, '_> {
    pub fn unpack<T: WireScalar>(&mut self) -> Result<T, IndexSyncError> {
        let size = self.registry.descriptor::<T>()?.size;
        let end = self.pos + size;
        if end > self.buf.len() {
            return Err(IndexSyncError::WireDecode(format!(
                "buffer too short: need {size} bytes for {} at offset {}, have {}",
                T::NAME,
                self.pos,
                self.buf.len() - self.pos
            )));
        }
        let v = T::read_le(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(v)
    }

    /// Inverse of [`Packer::pack_count`]; negative counts are rejected.
    pub fn unpack_count(&mut self) -> Result<usize, IndexSyncError> {
        let n: i32 = self.unpack()?;
        usize::try_from(n).map_err(|_| IndexSyncError::WireDecode(format!("negative count {n}")))
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Fail unless every byte was consumed.
    pub fn finish(self) -> Result<(), IndexSyncError> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(IndexSyncError::WireDecode(format!(
                "{} trailing bytes after message",
                self.remaining()
            )))
        }
    }
}

const_assert_eq!(<usize as WireScalar>::WIRE_SIZE, 8);
const_assert_eq!(<i32 as WireScalar>::WIRE_SIZE, 4);
const_assert_eq!(<bool as WireScalar>::WIRE_SIZE, 1);
