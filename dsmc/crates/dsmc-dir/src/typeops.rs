//! Type-dispatch table
//!
//! The directory moves objects of arbitrary Rust types without knowing
//! them statically. Each payload type gets one [`TypeOps`] record, built on
//! first use and leaked to `'static`, holding the monomorphized functions
//! needed to encode, decode and create values of that type. Messages carry
//! a [`TypeTag`] so the receiving host can find the record again.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

use dsmc_util::{FxHashMap, Handle, HostId, ResolveMode};
use parking_lot::RwLock;
use rustc_hash::FxHasher;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::LocalCache;
use crate::error::{DirError, Result};
use crate::net::{HandlerId, ObjectMessage, RequestMessage, Transport};

/// Values the directory can ship between hosts.
pub trait Transferable: Serialize + DeserializeOwned + Send + 'static {}

impl<T: Serialize + DeserializeOwned + Send + 'static> Transferable for T {}

/// Stable identifier of a payload type, derived from its type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeTag(pub u64);

impl TypeTag {
    pub fn of<T: ?Sized + 'static>() -> Self {
        let mut hasher = FxHasher::default();
        std::any::type_name::<T>().hash(&mut hasher);
        TypeTag(hasher.finish())
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

type EncodeFn = fn(&(dyn Any + Send)) -> Option<serde_json::Result<Vec<u8>>>;
type DecodeFn = fn(&[u8], &mut (dyn Any + Send)) -> Option<serde_json::Result<()>>;
type CreateFn = fn(&[u8]) -> serde_json::Result<Box<dyn Any + Send>>;

/// Per-type operations used by the directories.
pub struct TypeOps {
    tag: TypeTag,
    name: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
    create: CreateFn,
}

lazy_static::lazy_static! {
    static ref BY_TYPE: RwLock<FxHashMap<TypeId, &'static TypeOps>> =
        RwLock::new(FxHashMap::default());
    static ref BY_TAG: RwLock<FxHashMap<TypeTag, &'static TypeOps>> =
        RwLock::new(FxHashMap::default());
}

fn encode_erased<T: Transferable>(value: &(dyn Any + Send)) -> Option<serde_json::Result<Vec<u8>>> {
    value.downcast_ref::<T>().map(serde_json::to_vec)
}

fn decode_erased<T: Transferable>(
    bytes: &[u8],
    target: &mut (dyn Any + Send),
) -> Option<serde_json::Result<()>> {
    let slot = target.downcast_mut::<T>()?;
    Some(serde_json::from_slice::<T>(bytes).map(|value| *slot = value))
}

fn create_erased<T: Transferable>(bytes: &[u8]) -> serde_json::Result<Box<dyn Any + Send>> {
    let value: T = serde_json::from_slice(bytes)?;
    Ok(Box::new(value))
}

impl TypeOps {
    /// Dispatch record for `T`, registering it on first use.
    pub fn of<T: Transferable>() -> &'static TypeOps {
        let id = TypeId::of::<T>();
        if let Some(ops) = BY_TYPE.read().get(&id).copied() {
            return ops;
        }

        let mut by_type = BY_TYPE.write();
        if let Some(ops) = by_type.get(&id).copied() {
            return ops;
        }
        let ops: &'static TypeOps = Box::leak(Box::new(TypeOps {
            tag: TypeTag::of::<T>(),
            name: std::any::type_name::<T>(),
            encode: encode_erased::<T>,
            decode: decode_erased::<T>,
            create: create_erased::<T>,
        }));
        by_type.insert(id, ops);
        BY_TAG.write().insert(ops.tag, ops);
        ops
    }

    /// Find a registered record from a tag carried on a message.
    pub fn lookup(tag: TypeTag) -> Result<&'static TypeOps> {
        BY_TAG
            .read()
            .get(&tag)
            .copied()
            .ok_or(DirError::UnknownType { tag })
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Serialize a type-erased value of this type.
    pub fn encode(&self, handle: Handle, value: &(dyn Any + Send)) -> Result<Vec<u8>> {
        match (self.encode)(value) {
            Some(bytes) => Ok(bytes?),
            None => Err(self.mismatch(handle)),
        }
    }

    /// Overwrite an existing value in place from its serialized form.
    pub fn deserialize(
        &self,
        handle: Handle,
        bytes: &[u8],
        target: &mut (dyn Any + Send),
    ) -> Result<()> {
        match (self.decode)(bytes, target) {
            Some(result) => Ok(result?),
            None => Err(self.mismatch(handle)),
        }
    }

    /// Decode a fresh value and install it in the local cache.
    pub fn cm_create(
        &self,
        cache: &LocalCache,
        handle: Handle,
        mode: ResolveMode,
        bytes: &[u8],
    ) -> Result<()> {
        let value = (self.create)(bytes)?;
        cache.create(handle, mode.wants_write(), value);
        Ok(())
    }

    /// Ship already-encoded bytes (or none, for an in-place upgrade).
    pub fn send_bytes(
        &self,
        transport: &dyn Transport,
        dest: HostId,
        handle: Handle,
        bytes: Vec<u8>,
        mode: ResolveMode,
    ) -> Result<()> {
        let message = ObjectMessage {
            handle,
            mode,
            tag: self.tag,
            bytes,
        };
        transport.send(dest, HandlerId::Object, message.encode()?)
    }

    /// Ask `dest` to act on `handle` on behalf of `whom`.
    pub fn request(
        &self,
        transport: &dyn Transport,
        dest: HostId,
        handle: Handle,
        whom: HostId,
        mode: ResolveMode,
    ) -> Result<()> {
        let message = RequestMessage {
            handle,
            whom,
            mode,
            tag: self.tag,
        };
        transport.send(dest, HandlerId::Request, message.encode()?)
    }

    fn mismatch(&self, handle: Handle) -> DirError {
        DirError::TypeMismatch {
            handle,
            expected: self.name,
        }
    }
}

impl fmt::Debug for TypeOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeOps")
            .field("tag", &self.tag)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i64,
        y: i64,
    }

    fn handle() -> Handle {
        Handle::new(HostId(0), 1)
    }

    #[test]
    fn test_registration_is_idempotent() {
        let a = TypeOps::of::<Point>();
        let b = TypeOps::of::<Point>();
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.tag(), TypeTag::of::<Point>());
    }

    #[test]
    fn test_lookup_by_tag() {
        let ops = TypeOps::of::<Vec<u32>>();
        let found = TypeOps::lookup(ops.tag()).unwrap();
        assert!(std::ptr::eq(ops, found));
    }

    #[test]
    fn test_lookup_unknown_tag() {
        let err = TypeOps::lookup(TypeTag(7)).unwrap_err();
        assert!(matches!(err, DirError::UnknownType { tag } if tag == TypeTag(7)));
    }

    #[test]
    fn test_deserialize_in_place() {
        let ops = TypeOps::of::<Point>();
        let source = Point { x: 3, y: -4 };
        let bytes = ops.encode(handle(), &source).unwrap();

        let mut target: Box<dyn Any + Send> = Box::new(Point { x: 0, y: 0 });
        ops.deserialize(handle(), &bytes, target.as_mut()).unwrap();
        assert_eq!(target.downcast_ref::<Point>(), Some(&source));
    }

    #[test]
    fn test_wrong_type_is_mismatch() {
        let ops = TypeOps::of::<Point>();
        let err = ops.encode(handle(), &17u8).unwrap_err();
        assert!(matches!(err, DirError::TypeMismatch { .. }));
    }

    #[test]
    fn test_tags_differ_between_types() {
        assert_ne!(TypeTag::of::<Point>(), TypeTag::of::<u64>());
    }
}
