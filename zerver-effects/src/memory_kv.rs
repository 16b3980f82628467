//! An in-process KV [`Effector`] backed by `dashmap`, in the spirit of the
//! teacher's `data_connector` backends (`data_connector/src/noop.rs`,
//! `data_connector/src/redis.rs`): one trait object per storage kind, here
//! collapsed to a single map since there's no schema to speak of.
//!
//! Useful for tests and for demos that want a working pipeline without a
//! real database. Not durable across process restarts.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use zerver_core::{Effect, EffectKind, Effector, Error, Kind};

/// `Effect::target` is `"get:<key>"`, `"put:<key>"`, or `"delete:<key>"`.
/// `put` stores `Effect::payload` verbatim; `get`/`delete` ignore it.
/// A missing key on `get` fails with [`Kind::NotFound`]; `delete` of a
/// missing key is a no-op success, matching
/// `NoOpConversationStorage::delete_conversation`'s "always succeeds"
/// shape.
pub struct MemoryKvEffector {
    store: DashMap<String, Bytes>,
}

enum Op<'a> {
    Get(&'a str),
    Put(&'a str),
    Delete(&'a str),
}

impl MemoryKvEffector {
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }

    fn parse_target(target: &str) -> Option<Op<'_>> {
        let (op, key) = target.split_once(':')?;
        if key.is_empty() {
            return None;
        }
        match op {
            "get" => Some(Op::Get(key)),
            "put" => Some(Op::Put(key)),
            "delete" => Some(Op::Delete(key)),
            _ => None,
        }
    }
}

impl Default for MemoryKvEffector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Effector for MemoryKvEffector {
    fn supports(&self, effect: &Effect) -> bool {
        effect.kind == EffectKind::Io && Self::parse_target(&effect.target).is_some()
    }

    async fn execute(&self, effect: &Effect) -> Result<Bytes, Error> {
        match Self::parse_target(&effect.target)
            .ok_or_else(|| Error::new(Kind::InvalidInput, "memory_kv_effect", effect.target.clone()))?
        {
            Op::Get(key) => self
                .store
                .get(key)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| Error::new(Kind::NotFound, "memory_kv_effect", key.to_string())),
            Op::Put(key) => {
                self.store.insert(key.to_string(), effect.payload.clone());
                Ok(effect.payload.clone())
            }
            Op::Delete(key) => {
                self.store.remove(key);
                Ok(Bytes::new())
            }
        }
    }

    fn kinds(&self) -> &'static [EffectKind] {
        &[EffectKind::Io]
    }
}
