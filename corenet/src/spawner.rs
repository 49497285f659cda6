//! Replicated-object spawner (spec §4.6): assigns `NetworkId`s, builds proxies through a
//! [`TypeRegistry`], encodes the `NetworkObjectSpawn`/`NetworkObjectDespawn` control messages,
//! and reconciles late joiners.
//!
//! Per REDESIGN FLAGS, derived-class `NetworkObject` polymorphism is replaced with a
//! tagged-variant + proxy-factory model: [`TypeRegistry`] maps a `u8` tag to a constructor, and
//! every proxy implements the same small capability set ([`NetworkObjectProxy`]) rather than
//! sitting in an inheritance tree.

use crate::error::{Error, Kind, Result};
use crate::ids::ClientId;
use crate::ids::NetworkId;
use crate::rpc::{DespawnPayload, SpawnPayload};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::{Rc, Weak};

/// Tag 0 is reserved and never constructed; tag 1 is the base object with no payload beyond
/// id/owner (spec §4.6).
pub const TAG_RESERVED: u8 = 0;
pub const TAG_BASE_OBJECT: u8 = 1;
pub const FIRST_USER_TAG: u8 = 2;

/// Capability set every spawned proxy implements, replacing the source's derived-class
/// `NetworkObject` hierarchy (spec §9 REDESIGN FLAGS).
pub trait NetworkObjectProxy {
    /// Called once, immediately after construction, with the id the spawner assigned and the
    /// owning connection (the authority that spawned it).
    fn on_spawn(&mut self, id: NetworkId, owner: ClientId) {
        let _ = (id, owner);
    }

    /// Called once, just before the spawner removes the object from its table.
    fn on_despawn(&mut self) {}

    /// Routes a decoded application RPC addressed to this object's `NetworkId`. The default
    /// no-op is a valid proxy for objects that only replicate spawn/despawn, never receive
    /// per-object RPCs.
    fn rpc_dispatch(&mut self, rpc_id: crate::ids::RpcId, args: &[u8]) -> Result<()> {
        let _ = (rpc_id, args);
        Ok(())
    }
}

/// The base object proxy (tag 1): no payload beyond id/owner, every capability is the default
/// no-op. Registered automatically so a minimal integration needs to register nothing to
/// exercise late-join spawn replay in isolation.
pub struct BaseObjectProxy;
impl NetworkObjectProxy for BaseObjectProxy {}

/// Maps a user type `<-> u8` tag and constructs a proxy instance from a tag (spec §4.6). Built
/// externally — by a code generator or by hand — and handed to the spawner at construction.
pub struct TypeRegistry {
    factories: HashMap<u8, Box<dyn Fn() -> Box<dyn NetworkObjectProxy>>>,
}

impl TypeRegistry {
    /// A registry pre-populated with the tag-1 base object; nothing else registered.
    pub fn new() -> TypeRegistry {
        let mut registry = TypeRegistry { factories: HashMap::new() };
        registry.register(TAG_BASE_OBJECT, || Box::new(BaseObjectProxy));
        registry
    }

    /// Registers a constructor for `tag`. Panics on tag 0 (reserved) or re-registration of an
    /// already-claimed tag — this is startup-time configuration, not a runtime path.
    pub fn register<F>(&mut self, tag: u8, factory: F)
    where
        F: Fn() -> Box<dyn NetworkObjectProxy> + 'static,
    {
        assert_ne!(tag, TAG_RESERVED, "tag 0 is reserved");
        assert!(self.factories.insert(tag, Box::new(factory)).is_none(), "tag {} already registered", tag);
    }

    pub fn construct(&self, tag: u8) -> Result<Box<dyn NetworkObjectProxy>> {
        self.factories.get(&tag).map(|factory| factory()).ok_or_else(|| Error::fatal(Kind::DecodeFailure))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        TypeRegistry::new()
    }
}

/// A spawned object (spec §3 `NetworkObject`): `{id, isActive, typeTag, ownerConnection}` plus
/// the proxy instance driving its capabilities.
pub struct NetworkObject {
    pub id: NetworkId,
    pub is_active: bool,
    pub type_tag: u8,
    pub owner: ClientId,
    pub proxy: Box<dyn NetworkObjectProxy>,
}

/// Holds callbacks keyed by an arbitrary key (spec §4.6: "NetworkId, or any user key") that fire
/// once the matching value appears, and are removed on resolution. Drained once per dispatch
/// pass by [`Spawner::resolve_pending`].
pub struct PendingLookup<K: Eq + Hash> {
    callbacks: HashMap<K, Vec<Box<dyn FnOnce(&NetworkObject)>>>,
}

impl<K: Eq + Hash> PendingLookup<K> {
    pub fn new() -> PendingLookup<K> {
        PendingLookup { callbacks: HashMap::new() }
    }

    pub fn wait_for(&mut self, key: K, callback: Box<dyn FnOnce(&NetworkObject)>) {
        self.callbacks.entry(key).or_insert_with(Vec::new).push(callback);
    }

    /// Fires and removes every callback registered under `key`, if any.
    fn resolve(&mut self, key: &K, object: &NetworkObject) {
        if let Some(callbacks) = self.callbacks.remove(key) {
            for callback in callbacks {
                callback(object);
            }
        }
    }
}

impl<K: Eq + Hash> Default for PendingLookup<K> {
    fn default() -> Self {
        PendingLookup::new()
    }
}

/// Owns the live `NetworkId -> NetworkObject` table, the monotonic id counter, and the
/// pending-lookup list (spec §4.6, §2 item 9).
pub struct Spawner {
    registry: TypeRegistry,
    /// `IndexMap` rather than `HashMap`: late-join replay (spec §4.6, §8 scenario 3) must
    /// iterate live objects in the order they were spawned, which only an order-preserving map
    /// guarantees.
    objects: IndexMap<NetworkId, Rc<RefCell<NetworkObject>>>,
    next_id: u32,
    is_authority: bool,
    pending: PendingLookup<NetworkId>,
}

impl Spawner {
    pub fn new(registry: TypeRegistry, is_authority: bool) -> Spawner {
        Spawner { registry, objects: IndexMap::new(), next_id: 1, is_authority, pending: PendingLookup::new() }
    }

    /// Only the authority allocates ids and initiates spawn/despawn (spec §3 invariant). Returns
    /// the new object's weak back-reference plus the `SpawnPayload` to broadcast.
    pub fn spawn_local(&mut self, type_tag: u8, owner: ClientId) -> Result<(Weak<RefCell<NetworkObject>>, SpawnPayload)> {
        if !self.is_authority {
            return Err(Error::fatal(Kind::PermissionViolation));
        }
        let id = NetworkId(self.next_id);
        self.next_id += 1;
        let (handle, payload) = self.insert(id, type_tag, owner)?;
        Ok((handle, payload))
    }

    /// Applies a `NetworkObjectSpawn` received from the authority. Clients never allocate ids
    /// themselves; if the incoming id is `>=` the local counter, the counter advances to `id + 1`
    /// so a later promotion to authority (host migration) cannot collide with it (spec §4.6).
    pub fn apply_remote_spawn(&mut self, payload: SpawnPayload, owner: ClientId) -> Result<Weak<RefCell<NetworkObject>>> {
        if payload.id.0 >= self.next_id {
            self.next_id = payload.id.0 + 1;
        }
        let (handle, _) = self.insert(payload.id, payload.type_tag, owner)?;
        Ok(handle)
    }

    fn insert(&mut self, id: NetworkId, type_tag: u8, owner: ClientId) -> Result<(Weak<RefCell<NetworkObject>>, SpawnPayload)> {
        let mut proxy = self.registry.construct(type_tag)?;
        proxy.on_spawn(id, owner);
        let object = Rc::new(RefCell::new(NetworkObject { id, is_active: true, type_tag, owner, proxy }));
        let weak = Rc::downgrade(&object);
        self.pending.resolve(&id, &object.borrow());
        self.objects.insert(id, object);
        Ok((weak, SpawnPayload { type_tag, id }))
    }

    /// Only the authority initiates despawn. Fires `on_despawn` and removes the object from the
    /// table, returning the `DespawnPayload` to broadcast.
    pub fn despawn_local(&mut self, id: NetworkId) -> Result<DespawnPayload> {
        if !self.is_authority {
            return Err(Error::fatal(Kind::PermissionViolation));
        }
        self.apply_remote_despawn(id)
    }

    pub fn apply_remote_despawn(&mut self, id: NetworkId) -> Result<DespawnPayload> {
        // `shift_remove`, not `swap_remove`: despawning one object must not reorder the
        // remaining ones, since late-join replay order is spawn order (spec §4.6, §8 scenario 3).
        let object = self.objects.shift_remove(&id).ok_or_else(|| Error::fatal(Kind::DecodeFailure))?;
        let mut object = Rc::try_unwrap(object).map_err(|_| Error::fatal(Kind::DecodeFailure))?.into_inner();
        object.is_active = false;
        object.proxy.on_despawn();
        Ok(DespawnPayload { id })
    }

    pub fn get(&self, id: NetworkId) -> Option<Weak<RefCell<NetworkObject>>> {
        self.objects.get(&id).map(Rc::downgrade)
    }

    /// Iterates every live object's spawn payload in insertion order — used for late-join replay
    /// (spec §4.6, §8 scenario 3): the authority sends one spawn message per object to a newly
    /// admitted client, before any application state converges.
    pub fn live_spawn_payloads(&self) -> impl Iterator<Item = SpawnPayload> + '_ {
        self.objects.values().map(|object| {
            let object = object.borrow();
            SpawnPayload { type_tag: object.type_tag, id: object.id }
        })
    }

    pub fn next_local_id(&self) -> u32 {
        self.next_id
    }

    /// Flips authority after host migration (spec §4.8) or once `LocalClientConnected` reveals
    /// whether this endpoint is the session's authority.
    pub fn set_authority(&mut self, is_authority: bool) {
        self.is_authority = is_authority;
    }

    pub fn is_authority(&self) -> bool {
        self.is_authority
    }

    /// Registers a callback fired the next time `id` appears in the table (spec §4.6).
    pub fn wait_for(&mut self, id: NetworkId, callback: Box<dyn FnOnce(&NetworkObject)>) {
        if let Some(object) = self.objects.get(&id) {
            callback(&object.borrow());
        } else {
            self.pending.wait_for(id, callback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_spawn_allocates_monotonic_ids() {
        let mut spawner = Spawner::new(TypeRegistry::new(), true);
        let (_, first) = spawner.spawn_local(TAG_BASE_OBJECT, ClientId(1)).unwrap();
        let (_, second) = spawner.spawn_local(TAG_BASE_OBJECT, ClientId(1)).unwrap();
        assert_eq!(first.id, NetworkId(1));
        assert_eq!(second.id, NetworkId(2));
    }

    #[test]
    fn non_authority_cannot_spawn_locally() {
        let mut spawner = Spawner::new(TypeRegistry::new(), false);
        assert!(spawner.spawn_local(TAG_BASE_OBJECT, ClientId(1)).is_err());
    }

    #[test]
    fn remote_spawn_advances_local_counter_past_incoming_id() {
        let mut spawner = Spawner::new(TypeRegistry::new(), false);
        spawner
            .apply_remote_spawn(SpawnPayload { type_tag: TAG_BASE_OBJECT, id: NetworkId(5) }, ClientId(1))
            .unwrap();
        assert_eq!(spawner.next_local_id(), 6);
    }

    #[test]
    fn late_join_replay_order_matches_spawn_order() {
        let mut spawner = Spawner::new(TypeRegistry::new(), true);
        spawner.spawn_local(TAG_BASE_OBJECT, ClientId(1)).unwrap();
        spawner.spawn_local(TAG_BASE_OBJECT, ClientId(1)).unwrap();
        spawner.spawn_local(TAG_BASE_OBJECT, ClientId(1)).unwrap();

        let ids: Vec<_> = spawner.live_spawn_payloads().map(|p| p.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn despawning_a_middle_object_keeps_remaining_replay_order() {
        let mut spawner = Spawner::new(TypeRegistry::new(), true);
        let (_, first) = spawner.spawn_local(TAG_BASE_OBJECT, ClientId(1)).unwrap();
        let (_, second) = spawner.spawn_local(TAG_BASE_OBJECT, ClientId(1)).unwrap();
        let (_, third) = spawner.spawn_local(TAG_BASE_OBJECT, ClientId(1)).unwrap();

        spawner.despawn_local(second.id).unwrap();

        let ids: Vec<_> = spawner.live_spawn_payloads().map(|p| p.id.0).collect();
        assert_eq!(ids, vec![first.id.0, third.id.0]);
    }

    #[test]
    fn despawn_removes_object_and_fires_callback() {
        let mut spawner = Spawner::new(TypeRegistry::new(), true);
        let (_, payload) = spawner.spawn_local(TAG_BASE_OBJECT, ClientId(1)).unwrap();
        spawner.despawn_local(payload.id).unwrap();
        assert!(spawner.get(payload.id).is_none());
    }

    #[test]
    fn wait_for_fires_immediately_if_already_present() {
        let mut spawner = Spawner::new(TypeRegistry::new(), true);
        let (_, payload) = spawner.spawn_local(TAG_BASE_OBJECT, ClientId(1)).unwrap();

        let seen = Rc::new(RefCell::new(false));
        let seen_clone = seen.clone();
        spawner.wait_for(payload.id, Box::new(move |_obj| *seen_clone.borrow_mut() = true));
        assert!(*seen.borrow());
    }

    #[test]
    fn wait_for_fires_on_later_spawn() {
        let mut spawner = Spawner::new(TypeRegistry::new(), true);
        let seen = Rc::new(RefCell::new(false));
        let seen_clone = seen.clone();
        spawner.wait_for(NetworkId(1), Box::new(move |_obj| *seen_clone.borrow_mut() = true));
        assert!(!*seen.borrow());

        spawner.spawn_local(TAG_BASE_OBJECT, ClientId(1)).unwrap();
        assert!(*seen.borrow());
    }
}
