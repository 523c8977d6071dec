//! Dispatch of remote method calls to replicated objects.
//!
//! Every replicable type is registered explicitly: a [ReplicationType] maps method names to dense
//!  method ids and typed invocations, and a [Replicator] maps object ids to live objects. A remote
//!  method packet is resolved to an object and a method by id, and the method's argument is
//!  deserialized from the packet's payload.

use std::any::{Any, TypeId};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, error, trace};

#[cfg(test)] use mockall::automock;

use crate::stream::{NetSerialize, NetStream, StreamError};

/// The seam between the networking layer and whatever invokes methods on replicated objects
#[cfg_attr(test, automock)]
pub trait RemoteMethodResolver: Send + Sync + 'static {
    fn invoke(&self, object_id: u32, method_id: u32, data: &[u8]) -> anyhow::Result<()>;
}

pub const MAX_OBJECT_COUNT: usize = 1_000_000;

type MethodInvocation = Box<dyn Fn(&mut (dyn Any + Send), &mut NetStream) -> anyhow::Result<()> + Send + Sync>;

pub type ReplicatedHandle = Arc<Mutex<dyn Any + Send>>;

/// Serializes a method argument into a remote method packet's payload
pub fn encode_argument<A: NetSerialize>(mut argument: A) -> Result<Vec<u8>, StreamError> {
    let mut ns = NetStream::writer();
    ns.serialize(&mut argument)?;
    Ok(ns.close().unwrap_or_default())
}

pub struct ReplicationType {
    type_id: TypeId,
    type_name: &'static str,
    methods: Vec<MethodInvocation>,
    method_ids: FxHashMap<String, u32>,
}

impl ReplicationType {
    pub fn new<T: Any + Send>() -> ReplicationType {
        ReplicationType {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            methods: Vec::new(),
            method_ids: FxHashMap::default(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Registers a method under `name`, returning its method id. Ids are assigned in registration
    ///  order, so both sides must register the same methods in the same order.
    pub fn register_method<T, A>(&mut self, name: &str, method: impl Fn(&mut T, A) + Send + Sync + 'static) -> anyhow::Result<u32>
    where
        T: Any + Send,
        A: NetSerialize + Default + 'static,
    {
        if TypeId::of::<T>() != self.type_id {
            bail!("cannot register a method of {} with replication type {}", std::any::type_name::<T>(), self.type_name);
        }
        if self.method_ids.contains_key(name) {
            bail!("method {} is already registered for {}", name, self.type_name);
        }

        let method_id = self.methods.len() as u32;
        let type_name = self.type_name;
        self.methods.push(Box::new(move |object, ns| {
            let object = object.downcast_mut::<T>()
                .ok_or_else(|| anyhow!("replicated object is not a {}", type_name))?;
            let mut argument = A::default();
            ns.serialize(&mut argument)?;
            method(object, argument);
            Ok(())
        }));
        self.method_ids.insert(name.to_string(), method_id);
        Ok(method_id)
    }

    pub fn method_id(&self, name: &str) -> Option<u32> {
        self.method_ids.get(name).copied()
    }

    fn invocation(&self, method_id: u32) -> Option<&MethodInvocation> {
        self.methods.get(method_id as usize)
    }
}

struct ReplicatedObject {
    handle: ReplicatedHandle,
    replication_type: Arc<ReplicationType>,
}

#[derive(Default)]
struct ReplicatorInner {
    types: FxHashMap<TypeId, Arc<ReplicationType>>,
    objects: Vec<Option<ReplicatedObject>>,
    free_ids: Vec<u32>,
    next_id: u32,
    num_objects: usize,
}

/// Live replicated objects by object id. Ids of freed objects are reused, most recently freed
///  first.
#[derive(Default)]
pub struct Replicator {
    inner: Mutex<ReplicatorInner>,
}

impl Replicator {
    pub fn new() -> Replicator {
        Default::default()
    }

    pub fn register_type(&self, replication_type: ReplicationType) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if inner.types.contains_key(&replication_type.type_id) {
            bail!("replication type {} is already registered", replication_type.type_name);
        }
        debug!("registered replication type {} with {} methods", replication_type.type_name, replication_type.methods.len());
        inner.types.insert(replication_type.type_id, Arc::new(replication_type));
        Ok(())
    }

    pub fn method_id<T: Any>(&self, name: &str) -> Option<u32> {
        self.inner.lock()
            .types.get(&TypeId::of::<T>())?
            .method_id(name)
    }

    /// Assigns an object id to `object`, which must be of a registered type
    pub fn allocate<T: Any + Send>(&self, object: Arc<Mutex<T>>) -> anyhow::Result<u32> {
        let mut inner = self.inner.lock();
        let Some(replication_type) = inner.types.get(&TypeId::of::<T>()).cloned() else {
            bail!("{} is not a registered replication type", std::any::type_name::<T>());
        };
        if inner.num_objects >= MAX_OBJECT_COUNT {
            bail!("too many replicated objects");
        }

        let object_id = match inner.free_ids.pop() {
            Some(id) => id,
            None => {
                let id = inner.next_id;
                inner.next_id += 1;
                id
            }
        };

        let idx = object_id as usize;
        if inner.objects.len() <= idx {
            inner.objects.resize_with(idx + 1, || None);
        }
        if inner.objects[idx].is_some() {
            error!("object id {} was generated while it is still in use", object_id);
            bail!("object id {} is already in use", object_id);
        }

        let handle: ReplicatedHandle = object;
        inner.objects[idx] = Some(ReplicatedObject { handle, replication_type });
        inner.num_objects += 1;
        trace!("allocated object id {}", object_id);
        Ok(object_id)
    }

    pub fn free(&self, object_id: u32) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        match inner.objects.get_mut(object_id as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
            }
            _ => bail!("object id {} is not allocated", object_id),
        }
        inner.free_ids.push(object_id);
        inner.num_objects -= 1;
        trace!("freed object id {}", object_id);
        Ok(())
    }

    pub fn num_objects(&self) -> usize {
        self.inner.lock().num_objects
    }
}

impl RemoteMethodResolver for Replicator {
    fn invoke(&self, object_id: u32, method_id: u32, data: &[u8]) -> anyhow::Result<()> {
        // the method may allocate or free objects, so it runs without holding the lock
        let (handle, replication_type) = {
            let inner = self.inner.lock();
            let Some(Some(object)) = inner.objects.get(object_id as usize) else {
                bail!("no replicated object with id {}", object_id);
            };
            (object.handle.clone(), object.replication_type.clone())
        };

        let Some(invocation) = replication_type.invocation(method_id) else {
            bail!("{} has no method with id {}", replication_type.type_name, method_id);
        };

        let mut ns = NetStream::reader(data)?;
        let mut object = handle.lock();
        invocation(&mut *object, &mut ns)?;
        ns.close();
        Ok(())
    }
}
