use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use log::{debug, warn};

use crate::{
    entity::{bind_top_level, EntityError, RdBindable, RdDynamic},
    identities::Identities,
    impls::{type_hash, ExtCreationInfo, InternRoot, ProtocolContexts, RdSignal},
    lifetime::Lifetime,
    rd_id::{RName, RdId},
    reactive::Signal,
    scheduler::{Scheduler, SynchronousScheduler},
    sync::lock,
    types::IdKind,
    value::SerializationCtx,
    wire::Wire,
};

mod error;
pub use error::ProtocolError;

const INTERN_ROOT_NAME: &str = "ProtocolInternRoot";
const CONTEXTS_NAME: &str = "ProtocolContextHandler";
const EXT_CREATED_NAME: &str = "ProtocolExtCreated";

struct Extension {
    hash: i64,
    entity: Arc<dyn Any + Send + Sync>,
}

/// Composition root of one endpoint: owns the wire, the identities, the scheduler
/// and the reserved entities every protocol binds at startup.
pub struct Protocol {
    name: String,
    location: RName,
    identities: Arc<dyn Identities>,
    scheduler: Arc<dyn Scheduler>,
    inline_scheduler: Arc<dyn Scheduler>,
    wire: Arc<dyn Wire>,
    lifetime: Lifetime,
    serialization_ctx: SerializationCtx,
    contexts: Arc<ProtocolContexts>,
    intern_root: Arc<InternRoot>,
    ext_confirmation: Arc<RdSignal<ExtCreationInfo>>,
    ext_created: Signal<ExtCreationInfo>,
    extensions: Mutex<HashMap<String, Extension>>,
    // held while an extension is looked up, built and bound
    ext_creation: Mutex<()>,
    weak_self: Weak<Protocol>,
}

impl Protocol {
    /// Binds the reserved entities, then lets the wire deliver queued messages
    pub fn new(
        name: &str,
        identities: Arc<dyn Identities>,
        scheduler: Arc<dyn Scheduler>,
        wire: Arc<dyn Wire>,
        lifetime: Lifetime,
    ) -> Result<Arc<Self>, ProtocolError> {
        let intern_root = InternRoot::new();
        let contexts = ProtocolContexts::new();
        let ext_confirmation = RdSignal::new();
        ext_confirmation.set_async(true);

        let protocol = Arc::new_cyclic(|weak_self| Self {
            name: name.to_string(),
            location: RName::new(name),
            identities,
            scheduler,
            inline_scheduler: Arc::new(SynchronousScheduler),
            wire,
            lifetime,
            serialization_ctx: SerializationCtx::with_intern_root(intern_root.clone()),
            contexts: contexts.clone(),
            intern_root: intern_root.clone(),
            ext_confirmation: ext_confirmation.clone(),
            ext_created: Signal::new(),
            extensions: Mutex::new(HashMap::new()),
            ext_creation: Mutex::new(()),
            weak_self: weak_self.clone(),
        });

        protocol.wire.setup_contexts(contexts.clone());
        protocol.bind_static(&*intern_root, INTERN_ROOT_NAME)?;
        protocol.bind_static(&*contexts, CONTEXTS_NAME)?;

        let weak = Arc::downgrade(&protocol);
        ext_confirmation.advise(&protocol.lifetime, move |info| {
            if let Some(protocol) = weak.upgrade() {
                protocol.on_ext_created(info);
            }
        });
        protocol.bind_static(&*ext_confirmation, EXT_CREATED_NAME)?;

        debug!("Protocol {} ({:?}) is up", name, protocol.identities.kind());
        protocol.wire.start_delivering_messages();
        Ok(protocol)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identities(&self) -> &dyn Identities {
        self.identities.as_ref()
    }

    /// Clients are masters of the entities they share by default
    pub fn is_master(&self) -> bool {
        self.identities.kind() == IdKind::Client
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn inline_scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.inline_scheduler
    }

    pub fn wire(&self) -> &Arc<dyn Wire> {
        &self.wire
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    pub fn serialization_ctx(&self) -> &SerializationCtx {
        &self.serialization_ctx
    }

    pub fn contexts(&self) -> &Arc<ProtocolContexts> {
        &self.contexts
    }

    pub fn intern_root(&self) -> &Arc<InternRoot> {
        &self.intern_root
    }

    /// Extensions created on either side
    pub fn ext_created(&self) -> &Signal<ExtCreationInfo> {
        &self.ext_created
    }

    /// Binds `entity` under the protocol root with a stable id derived from `name`
    /// unless it already has one
    pub fn bind_static(&self, entity: &dyn RdBindable, name: &str) -> Result<(), EntityError> {
        if entity.rd_id().is_null() {
            let id = self.identities.mix(RdId::NULL, name);
            entity.identify(self.identities.as_ref(), id)?;
        }
        bind_top_level(entity, &self.lifetime, self, name)
    }

    /// Top-level entity shared by name: created and bound once per protocol, the
    /// counterpart is told through the extension signal. Concurrent callers for
    /// the same name wait and receive the same instance. `factory` must not
    /// create extensions itself.
    pub fn get_or_create_extension<T>(
        &self,
        name: &str,
        factory: impl FnOnce() -> Arc<T>,
    ) -> Result<Arc<T>, ProtocolError>
    where
        T: RdBindable + Any + 'static,
    {
        let entity = {
            let _creating = lock(&self.ext_creation);
            if let Some(existing) = self.find_extension::<T>(name)? {
                return Ok(existing);
            }

            let entity = factory();
            self.bind_static(&*entity, name)?;
            let any: Arc<dyn Any + Send + Sync> = entity.clone();
            lock(&self.extensions).insert(
                name.to_string(),
                Extension {
                    hash: type_hash::<T>(),
                    entity: any,
                },
            );
            entity
        };
        self.ext_confirmation.fire(ExtCreationInfo {
            name: name.to_string(),
            rd_id: entity.rd_id(),
            hash: type_hash::<T>(),
        });
        Ok(entity)
    }

    fn find_extension<T: Any + Send + Sync>(
        &self,
        name: &str,
    ) -> Result<Option<Arc<T>>, ProtocolError> {
        let extensions = lock(&self.extensions);
        match extensions.get(name) {
            None => Ok(None),
            Some(extension) => extension.entity.clone().downcast::<T>().map(Some).map_err(|_| {
                ProtocolError::ExtensionTypeMismatch {
                    name: name.to_string(),
                }
            }),
        }
    }

    fn on_ext_created(&self, info: &ExtCreationInfo) {
        let local_hash = lock(&self.extensions).get(&info.name).map(|ext| ext.hash);
        if let Some(local_hash) = local_hash.filter(|hash| *hash != info.hash) {
            warn!(
                "{}: extension '{}' has type hash {} here but {} on the other side",
                self.location, info.name, local_hash, info.hash
            );
        }
        self.ext_created.fire(info);
    }
}

impl RdDynamic for Protocol {
    fn protocol(&self) -> Option<Arc<Protocol>> {
        self.weak_self.upgrade()
    }

    fn location(&self) -> RName {
        self.location.clone()
    }
}
