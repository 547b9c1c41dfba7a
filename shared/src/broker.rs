use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::{error, trace};
use replica_serde::{BufferReader, Serde};
use thiserror::Error;

use crate::{
    entity::RdReactive,
    impls::MessageContext,
    lifetime::Lifetime,
    rd_id::{RName, RdId},
    scheduler::Scheduler,
    sync::lock,
};

/// Errors raised while registering entities for inbound routing
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Ids are unique per protocol while their owner is alive
    #[error("Id {id} is already registered by {existing} under a live lifetime")]
    DuplicateId { id: RdId, existing: RName },

    #[error("Can't register an entity with the null id")]
    NullId,
}

struct Subscription {
    lifetime: Lifetime,
    entity: Arc<dyn RdReactive>,
}

struct Delivery {
    started: bool,
    queued: Vec<Vec<u8>>,
}

/// Routes inbound messages (`RdId`, context, payload) to registered entities
pub struct MessageBroker {
    subscriptions: Mutex<HashMap<RdId, Subscription>>,
    delivery: Mutex<Delivery>,
}

impl MessageBroker {
    /// With `delayed_delivery` inbound messages wait for
    /// [`start_delivering_messages`](Self::start_delivering_messages).
    pub fn new(delayed_delivery: bool) -> Arc<Self> {
        Arc::new(Self {
            subscriptions: Mutex::new(HashMap::new()),
            delivery: Mutex::new(Delivery {
                started: !delayed_delivery,
                queued: Vec::new(),
            }),
        })
    }

    pub fn advise_on(
        self: &Arc<Self>,
        lifetime: &Lifetime,
        entity: Arc<dyn RdReactive>,
    ) -> Result<(), BrokerError> {
        if !lifetime.is_alive() {
            return Ok(());
        }
        let id = entity.rd_id();
        if id.is_null() {
            return Err(BrokerError::NullId);
        }
        {
            let mut subscriptions = lock(&self.subscriptions);
            if let Some(existing) = subscriptions.get(&id) {
                if existing.lifetime.is_alive() {
                    return Err(BrokerError::DuplicateId {
                        id,
                        existing: existing.entity.location(),
                    });
                }
            }
            subscriptions.insert(
                id,
                Subscription {
                    lifetime: lifetime.clone(),
                    entity,
                },
            );
        }

        let weak = Arc::downgrade(self);
        let owner = lifetime.clone();
        lifetime.on_termination(move || {
            if let Some(broker) = weak.upgrade() {
                let mut subscriptions = lock(&broker.subscriptions);
                if subscriptions
                    .get(&id)
                    .is_some_and(|subscription| subscription.lifetime.ptr_eq(&owner))
                {
                    subscriptions.remove(&id);
                }
            }
        });
        Ok(())
    }

    pub fn try_get_by_id(&self, id: RdId) -> Option<Arc<dyn RdReactive>> {
        lock(&self.subscriptions)
            .get(&id)
            .filter(|subscription| subscription.lifetime.is_alive())
            .map(|subscription| subscription.entity.clone())
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.subscriptions).len()
    }

    /// Flushes messages queued so far, then delivers directly
    pub fn start_delivering_messages(&self) {
        loop {
            let queued = {
                let mut delivery = lock(&self.delivery);
                if delivery.queued.is_empty() {
                    delivery.started = true;
                    return;
                }
                std::mem::take(&mut delivery.queued)
            };
            for message in queued {
                self.deliver(&message);
            }
        }
    }

    /// Entry point for messages decoded by a wire
    pub fn dispatch(&self, message: &[u8]) {
        {
            let mut delivery = lock(&self.delivery);
            if !delivery.started {
                delivery.queued.push(message.to_vec());
                return;
            }
        }
        self.deliver(message);
    }

    fn deliver(&self, message: &[u8]) {
        let mut reader = BufferReader::new(message);
        let id = match RdId::de(&mut reader) {
            Ok(id) => id,
            Err(err) => {
                error!("Message without id dropped: {}", err);
                return;
            }
        };

        let Some((lifetime, entity)) = ({
            let subscriptions = lock(&self.subscriptions);
            subscriptions
                .get(&id)
                .filter(|subscription| subscription.lifetime.is_alive())
                .map(|subscription| (subscription.lifetime.clone(), subscription.entity.clone()))
        }) else {
            trace!("handler is not found for {}", id);
            return;
        };
        let Some(protocol) = entity.protocol() else {
            trace!("{} is unbound, message dropped", id);
            return;
        };

        let message_context = match protocol.contexts().read_message_context(&mut reader) {
            Ok(context) => context,
            Err(err) => {
                error!("{}: can't read message context: {}", entity.location(), err);
                return;
            }
        };
        let scheduler = if entity.is_async() {
            protocol.inline_scheduler().clone()
        } else {
            protocol.scheduler().clone()
        };
        let helper = DispatchHelper {
            rd_id: id,
            lifetime,
            scheduler,
            message_context,
        };

        if let Err(err) = entity.on_wire_received(&protocol, &mut reader, helper) {
            error!("{} failed to process message {}: {}", entity.location(), id, err);
        }
    }
}

/// Hands a parsed inbound change to the target's scheduler, dropping it if the
/// target's lifetime ends first
pub struct DispatchHelper {
    rd_id: RdId,
    lifetime: Lifetime,
    scheduler: Arc<dyn Scheduler>,
    message_context: MessageContext,
}

impl DispatchHelper {
    pub fn rd_id(&self) -> RdId {
        self.rd_id
    }

    /// Lifetime of the receiving entity's binding
    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    pub fn dispatch(self, action: impl FnOnce() + Send + 'static) {
        let Self {
            rd_id,
            lifetime,
            scheduler,
            message_context,
        } = self;
        if !lifetime.is_alive() {
            trace!("{}: lifetime is over, message dropped", rd_id);
            return;
        }
        scheduler.queue(Box::new(move || {
            if !lifetime.is_alive() {
                trace!("{}: lifetime ended before dispatch, message dropped", rd_id);
                return;
            }
            message_context.apply(action);
        }));
    }
}
