//! Slot bookkeeping for containers holding bindable values.

use log::error;

use crate::{
    entity::{EntityError, RdDynamic},
    identities::Identities,
    lifetime::{Lifetime, LifetimeDefinition},
    rd_id::RdId,
    value::RdValue,
};

/// Gives a locally created bindable value a fresh dynamic id
pub(crate) fn identify_value<V: RdValue>(
    value: &V,
    identities: &dyn Identities,
    parent: RdId,
) -> Result<(), EntityError> {
    if let Some(bindable) = value.as_bindable() {
        if bindable.rd_id().is_null() {
            bindable.identify(identities, identities.next(parent))?;
        }
    }
    Ok(())
}

/// Pre-binds `value` under its own nested lifetime named `name` within `parent`.
/// Returns `None` for plain values.
pub(crate) fn pre_bind_slot<V: RdValue>(
    lifetime: &Lifetime,
    value: &V,
    parent: &dyn RdDynamic,
    name: &str,
) -> Result<Option<LifetimeDefinition>, EntityError> {
    let Some(bindable) = value.as_bindable() else {
        return Ok(None);
    };
    let definition = lifetime.create_nested();
    if let Err(error) = bindable.pre_bind(definition.lifetime(), parent, name) {
        definition.terminate();
        return Err(error);
    }
    Ok(Some(definition))
}

pub(crate) fn bind_slot<V: RdValue>(value: &V) -> Result<(), EntityError> {
    match value.as_bindable() {
        Some(bindable) => bindable.bind(),
        None => Ok(()),
    }
}

/// Finishes binding a received value once its change is accepted. The receiving
/// thread only pre-binds it, which is enough to route its messages.
pub(crate) fn bind_accepted<V: RdValue>(value: &V, parent: &dyn RdDynamic) {
    if let Err(err) = bind_slot(value) {
        error!("{}: received value not bound: {}", parent.location(), err);
    }
}

pub(crate) fn terminate_slot(slot: Option<LifetimeDefinition>) {
    if let Some(definition) = slot {
        definition.terminate();
    }
}
