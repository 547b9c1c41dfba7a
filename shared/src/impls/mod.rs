mod context;
mod ext;
mod intern;
mod list;
mod map;
mod property;
mod set;
mod signal;

pub use context::{MessageContext, ProtocolContexts, RdContext};
pub use ext::ExtCreationInfo;
pub(crate) use ext::type_hash;
pub use intern::InternRoot;
pub use list::{ListEvent, RdList};
pub use map::{MapEvent, RdMap};
pub use property::RdProperty;
pub use set::{RdSet, SetEvent};
pub use signal::RdSignal;
