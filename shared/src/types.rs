/// Which end of a connection allocated an identifier.
/// Client-side dynamic ids are even, server-side ids are odd.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdKind {
    Server,
    Client,
}
