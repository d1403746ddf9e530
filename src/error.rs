//! Error kinds surfaced by bind, connect and transmit operations.
use failure::Fail;

/// Result of a bind, connect or transmit operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Enumerates the failure conditions of the messaging core. Every
/// operation either completes or fails synchronously with one of these;
/// nothing is retried internally.
#[derive(Clone, Copy, Debug, Eq, Fail, PartialEq)]
pub enum Error {
    /// The requested port is occupied, or an ephemeral scan covered the
    /// whole port space without finding a free slot.
    #[fail(display = "address already in use")]
    AddressInUse,
    /// The transport owning the address rejects it.
    #[fail(display = "address not usable by its transport")]
    AddressUnsupported,
    /// No route to the peer address.
    #[fail(display = "address unreachable")]
    AddressUnreachable,
    /// No registered transport claims the address.
    #[fail(display = "no transport for address")]
    NoTransport,
    /// A typed allocator is exhausted.
    #[fail(display = "out of memory")]
    NoMemory,
    /// Malformed request, e.g. binding the wildcard address.
    #[fail(display = "invalid argument")]
    InvalidArgument,
    /// The socket already began its final teardown.
    #[fail(display = "socket is shutting down")]
    SocketDead,
}
