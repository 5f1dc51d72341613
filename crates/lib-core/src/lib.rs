//! Shared building blocks of the wisp mesh routing daemon: network
//! addresses with family tagging, address filter lists, the monotonic
//! millisecond clock and the hashed timer wheel every protocol database
//! hangs its validity times off.

pub mod acl;
pub mod addr;
pub mod arena;
pub mod clock;
pub mod timer;

pub use acl::AddrAcl;
pub use addr::{AddrError, AddrFamily, NetAddr};
pub use arena::{Arena, Id};
pub use clock::Clock;
pub use timer::{ClassId, Firing, TimerWheel};
