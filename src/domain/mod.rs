//! Domain model: trips, participation requests and the ports the
//! application layer talks to.

pub mod events;
pub mod ids;
pub mod location;
pub mod ports;
pub mod request;
pub mod trip;
