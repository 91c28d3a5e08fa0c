//! Provider messaging: wire contracts, outbound routing by service type and
//! the inbound response correlator.

pub mod contracts;
pub mod correlator;
pub mod router;

pub use contracts::{ContractError, ServiceRequestMessage, ServiceResponseMessage};
pub use correlator::ResponseCorrelator;
pub use router::{RequestRouter, Route, RoutingError, RoutingTable};
