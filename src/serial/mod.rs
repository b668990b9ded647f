//! Serial side of the bridge: transport, framing, decoding and the
//! connection supervisor that ties them together.

pub mod frame;
pub mod supervisor;
pub mod telemetry;
pub mod transport;

pub use frame::LineFramer;
pub use supervisor::{ConnectionState, ConnectionSupervisor, SupervisorHandle, SupervisorSettings};
pub use telemetry::TelemetryDecoder;
pub use transport::{Connector, SerialPortConnector, TransportParams};
