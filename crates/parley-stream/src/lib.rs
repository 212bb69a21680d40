pub mod frame;
pub mod rendezvous;
pub mod transport;

pub mod mock;

pub use frame::FrameDecoder;
pub use mock::{MockResponse, MockTransport};
pub use transport::{
    FragmentStream, HealthCheck, ModelTransport, OpenedStream, PingClient, TransportClient,
    TransportConfig,
};
