pub mod channel;
pub mod context;
pub mod dataloader;
pub mod error;
pub mod group;
pub mod sampler;

pub use channel::{Channel, ChannelSlot};
pub use context::DistContext;
pub use dataloader::{DistLoader, DistLoaderConfig, WarmUp};
pub use error::{LoaderError, Result};
pub use group::{LocalGroup, ProcessGroup, SoloGroup, TcpGroup};
pub use sampler::{DistSampler, Producer};
