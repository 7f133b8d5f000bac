pub mod livepost;
pub mod ws;

pub use ws::{GatewayState, router};
