/// Loopback OAuth authorization
pub mod delegate;
pub mod receiver;

pub use delegate::LoopbackFlowDelegate;
pub use receiver::{CallbackOutcome, LoopbackReceiver, CALLBACK_PATH};
