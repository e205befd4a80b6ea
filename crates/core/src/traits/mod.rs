pub mod clock;
pub mod lock;
pub mod message_queue;
pub mod repository;
pub mod sender;

pub use clock::*;
pub use lock::*;
pub use message_queue::*;
pub use repository::*;
pub use sender::*;
