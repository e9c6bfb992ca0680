pub mod clock;
pub mod logging;

pub use clock::{Clock, MockClock, SystemClock};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
