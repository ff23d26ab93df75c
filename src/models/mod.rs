pub mod device;
pub mod location;
pub mod session;
pub mod two_factor;

pub use device::*;
pub use location::*;
pub use session::*;
pub use two_factor::*;
