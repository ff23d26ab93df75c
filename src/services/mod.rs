pub mod devices;
pub mod events;
pub mod location;
pub mod sessions;
pub mod tracker;
pub mod two_factor;
pub mod ua;
