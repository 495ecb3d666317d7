pub mod codec;
pub mod core_api;
pub mod guard;
pub mod host;
pub mod layout;
pub mod reader;
pub mod roll;
pub mod shuffle_bag;
pub mod slot;
pub mod slots;
pub mod store;
pub mod token;
