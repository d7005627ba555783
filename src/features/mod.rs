pub mod checkpoint_store;
pub mod control;
pub mod events;
pub mod humanize;
