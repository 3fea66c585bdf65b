pub mod assembler;
pub mod client;
pub mod phases;
pub mod poller;
pub mod selection;
