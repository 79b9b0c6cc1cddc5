pub mod chat;
pub mod feed;
pub mod shared;
pub mod ticket;
