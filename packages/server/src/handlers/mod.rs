pub mod chat;
pub mod feed;
pub mod health;
pub mod seat;
pub mod ticket;
