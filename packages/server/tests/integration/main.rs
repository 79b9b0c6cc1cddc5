mod common;

mod chat;
mod feed;
mod ticket;
