pub mod chat;
pub mod chat_participant;
pub mod feed_post;
pub mod file_record;
pub mod file_record_ref;
pub mod message;
pub mod purchased_ticket;
pub mod seat;
pub mod ticket;
pub mod user_data;
