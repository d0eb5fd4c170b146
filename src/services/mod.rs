pub mod authorization;
pub mod chat_listener;
pub mod extractor;
pub mod playlist_worker;
