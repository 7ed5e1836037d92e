pub mod encoder;
pub mod fanout;
pub mod heartbeat;
pub mod transcoder;
