pub mod raw_packet;
pub mod packet_pool;
