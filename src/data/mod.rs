pub mod packet_header;
pub mod socket_reader;
