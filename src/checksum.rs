use crc::Crc;

/// CRC-16/IBM-3740 (a.k.a. CCITT-FALSE), used for data packet headers and control message headers
pub const CRC16: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_IBM_3740);

/// CRC-32/ISO-HDLC, used for data packet payloads (v1) and control message payloads
pub const CRC32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Calculates a CRC-16 over `header` followed by `rest`, treating the two bytes at `crc_offset`
///  in the header as zero. This is how a header's checksum field is excluded from its own checksum.
pub fn crc16_excluding_field(header: &[u8], crc_offset: usize, rest: &[u8]) -> u16 {
    let mut digest = CRC16.digest();
    digest.update(&header[..crc_offset]);
    digest.update(&[0, 0]);
    digest.update(&header[crc_offset + 2..]);
    digest.update(rest);
    digest.finalize()
}
