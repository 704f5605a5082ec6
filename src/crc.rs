/// Polynomial x^7 + x^3 + 1, aligned to the top bits of a byte.
const CRC7_POLY: u8 = 0x09 << 1;
/// CCITT polynomial x^16 + x^12 + x^5 + 1.
const CRC16_POLY: u16 = 0x1021;

/// CRC7 of a command frame, in the low 7 bits.
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0u8;

    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC7_POLY
            } else {
                crc << 1
            };
        }
    }

    crc >> 1
}

/// CRC16 of a data block or a register.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;

    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
    }

    crc
}
