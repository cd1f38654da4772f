use crate::utils::error::ModbusError;

pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    let poly: u16 = 0xA001;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ poly;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Appends the CRC of `frame` in wire order (low byte first).
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16_modbus(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Checks the trailing two bytes against the CRC of everything before them.
pub fn verify_crc(frame: &[u8]) -> Result<(), ModbusError> {
    if frame.len() < 3 {
        return Err(ModbusError::FrameMalformed(format!(
            "frame of {} bytes cannot carry a CRC",
            frame.len()
        )));
    }

    let data_len = frame.len() - 2;
    let received = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
    let expected = crc16_modbus(&frame[..data_len]);

    if received != expected {
        return Err(ModbusError::CrcMismatch { expected, received });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_modbus() {
        let data = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        let crc = crc16_modbus(&data);
        assert_eq!(crc.to_le_bytes(), [0x84, 0x0A]);
    }

    #[test]
    fn appended_crc_validates() {
        let mut frame = vec![0x11, 0x03, 0x00, 0x6B, 0x00, 0x03];
        append_crc(&mut frame);
        assert_eq!(frame.len(), 8);
        assert!(verify_crc(&frame).is_ok());
    }

    #[test]
    fn any_single_bit_flip_is_detected() {
        let samples: [&[u8]; 3] = [
            &[0x01, 0x03, 0x00, 0x64, 0x00, 0x02],
            &[0x11, 0x05, 0x00, 0xAC, 0xFF, 0x00],
            &[0xF7, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x3F, 0xEC, 0xCC, 0xCD],
        ];

        for sample in samples {
            let mut frame = sample.to_vec();
            append_crc(&mut frame);

            for byte in 0..frame.len() {
                for bit in 0..8 {
                    let mut corrupted = frame.clone();
                    corrupted[byte] ^= 1 << bit;
                    assert!(
                        matches!(verify_crc(&corrupted), Err(ModbusError::CrcMismatch { .. })),
                        "flip of bit {} in byte {} went unnoticed",
                        bit,
                        byte
                    );
                }
            }
        }
    }

    #[test]
    fn too_short_frame_is_malformed() {
        assert!(matches!(verify_crc(&[0x01, 0x02]), Err(ModbusError::FrameMalformed(_))));
    }
}
