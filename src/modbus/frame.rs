//! ADU framing for RTU (CRC16 trailer) and TCP (MBAP header).

use super::crc::{append_crc, verify_crc};
use super::protocol::{ReadRequest, ResponseFrame, Station, WriteRequest};
use crate::utils::error::ModbusError;

/// Largest ADU either variant can carry.
pub const MAX_ADU_LENGTH: usize = 260;

/// transaction id + protocol id + length
const MBAP_PREFIX_LENGTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Rtu,
    Tcp,
}

pub fn read_pdu(request: &ReadRequest) -> Vec<u8> {
    let mut pdu = vec![request.function().code()];
    pdu.extend_from_slice(&request.start_address.to_be_bytes());
    pdu.extend_from_slice(&request.quantity.to_be_bytes());
    pdu
}

pub fn write_pdu(request: &WriteRequest) -> Vec<u8> {
    let mut pdu = vec![request.function().code()];
    match request {
        WriteRequest::SingleCoil { address, value, .. } => {
            pdu.extend_from_slice(&address.to_be_bytes());
            pdu.extend_from_slice(&coil_word(*value).to_be_bytes());
        }
        WriteRequest::SingleRegister { address, value, .. } => {
            pdu.extend_from_slice(&address.to_be_bytes());
            pdu.extend_from_slice(&value.to_be_bytes());
        }
        WriteRequest::MultipleRegisters { start_address, values, .. } => {
            pdu.extend_from_slice(&start_address.to_be_bytes());
            pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
            pdu.push((values.len() * 2) as u8);
            for value in values {
                pdu.extend_from_slice(&value.to_be_bytes());
            }
        }
    }
    pdu
}

fn coil_word(value: bool) -> u16 {
    if value {
        0xFF00
    } else {
        0x0000
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    framing: Framing,
}

impl FrameCodec {
    pub fn new(framing: Framing) -> Self {
        Self { framing }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Wraps a PDU into an ADU. `transaction_id` is ignored for RTU.
    pub fn encode(&self, station: Station, pdu: &[u8], transaction_id: u16) -> Vec<u8> {
        match self.framing {
            Framing::Rtu => {
                let mut frame = Vec::with_capacity(pdu.len() + 3);
                frame.push(station);
                frame.extend_from_slice(pdu);
                append_crc(&mut frame);
                frame
            }
            Framing::Tcp => {
                let mut frame = Vec::with_capacity(pdu.len() + 7);
                frame.extend_from_slice(&transaction_id.to_be_bytes());
                frame.extend_from_slice(&0u16.to_be_bytes());
                frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
                frame.push(station);
                frame.extend_from_slice(pdu);
                frame
            }
        }
    }

    /// Length of the frame at the start of `buffer`, or `None` while more bytes are
    /// needed to tell.
    pub fn frame_length(&self, buffer: &[u8]) -> Result<Option<usize>, ModbusError> {
        match self.framing {
            Framing::Rtu => rtu_frame_length(buffer),
            Framing::Tcp => tcp_frame_length(buffer),
        }
    }

    /// True for a complete TCP frame answering an earlier transaction, such as a
    /// reply that arrived after its exchange timed out.
    pub fn is_stale(&self, frame: &[u8], transaction_id: u16) -> bool {
        self.framing == Framing::Tcp
            && frame.len() >= 2
            && u16::from_be_bytes([frame[0], frame[1]]) != transaction_id
    }

    /// Validates the envelope of a complete frame and parses its unit bytes.
    pub fn decode(&self, frame: &[u8], transaction_id: u16) -> Result<ResponseFrame, ModbusError> {
        match self.framing {
            Framing::Rtu => {
                verify_crc(frame)?;
                ResponseFrame::from_unit_bytes(&frame[..frame.len() - 2])
            }
            Framing::Tcp => {
                if frame.len() < MBAP_PREFIX_LENGTH + 3 {
                    return Err(ModbusError::FrameMalformed(format!(
                        "TCP response length too short: {} bytes",
                        frame.len()
                    )));
                }

                let received_transaction = u16::from_be_bytes([frame[0], frame[1]]);
                let protocol = u16::from_be_bytes([frame[2], frame[3]]);
                let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;

                if received_transaction != transaction_id {
                    return Err(ModbusError::FrameMalformed(format!(
                        "transaction id {} does not match request {}",
                        received_transaction, transaction_id
                    )));
                }
                if protocol != 0 {
                    return Err(ModbusError::FrameMalformed(format!(
                        "protocol id {} is not Modbus",
                        protocol
                    )));
                }
                if length != frame.len() - MBAP_PREFIX_LENGTH {
                    return Err(ModbusError::FrameMalformed(format!(
                        "MBAP length {} but {} bytes follow the header",
                        length,
                        frame.len() - MBAP_PREFIX_LENGTH
                    )));
                }

                ResponseFrame::from_unit_bytes(&frame[MBAP_PREFIX_LENGTH..])
            }
        }
    }
}

fn rtu_frame_length(buffer: &[u8]) -> Result<Option<usize>, ModbusError> {
    if buffer.len() < 2 {
        return Ok(None);
    }

    let function = buffer[1];
    if function & 0x80 != 0 {
        // station + function + exception code + crc
        return Ok(Some(5));
    }

    match function {
        0x01..=0x04 => {
            if buffer.len() < 3 {
                return Ok(None);
            }
            Ok(Some(3 + buffer[2] as usize + 2))
        }
        0x05 | 0x06 | 0x10 => Ok(Some(8)),
        other => Err(ModbusError::FrameMalformed(format!(
            "unexpected function code 0x{:02X} in response",
            other
        ))),
    }
}

fn tcp_frame_length(buffer: &[u8]) -> Result<Option<usize>, ModbusError> {
    if buffer.len() < MBAP_PREFIX_LENGTH {
        return Ok(None);
    }

    let length = u16::from_be_bytes([buffer[4], buffer[5]]) as usize;
    if length < 3 || MBAP_PREFIX_LENGTH + length > MAX_ADU_LENGTH {
        return Err(ModbusError::FrameMalformed(format!(
            "MBAP length {} out of range",
            length
        )));
    }
    Ok(Some(MBAP_PREFIX_LENGTH + length))
}

/// Strips the byte-count prefix of a register read response.
pub fn decode_registers(payload: &[u8], quantity: u16) -> Result<Vec<u8>, ModbusError> {
    let expected = quantity as usize * 2;
    check_byte_count(payload, expected)?;
    Ok(payload[1..].to_vec())
}

/// Unpacks a coil / discrete input response, LSB first within each byte.
pub fn decode_bits(payload: &[u8], quantity: u16) -> Result<Vec<bool>, ModbusError> {
    let expected = (quantity as usize + 7) / 8;
    check_byte_count(payload, expected)?;

    Ok(payload[1..]
        .iter()
        .flat_map(|byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
        .take(quantity as usize)
        .collect())
}

fn check_byte_count(payload: &[u8], expected: usize) -> Result<(), ModbusError> {
    let Some((&count, data)) = payload.split_first() else {
        return Err(ModbusError::FrameMalformed("response carries no byte count".to_string()));
    };

    if count as usize != expected || data.len() != expected {
        return Err(ModbusError::FrameMalformed(format!(
            "byte count {} with {} data bytes, expected {}",
            count,
            data.len(),
            expected
        )));
    }
    Ok(())
}

/// Write responses echo the address and the value (or quantity) of the request.
pub fn check_write_echo(request: &WriteRequest, payload: &[u8]) -> Result<(), ModbusError> {
    let expected = &write_pdu(request)[1..5];

    if payload != expected {
        return Err(ModbusError::FrameMalformed(format!(
            "write echo {} does not match request {}",
            hex::encode(payload),
            hex::encode(expected)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::crc::append_crc;
    use crate::modbus::protocol::RegisterRegion;
    use crate::utils::error::{ExceptionCode, ModbusError};

    fn holding_read() -> ReadRequest {
        ReadRequest::new(1, RegisterRegion::HoldingRegister, 100, 2)
    }

    #[test]
    fn rtu_read_request_layout() {
        let codec = FrameCodec::new(Framing::Rtu);
        let frame = codec.encode(1, &read_pdu(&holding_read()), 0);
        assert_eq!(&frame[..6], &[0x01, 0x03, 0x00, 0x64, 0x00, 0x02]);
        assert!(verify_crc(&frame).is_ok());
    }

    #[test]
    fn tcp_length_counts_unit_and_pdu() {
        let codec = FrameCodec::new(Framing::Tcp);
        let pdu = read_pdu(&holding_read());
        let frame = codec.encode(1, &pdu, 0x1234);

        assert_eq!(&frame[..4], &[0x12, 0x34, 0x00, 0x00]);
        assert_eq!(u16::from_be_bytes([frame[4], frame[5]]) as usize, pdu.len() + 1);
        assert_eq!(frame[6], 1);
        assert_eq!(&frame[7..], pdu.as_slice());
    }

    #[test]
    fn tcp_response_with_wrong_length_is_malformed() {
        let codec = FrameCodec::new(Framing::Tcp);
        let good = [0x00, 0x07, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x2A];
        assert!(codec.decode(&good, 7).is_ok());

        let mut bad = good;
        bad[5] = 0x06;
        assert!(matches!(codec.decode(&bad, 7), Err(ModbusError::FrameMalformed(_))));
    }

    #[test]
    fn tcp_transaction_mismatch_is_rejected() {
        let codec = FrameCodec::new(Framing::Tcp);
        let frame = [0x00, 0x08, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x2A];
        assert!(matches!(codec.decode(&frame, 7), Err(ModbusError::FrameMalformed(_))));
        assert!(codec.is_stale(&frame, 7));
        assert!(!codec.is_stale(&frame, 8));
    }

    #[test]
    fn rtu_frames_are_never_stale() {
        let codec = FrameCodec::new(Framing::Rtu);
        let mut frame = vec![0x01, 0x06, 0x00, 0x01, 0x00, 0x02];
        append_crc(&mut frame);
        assert!(!codec.is_stale(&frame, 42));
    }

    #[test]
    fn rtu_exception_frame() {
        let codec = FrameCodec::new(Framing::Rtu);
        let mut frame = vec![0x11, 0x83, 0x02];
        append_crc(&mut frame);

        assert_eq!(codec.frame_length(&frame[..2]).unwrap(), Some(5));
        assert_eq!(
            codec.decode(&frame, 0).unwrap(),
            ResponseFrame::Exception {
                station: 0x11,
                function: 0x83,
                code: ExceptionCode::IllegalDataAddress
            }
        );
    }

    #[test]
    fn rtu_frame_length_needs_byte_count() {
        let codec = FrameCodec::new(Framing::Rtu);
        assert_eq!(codec.frame_length(&[0x01]).unwrap(), None);
        assert_eq!(codec.frame_length(&[0x01, 0x03]).unwrap(), None);
        assert_eq!(codec.frame_length(&[0x01, 0x03, 0x04]).unwrap(), Some(9));
        assert_eq!(codec.frame_length(&[0x01, 0x10]).unwrap(), Some(8));
        assert!(codec.frame_length(&[0x01, 0x2B]).is_err());
    }

    #[test]
    fn rtu_crc_failure_is_reported() {
        let codec = FrameCodec::new(Framing::Rtu);
        let mut frame = vec![0x01, 0x03, 0x02, 0x00, 0x2A];
        append_crc(&mut frame);
        frame[3] ^= 0x01;
        assert!(matches!(codec.decode(&frame, 0), Err(ModbusError::CrcMismatch { .. })));
    }

    #[test]
    fn bits_are_lsb_first_and_trimmed() {
        let bits = decode_bits(&[0x02, 0b1100_1101, 0b0000_0001], 10).unwrap();
        assert_eq!(
            bits,
            vec![true, false, true, true, false, false, true, true, true, false]
        );
        assert!(decode_bits(&[0x01, 0xFF], 10).is_err());
    }

    #[test]
    fn register_byte_count_is_checked() {
        assert_eq!(
            decode_registers(&[0x04, 0x3F, 0xEC, 0xCC, 0xCD], 2).unwrap(),
            vec![0x3F, 0xEC, 0xCC, 0xCD]
        );
        assert!(decode_registers(&[0x02, 0x3F, 0xEC], 2).is_err());
        assert!(decode_registers(&[], 1).is_err());
    }

    #[test]
    fn write_pdus_and_echoes() {
        let coil = WriteRequest::SingleCoil { station: 1, address: 0xAC, value: true };
        assert_eq!(write_pdu(&coil), vec![0x05, 0x00, 0xAC, 0xFF, 0x00]);
        assert!(check_write_echo(&coil, &[0x00, 0xAC, 0xFF, 0x00]).is_ok());
        assert!(check_write_echo(&coil, &[0x00, 0xAC, 0x00, 0x00]).is_err());

        let registers = WriteRequest::MultipleRegisters {
            station: 1,
            start_address: 1,
            values: vec![0x000A, 0x0102],
        };
        assert_eq!(
            write_pdu(&registers),
            vec![0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
        assert!(check_write_echo(&registers, &[0x00, 0x01, 0x00, 0x02]).is_ok());
    }
}
