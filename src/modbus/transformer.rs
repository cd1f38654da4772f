//! Register value codec.
//!
//! Converts the raw bytes of one or two 16-bit registers (exactly as they appear on the
//! wire) into typed numbers and back, honouring the device byte/word order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::protocol::{AddressSpan, DataType, Value};
use crate::utils::error::ModbusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// ABCD
    #[default]
    BigEndian,
    /// CDAB
    BigEndianLowWordFirst,
    /// BADC
    BigEndianByteSwap,
    /// DCBA
    LittleEndian,
    /// Little endian over swapped words (BADC)
    LittleEndianLowWordFirst,
    /// Little endian over byte-swapped words (CDAB)
    LittleEndianByteSwap,
}

impl ByteOrder {
    pub const ALL: [ByteOrder; 6] = [
        ByteOrder::BigEndian,
        ByteOrder::BigEndianLowWordFirst,
        ByteOrder::BigEndianByteSwap,
        ByteOrder::LittleEndian,
        ByteOrder::LittleEndianLowWordFirst,
        ByteOrder::LittleEndianByteSwap,
    ];

    fn is_little(&self) -> bool {
        matches!(
            self,
            Self::LittleEndian | Self::LittleEndianLowWordFirst | Self::LittleEndianByteSwap
        )
    }

    fn swaps_words(&self) -> bool {
        matches!(self, Self::BigEndianLowWordFirst | Self::LittleEndianLowWordFirst)
    }

    fn swaps_bytes(&self) -> bool {
        matches!(self, Self::BigEndianByteSwap | Self::LittleEndianByteSwap)
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BigEndian => "big_endian",
            Self::BigEndianLowWordFirst => "big_endian_low_word_first",
            Self::BigEndianByteSwap => "big_endian_byte_swap",
            Self::LittleEndian => "little_endian",
            Self::LittleEndianLowWordFirst => "little_endian_low_word_first",
            Self::LittleEndianByteSwap => "little_endian_byte_swap",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ByteOrder {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "big" | "big_endian" | "abcd" => Ok(Self::BigEndian),
            "big_endian_low_word_first" | "cdab" => Ok(Self::BigEndianLowWordFirst),
            "big_swap" | "big_endian_byte_swap" | "badc" => Ok(Self::BigEndianByteSwap),
            "little" | "little_endian" | "dcba" => Ok(Self::LittleEndian),
            "little_endian_low_word_first" => Ok(Self::LittleEndianLowWordFirst),
            "little_swap" | "little_endian_byte_swap" => Ok(Self::LittleEndianByteSwap),
            other => Err(ModbusError::ConfigError(format!("unknown byte order '{}'", other))),
        }
    }
}

fn check_width(bytes: &[u8]) -> Result<(), ModbusError> {
    match bytes.len() {
        2 | 4 => Ok(()),
        other => Err(ModbusError::ContractViolation(format!(
            "register values are 2 or 4 bytes, got {}",
            other
        ))),
    }
}

/// Maps wire bytes to most-significant-first order. Every step is an involution and
/// the steps commute, so the same function maps canonical bytes back to the wire.
fn reorder(bytes: &[u8], order: ByteOrder) -> Vec<u8> {
    let mut out = bytes.to_vec();

    if out.len() == 4 {
        if order.swaps_words() {
            out.swap(0, 2);
            out.swap(1, 3);
        }
        if order.swaps_bytes() {
            out.swap(0, 1);
            out.swap(2, 3);
        }
    }

    if order.is_little() {
        out.reverse();
    }
    out
}

pub fn unpack_unsigned_int(bytes: &[u8], order: ByteOrder) -> Result<u32, ModbusError> {
    check_width(bytes)?;
    Ok(reorder(bytes, order)
        .iter()
        .fold(0u32, |acc, &byte| (acc << 8) | byte as u32))
}

pub fn unpack_signed_int(bytes: &[u8], order: ByteOrder) -> Result<i32, ModbusError> {
    let raw = unpack_unsigned_int(bytes, order)?;
    if bytes.len() == 2 {
        Ok(raw as u16 as i16 as i32)
    } else {
        Ok(raw as i32)
    }
}

pub fn unpack_float(bytes: &[u8], order: ByteOrder) -> Result<f32, ModbusError> {
    if bytes.len() != 4 {
        return Err(ModbusError::ContractViolation(format!(
            "float values are 4 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(f32::from_bits(unpack_unsigned_int(bytes, order)?))
}

/// Packs `value` into `byte_width` wire bytes; wider values are truncated.
pub fn pack_unsigned_int(value: u32, byte_width: usize, order: ByteOrder) -> Result<Vec<u8>, ModbusError> {
    let canonical = match byte_width {
        2 => (value as u16).to_be_bytes().to_vec(),
        4 => value.to_be_bytes().to_vec(),
        other => {
            return Err(ModbusError::ContractViolation(format!(
                "register values are 2 or 4 bytes, got {}",
                other
            )))
        }
    };
    Ok(reorder(&canonical, order))
}

pub fn pack_signed_int(value: i32, byte_width: usize, order: ByteOrder) -> Result<Vec<u8>, ModbusError> {
    pack_unsigned_int(value as u32, byte_width, order)
}

pub fn pack_float(value: f32, order: ByteOrder) -> Vec<u8> {
    reorder(&value.to_bits().to_be_bytes(), order)
}

/// Decodes the bytes of one span according to its data type.
pub fn decode_value(span: &AddressSpan, bytes: &[u8], order: ByteOrder) -> Result<Value, ModbusError> {
    let value = match span.data_type {
        DataType::Boolean => Value::Boolean(unpack_unsigned_int(bytes, order)? != 0),
        DataType::Char => Value::Signed(unpack_signed_int(bytes, order)? as i8 as i32),
        DataType::UChar => Value::Unsigned(unpack_unsigned_int(bytes, order)? & 0xFF),
        DataType::Short | DataType::Int => Value::Signed(unpack_signed_int(bytes, order)?),
        DataType::UShort | DataType::UInt => Value::Unsigned(unpack_unsigned_int(bytes, order)?),
        DataType::Float => Value::Float(unpack_float(bytes, order)?),
    };

    Ok(apply_decimals(value, span.number_of_decimals))
}

fn apply_decimals(value: Value, decimals: Option<u32>) -> Value {
    let Some(decimals) = decimals else {
        return value;
    };

    let divisor = 10f64.powi(decimals as i32);
    match value {
        Value::Signed(v) => Value::Float((v as f64 / divisor) as f32),
        Value::Unsigned(v) => Value::Float((v as f64 / divisor) as f32),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::protocol::RegisterRegion;

    #[test]
    fn float_layouts_per_order() {
        let expected = 1.85f32;
        let cases: [(ByteOrder, [u8; 4]); 6] = [
            (ByteOrder::BigEndian, [0x3F, 0xEC, 0xCC, 0xCD]),
            (ByteOrder::BigEndianLowWordFirst, [0xCC, 0xCD, 0x3F, 0xEC]),
            (ByteOrder::BigEndianByteSwap, [0xEC, 0x3F, 0xCD, 0xCC]),
            (ByteOrder::LittleEndian, [0xCD, 0xCC, 0xEC, 0x3F]),
            (ByteOrder::LittleEndianLowWordFirst, [0xEC, 0x3F, 0xCD, 0xCC]),
            (ByteOrder::LittleEndianByteSwap, [0xCC, 0xCD, 0x3F, 0xEC]),
        ];

        for (order, bytes) in cases {
            assert_eq!(unpack_float(&bytes, order).unwrap(), expected, "{}", order);
            assert_eq!(pack_float(expected, order), bytes.to_vec(), "{}", order);
        }
    }

    #[test]
    fn two_byte_values_only_honour_endianness() {
        for order in ByteOrder::ALL {
            let expected = if order.is_little() { 0x3412 } else { 0x1234 };
            assert_eq!(unpack_unsigned_int(&[0x12, 0x34], order).unwrap(), expected);
        }
    }

    #[test]
    fn round_trips_at_boundaries() {
        let unsigned16 = [0u32, 1, 0x7FFF, 0x8000, 0xFFFF];
        let unsigned32 = [0u32, 1, 0xFFFF, 0x1_0000, 0x7FFF_FFFF, u32::MAX];
        let signed16 = [0i32, -1, i16::MIN as i32, i16::MAX as i32];
        let signed32 = [0i32, -1, i32::MIN, i32::MAX];
        let floats = [0.0f32, -0.0, 1.85, -273.15, f32::MAX, f32::MIN_POSITIVE, f32::INFINITY];

        for order in ByteOrder::ALL {
            for v in unsigned16 {
                let packed = pack_unsigned_int(v, 2, order).unwrap();
                assert_eq!(unpack_unsigned_int(&packed, order).unwrap(), v);
            }
            for v in unsigned32 {
                let packed = pack_unsigned_int(v, 4, order).unwrap();
                assert_eq!(unpack_unsigned_int(&packed, order).unwrap(), v);
            }
            for v in signed16 {
                let packed = pack_signed_int(v, 2, order).unwrap();
                assert_eq!(unpack_signed_int(&packed, order).unwrap(), v);
            }
            for v in signed32 {
                let packed = pack_signed_int(v, 4, order).unwrap();
                assert_eq!(unpack_signed_int(&packed, order).unwrap(), v);
            }
            for v in floats {
                let packed = pack_float(v, order);
                assert_eq!(unpack_float(&packed, order).unwrap().to_bits(), v.to_bits());
            }
        }
    }

    #[test]
    fn values_past_the_width_roll_over() {
        for order in ByteOrder::ALL {
            let packed = pack_unsigned_int(0xFFFF + 1, 2, order).unwrap();
            assert_eq!(unpack_unsigned_int(&packed, order).unwrap(), 0);

            let packed = pack_unsigned_int(u32::MAX.wrapping_add(1), 4, order).unwrap();
            assert_eq!(unpack_unsigned_int(&packed, order).unwrap(), 0);

            let packed = pack_signed_int(i16::MAX as i32 + 1, 2, order).unwrap();
            assert_eq!(unpack_signed_int(&packed, order).unwrap(), i16::MIN as i32);
        }
    }

    #[test]
    fn wrong_lengths_are_contract_violations() {
        for len in [0usize, 1, 3, 5, 8] {
            let bytes = vec![0u8; len];
            assert!(matches!(
                unpack_unsigned_int(&bytes, ByteOrder::BigEndian),
                Err(ModbusError::ContractViolation(_))
            ));
        }
        assert!(matches!(
            unpack_float(&[0, 0], ByteOrder::BigEndian),
            Err(ModbusError::ContractViolation(_))
        ));
        assert!(pack_unsigned_int(1, 3, ByteOrder::BigEndian).is_err());
    }

    #[test]
    fn span_decoding_uses_data_type_and_decimals() {
        let temperature = AddressSpan::new("t", RegisterRegion::InputRegister, 0, DataType::Short)
            .with_decimals(1);
        assert_eq!(
            decode_value(&temperature, &[0xFF, 0x83], ByteOrder::BigEndian).unwrap(),
            Value::Float(-12.5)
        );

        let counter = AddressSpan::new("c", RegisterRegion::HoldingRegister, 0, DataType::UInt);
        assert_eq!(
            decode_value(&counter, &[0x00, 0x01, 0x00, 0x00], ByteOrder::BigEndianLowWordFirst).unwrap(),
            Value::Unsigned(1)
        );

        let flag = AddressSpan::new("f", RegisterRegion::HoldingRegister, 0, DataType::Boolean);
        assert_eq!(
            decode_value(&flag, &[0x00, 0x02], ByteOrder::BigEndian).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn byte_order_names_parse() {
        assert_eq!("big".parse::<ByteOrder>().unwrap(), ByteOrder::BigEndian);
        assert_eq!("CDAB".parse::<ByteOrder>().unwrap(), ByteOrder::BigEndianLowWordFirst);
        assert_eq!("little_swap".parse::<ByteOrder>().unwrap(), ByteOrder::LittleEndianByteSwap);
        assert!("middle".parse::<ByteOrder>().is_err());
    }
}
