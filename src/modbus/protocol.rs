use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::transformer::{self, ByteOrder};
use crate::utils::error::{ExceptionCode, ModbusError};

/// Unit / slave identifier. Zero is the RTU broadcast address.
pub type Station = u8;

pub const BROADCAST_STATION: Station = 0;

/// Protocol ceilings for a single request.
pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_REGISTERS: u16 = 123;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::ReadCoils),
            0x02 => Some(Self::ReadDiscreteInputs),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadCoils => "ReadCoils",
            Self::ReadDiscreteInputs => "ReadDiscreteInputs",
            Self::ReadHoldingRegisters => "ReadHoldingRegisters",
            Self::ReadInputRegisters => "ReadInputRegisters",
            Self::WriteSingleCoil => "WriteSingleCoil",
            Self::WriteSingleRegister => "WriteSingleRegister",
            Self::WriteMultipleRegisters => "WriteMultipleRegisters",
        };
        write!(f, "{}(0x{:02X})", name, self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterRegion {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

impl RegisterRegion {
    /// Single-bit regions as opposed to 16-bit word regions.
    pub fn is_bit(&self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Coil | Self::HoldingRegister)
    }

    pub fn read_function(&self) -> FunctionCode {
        match self {
            Self::Coil => FunctionCode::ReadCoils,
            Self::DiscreteInput => FunctionCode::ReadDiscreteInputs,
            Self::HoldingRegister => FunctionCode::ReadHoldingRegisters,
            Self::InputRegister => FunctionCode::ReadInputRegisters,
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Coil => "coil",
            Self::DiscreteInput => "discrete",
            Self::HoldingRegister => "holding",
            Self::InputRegister => "input",
        }
    }
}

impl fmt::Display for RegisterRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

impl FromStr for RegisterRegion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "coil" | "coils" => Ok(Self::Coil),
            "discrete" | "discrete_input" => Ok(Self::DiscreteInput),
            "holding" | "holding_register" => Ok(Self::HoldingRegister),
            "input" | "input_register" => Ok(Self::InputRegister),
            other => Err(format!(
                "unknown region '{}', expected coil, discrete, holding or input",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Float,
}

impl DataType {
    /// Number of 16-bit registers one value occupies.
    pub fn register_count(&self) -> u16 {
        match self {
            Self::Int | Self::UInt | Self::Float => 2,
            _ => 1,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Char | Self::Short | Self::Int)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Char => "char",
            Self::UChar => "uchar",
            Self::Short => "short",
            Self::UShort => "ushort",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "boolean" | "bool" => Ok(Self::Boolean),
            "char" => Ok(Self::Char),
            "uchar" => Ok(Self::UChar),
            "short" => Ok(Self::Short),
            "ushort" => Ok(Self::UShort),
            "int" => Ok(Self::Int),
            "uint" => Ok(Self::UInt),
            "float" => Ok(Self::Float),
            other => Err(format!("unknown data type '{}'", other)),
        }
    }
}

/// One logical typed value mapped onto one bit, or one or two consecutive registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressSpan {
    pub identifier: String,
    pub region: RegisterRegion,
    pub address: u16,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_decimals: Option<u32>,
}

impl AddressSpan {
    pub fn new(
        identifier: impl Into<String>,
        region: RegisterRegion,
        address: u16,
        data_type: DataType,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            region,
            address,
            data_type,
            number_of_decimals: None,
        }
    }

    pub fn with_decimals(mut self, decimals: u32) -> Self {
        self.number_of_decimals = Some(decimals);
        self
    }

    /// Registers (or bits) covered by this span.
    pub fn size(&self) -> u16 {
        if self.region.is_bit() {
            1
        } else {
            self.data_type.register_count()
        }
    }

    /// Exclusive end address, widened so `65535 + 2` does not wrap.
    pub fn end(&self) -> u32 {
        self.address as u32 + self.size() as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub station: Station,
    pub region: RegisterRegion,
    pub start_address: u16,
    pub quantity: u16,
    /// Logical values this request must satisfy. Empty means "one raw value per
    /// register or bit".
    pub spans: Vec<AddressSpan>,
    pub byte_order: ByteOrder,
}

impl ReadRequest {
    pub fn new(station: Station, region: RegisterRegion, start_address: u16, quantity: u16) -> Self {
        Self {
            station,
            region,
            start_address,
            quantity,
            spans: Vec::new(),
            byte_order: ByteOrder::default(),
        }
    }

    pub fn with_spans(mut self, spans: Vec<AddressSpan>) -> Self {
        self.spans = spans;
        self
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn function(&self) -> FunctionCode {
        self.region.read_function()
    }

    pub fn end(&self) -> u32 {
        self.start_address as u32 + self.quantity as u32
    }

    pub fn validate(&self) -> Result<(), ModbusError> {
        let ceiling = if self.region.is_bit() { MAX_READ_BITS } else { MAX_READ_REGISTERS };

        if self.quantity == 0 || self.quantity > ceiling {
            return Err(ModbusError::ContractViolation(format!(
                "{} quantity {} outside 1..={}",
                self.region, self.quantity, ceiling
            )));
        }

        if self.end() > 65536 {
            return Err(ModbusError::ContractViolation(format!(
                "read of {} from {} runs past address 65535",
                self.quantity, self.start_address
            )));
        }

        for span in &self.spans {
            if span.region != self.region
                || span.address < self.start_address
                || span.end() > self.end()
            {
                return Err(ModbusError::ContractViolation(format!(
                    "span '{}' at {} {} is not covered by read {}..{}",
                    span.identifier,
                    span.region,
                    span.address,
                    self.start_address,
                    self.end()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    SingleCoil {
        station: Station,
        address: u16,
        value: bool,
    },
    SingleRegister {
        station: Station,
        address: u16,
        value: u16,
    },
    MultipleRegisters {
        station: Station,
        start_address: u16,
        values: Vec<u16>,
    },
}

impl WriteRequest {
    pub fn station(&self) -> Station {
        match self {
            Self::SingleCoil { station, .. }
            | Self::SingleRegister { station, .. }
            | Self::MultipleRegisters { station, .. } => *station,
        }
    }

    pub fn function(&self) -> FunctionCode {
        match self {
            Self::SingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Self::SingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Self::MultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
        }
    }

    pub fn validate(&self) -> Result<(), ModbusError> {
        if let Self::MultipleRegisters { start_address, values, .. } = self {
            if values.is_empty() || values.len() > MAX_WRITE_REGISTERS as usize {
                return Err(ModbusError::ContractViolation(format!(
                    "multiple register write of {} words outside 1..={}",
                    values.len(),
                    MAX_WRITE_REGISTERS
                )));
            }
            if *start_address as usize + values.len() > 65536 {
                return Err(ModbusError::ContractViolation(format!(
                    "write of {} words from {} runs past address 65535",
                    values.len(),
                    start_address
                )));
            }
        }
        Ok(())
    }

    /// Builds the write that stores `value` into the location described by `span`.
    pub fn for_value(
        station: Station,
        span: &AddressSpan,
        value: Value,
        order: ByteOrder,
    ) -> Result<Self, ModbusError> {
        Self::for_number(station, span, value.as_f64(), order)
    }

    /// Same as [`WriteRequest::for_value`] for an engineering value that has not
    /// been narrowed to the span's type yet. Scaling and range checks run in f64.
    pub fn for_number(
        station: Station,
        span: &AddressSpan,
        value: f64,
        order: ByteOrder,
    ) -> Result<Self, ModbusError> {
        if !span.region.is_writable() {
            return Err(ModbusError::ContractViolation(format!(
                "{} '{}' is read-only",
                span.region, span.identifier
            )));
        }

        if span.region.is_bit() {
            return Ok(Self::SingleCoil {
                station,
                address: span.address,
                value: value != 0.0,
            });
        }

        let raw = match span.number_of_decimals {
            Some(decimals) => value * 10f64.powi(decimals as i32),
            None => value,
        };

        let bytes = match span.data_type {
            DataType::Float => transformer::pack_float(raw as f32, order),
            DataType::Boolean => transformer::pack_unsigned_int(u32::from(raw != 0.0), 2, order)?,
            data_type => {
                let (min, max) = integer_range(data_type);
                let rounded = raw.round();
                if rounded < min || rounded > max {
                    return Err(ModbusError::ContractViolation(format!(
                        "value {} does not fit {} '{}'",
                        raw, data_type, span.identifier
                    )));
                }
                let width = data_type.register_count() as usize * 2;
                if data_type.is_signed() {
                    transformer::pack_signed_int(rounded as i32, width, order)?
                } else {
                    transformer::pack_unsigned_int(rounded as u32, width, order)?
                }
            }
        };

        let mut words: Vec<u16> = bytes
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();

        if words.len() == 1 {
            Ok(Self::SingleRegister {
                station,
                address: span.address,
                value: words.remove(0),
            })
        } else {
            Ok(Self::MultipleRegisters {
                station,
                start_address: span.address,
                values: words,
            })
        }
    }
}

fn integer_range(data_type: DataType) -> (f64, f64) {
    match data_type {
        DataType::Char => (i8::MIN as f64, i8::MAX as f64),
        DataType::UChar => (0.0, u8::MAX as f64),
        DataType::Short => (i16::MIN as f64, i16::MAX as f64),
        DataType::UShort => (0.0, u16::MAX as f64),
        DataType::Int => (i32::MIN as f64, i32::MAX as f64),
        _ => (0.0, u32::MAX as f64),
    }
}

/// Parsed response: either a normal answer or an exception, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFrame {
    Normal {
        station: Station,
        function: u8,
        payload: Vec<u8>,
    },
    Exception {
        station: Station,
        function: u8,
        code: ExceptionCode,
    },
}

impl ResponseFrame {
    /// Parses `[station][function][data..]` with the transport envelope already removed.
    pub fn from_unit_bytes(bytes: &[u8]) -> Result<Self, ModbusError> {
        if bytes.len() < 3 {
            return Err(ModbusError::FrameMalformed(format!(
                "response length too short: {} bytes",
                bytes.len()
            )));
        }

        let station = bytes[0];
        let function = bytes[1];

        if function & 0x80 != 0 {
            if bytes.len() != 3 {
                return Err(ModbusError::FrameMalformed(format!(
                    "exception response carries {} data bytes",
                    bytes.len() - 2
                )));
            }
            return Ok(Self::Exception {
                station,
                function,
                code: ExceptionCode::from_u8(bytes[2]),
            });
        }

        Ok(Self::Normal {
            station,
            function,
            payload: bytes[2..].to_vec(),
        })
    }

    pub fn station(&self) -> Station {
        match self {
            Self::Normal { station, .. } | Self::Exception { station, .. } => *station,
        }
    }

    /// Checks the echo of station and function, surfacing exceptions as errors.
    pub fn into_payload(self, station: Station, function: FunctionCode) -> Result<Vec<u8>, ModbusError> {
        if self.station() != station {
            return Err(ModbusError::FrameMalformed(format!(
                "response from station {} while waiting for station {}",
                self.station(),
                station
            )));
        }

        match self {
            Self::Exception { function: raw, code, .. } => {
                if raw & 0x7F != function.code() {
                    return Err(ModbusError::FrameMalformed(format!(
                        "illegal error code 0x{:02X} for {}",
                        raw, function
                    )));
                }
                Err(ModbusError::Exception {
                    function: function.code(),
                    code,
                })
            }
            Self::Normal { function: raw, payload, .. } => {
                if raw != function.code() {
                    return Err(ModbusError::FrameMalformed(format!(
                        "unexpected function code 0x{:02X}, expected {}",
                        raw, function
                    )));
                }
                Ok(payload)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Signed(i32),
    Unsigned(u32),
    Float(f32),
}

impl Value {
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Boolean(v) => f64::from(u8::from(*v)),
            Self::Signed(v) => *v as f64,
            Self::Unsigned(v) => *v as f64,
            Self::Float(v) => *v as f64,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Self::Boolean(v) => *v,
            other => other.as_f64() != 0.0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Signed(v) => write!(f, "{}", v),
            Self::Unsigned(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
        }
    }
}

/// A decoded logical value together with the span it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedValue {
    pub span: AddressSpan,
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_response_is_recognised() {
        let frame = ResponseFrame::from_unit_bytes(&[0x11, 0x83, 0x02]).unwrap();
        assert_eq!(
            frame,
            ResponseFrame::Exception {
                station: 0x11,
                function: 0x83,
                code: ExceptionCode::IllegalDataAddress,
            }
        );

        let err = frame
            .into_payload(0x11, FunctionCode::ReadHoldingRegisters)
            .unwrap_err();
        assert_eq!(
            err,
            ModbusError::Exception {
                function: 0x03,
                code: ExceptionCode::IllegalDataAddress
            }
        );
    }

    #[test]
    fn mismatched_echo_is_malformed() {
        let frame = ResponseFrame::from_unit_bytes(&[0x02, 0x03, 0x02, 0x00, 0x01]).unwrap();
        assert!(matches!(
            frame.clone().into_payload(0x01, FunctionCode::ReadHoldingRegisters),
            Err(ModbusError::FrameMalformed(_))
        ));
        assert!(matches!(
            frame.into_payload(0x02, FunctionCode::ReadInputRegisters),
            Err(ModbusError::FrameMalformed(_))
        ));
    }

    #[test]
    fn read_request_limits() {
        assert!(ReadRequest::new(1, RegisterRegion::HoldingRegister, 0, 125).validate().is_ok());
        assert!(ReadRequest::new(1, RegisterRegion::HoldingRegister, 0, 126).validate().is_err());
        assert!(ReadRequest::new(1, RegisterRegion::Coil, 0, 2000).validate().is_ok());
        assert!(ReadRequest::new(1, RegisterRegion::Coil, 0, 2001).validate().is_err());
        assert!(ReadRequest::new(1, RegisterRegion::InputRegister, 65535, 1).validate().is_ok());
        assert!(ReadRequest::new(1, RegisterRegion::InputRegister, 65535, 2).validate().is_err());
        assert!(ReadRequest::new(1, RegisterRegion::InputRegister, 0, 0).validate().is_err());
    }

    #[test]
    fn spans_outside_request_are_rejected() {
        let request = ReadRequest::new(1, RegisterRegion::HoldingRegister, 10, 2).with_spans(vec![
            AddressSpan::new("power", RegisterRegion::HoldingRegister, 11, DataType::Float),
        ]);
        assert!(request.validate().is_err());
    }

    #[test]
    fn float_write_becomes_multiple_registers() {
        let span = AddressSpan::new("setpoint", RegisterRegion::HoldingRegister, 100, DataType::Float);
        let request = WriteRequest::for_value(1, &span, Value::Float(1.85), ByteOrder::BigEndian).unwrap();
        assert_eq!(
            request,
            WriteRequest::MultipleRegisters {
                station: 1,
                start_address: 100,
                values: vec![0x3FEC, 0xCCCD],
            }
        );
    }

    #[test]
    fn scaled_short_write_becomes_single_register() {
        let span = AddressSpan::new("temperature", RegisterRegion::HoldingRegister, 7, DataType::Short)
            .with_decimals(1);
        let request = WriteRequest::for_value(3, &span, Value::Float(-12.5), ByteOrder::BigEndian).unwrap();
        assert_eq!(
            request,
            WriteRequest::SingleRegister {
                station: 3,
                address: 7,
                value: (-125i16) as u16,
            }
        );
    }

    #[test]
    fn out_of_range_and_read_only_writes_are_rejected() {
        let span = AddressSpan::new("level", RegisterRegion::HoldingRegister, 0, DataType::UChar);
        assert!(WriteRequest::for_value(1, &span, Value::Unsigned(300), ByteOrder::BigEndian).is_err());

        let input = AddressSpan::new("sensor", RegisterRegion::InputRegister, 0, DataType::UShort);
        assert!(WriteRequest::for_value(1, &input, Value::Unsigned(1), ByteOrder::BigEndian).is_err());

        let coil = AddressSpan::new("relay", RegisterRegion::Coil, 4, DataType::Boolean);
        assert_eq!(
            WriteRequest::for_value(1, &coil, Value::Unsigned(1), ByteOrder::BigEndian).unwrap(),
            WriteRequest::SingleCoil { station: 1, address: 4, value: true }
        );
    }

    #[test]
    fn names_parse() {
        assert_eq!("holding".parse::<RegisterRegion>(), Ok(RegisterRegion::HoldingRegister));
        assert_eq!("discrete-input".parse::<RegisterRegion>(), Ok(RegisterRegion::DiscreteInput));
        assert_eq!("UInt".parse::<DataType>(), Ok(DataType::UInt));
        assert!("word".parse::<DataType>().is_err());
    }

    #[test]
    fn wide_integer_writes_keep_full_precision() {
        let span = AddressSpan::new("counter", RegisterRegion::HoldingRegister, 20, DataType::UInt);
        let request = WriteRequest::for_number(1, &span, 16_777_217.0, ByteOrder::BigEndian).unwrap();
        assert_eq!(
            request,
            WriteRequest::MultipleRegisters {
                station: 1,
                start_address: 20,
                values: vec![0x0100, 0x0001],
            }
        );

        let scaled = span.clone().with_decimals(1);
        let request = WriteRequest::for_number(1, &scaled, 1_677_721.7, ByteOrder::BigEndian).unwrap();
        assert!(matches!(request, WriteRequest::MultipleRegisters { ref values, .. } if values == &[0x0100, 0x0001]));

        let signed = AddressSpan::new("offset", RegisterRegion::HoldingRegister, 30, DataType::Int);
        let request = WriteRequest::for_number(1, &signed, -16_777_217.0, ByteOrder::BigEndian).unwrap();
        assert!(matches!(request, WriteRequest::MultipleRegisters { ref values, .. } if values == &[0xFEFF, 0xFFFF]));
    }

    #[test]
    fn multiple_register_write_limits() {
        let request = WriteRequest::MultipleRegisters {
            station: 1,
            start_address: 0,
            values: vec![0; 124],
        };
        assert!(request.validate().is_err());
    }
}
