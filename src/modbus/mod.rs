pub mod client;
pub mod crc;
pub mod frame;
pub mod planner;
pub mod protocol;
pub mod retry;
pub mod transformer;

pub use client::{ExchangeState, ModbusClient, ModbusClientTrait, DEFAULT_RESPONSE_TIMEOUT};
pub use crc::crc16_modbus;
pub use frame::{FrameCodec, Framing};
pub use planner::RequestPlanner;
pub use protocol::{
    AddressSpan, DataType, DecodedValue, FunctionCode, ReadRequest, RegisterRegion, ResponseFrame, Station, Value,
    WriteRequest,
};
pub use retry::RetryPolicy;
pub use transformer::ByteOrder;
