//! Modbus master engine
//!
//! Polls field devices over Modbus RTU (serial) or Modbus TCP. Channel
//! definitions are planned into the fewest legal read requests, exchanged one
//! at a time per line, decoded with the configured byte order and published as
//! messages on a shared queue.

pub mod cli;
pub mod config;
pub mod modbus;
pub mod output;
pub mod services;
pub mod transport;
pub mod utils;

pub use config::Config;
pub use modbus::{ByteOrder, ModbusClient, ModbusClientTrait, ReadRequest, RequestPlanner, RetryPolicy, WriteRequest};
pub use output::{ConsoleFormatter, CsvFormatter, DataFormatter, DataSender, JsonFormatter};
pub use services::{DecodedMessage, MessageQueue, PollService};
pub use transport::{create_transport, TransportChannel, TransportConfiguration};
pub use utils::error::{ModbusError, TransportError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
