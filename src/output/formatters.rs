use chrono::Utc;
use std::fmt;
use std::str::FromStr;

use crate::services::message_queue::DecodedMessage;

pub trait DataFormatter: Send + Sync {
    fn format_header(&self) -> String;
    fn format_message(&self, message: &DecodedMessage) -> String;

    fn format(&self, messages: &[DecodedMessage]) -> String {
        let mut output = self.format_header();
        for message in messages {
            output.push_str(&self.format_message(message));
            output.push('\n');
        }
        output
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Console,
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" | "text" => Ok(Self::Console),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown output format '{}', expected console, json or csv", other)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Console => write!(f, "console"),
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

pub fn formatter_for(format: OutputFormat) -> Box<dyn DataFormatter> {
    match format {
        OutputFormat::Console => Box::new(ConsoleFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

pub struct ConsoleFormatter;

impl DataFormatter for ConsoleFormatter {
    fn format_header(&self) -> String {
        format!("🚀 Modbus readings - {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"))
    }

    fn format_message(&self, message: &DecodedMessage) -> String {
        match message {
            DecodedMessage::ChannelPropertyState {
                station,
                identifier,
                region,
                address,
                data_type,
                value,
                ..
            } => format!(
                "🔹 [station {}] {} ({} {}, {}) = {}",
                station, identifier, region, address, data_type, value
            ),
            DecodedMessage::DeviceConnectionState { device, station, state, .. } => {
                let icon = match state {
                    crate::services::message_queue::ConnectionState::Connected => "✅",
                    crate::services::message_queue::ConnectionState::Lost => "❌",
                };
                format!("{} [station {}] device {} is {}", icon, station, device, state)
            }
        }
    }
}

/// One JSON document per message, so the output can be appended line by line.
pub struct JsonFormatter;

impl DataFormatter for JsonFormatter {
    fn format_header(&self) -> String {
        String::new()
    }

    fn format_message(&self, message: &DecodedMessage) -> String {
        serde_json::to_string(message).unwrap_or_default()
    }
}

pub struct CsvFormatter;

impl DataFormatter for CsvFormatter {
    fn format_header(&self) -> String {
        "timestamp,station,kind,identifier,region,address,data_type,value\n".to_string()
    }

    fn format_message(&self, message: &DecodedMessage) -> String {
        let prefix = format!("{},{}", message.timestamp().to_rfc3339(), message.station());
        match message {
            DecodedMessage::ChannelPropertyState {
                identifier,
                region,
                address,
                data_type,
                value,
                ..
            } => format!(
                "{},property,{},{},{},{},{}",
                prefix, identifier, region, address, data_type, value
            ),
            DecodedMessage::DeviceConnectionState { device, state, .. } => {
                format!("{},connection,{},,,,{}", prefix, device, state)
            }
        }
    }
}
