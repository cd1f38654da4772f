pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::modbus::protocol::{DataType, RegisterRegion, Station};
use crate::modbus::transformer::ByteOrder;
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "modbus-master",
    version = crate::VERSION,
    about = "Modbus RTU/TCP master: poll, read and write field devices",
    propagate_version = true
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = "modbus.toml", global = true)]
    pub config: PathBuf,

    /// Debug logging, including raw frames
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Read every configured channel once, or repeatedly with --watch
    Poll(PollArgs),

    /// Read a register range from one station
    Read(ReadArgs),

    /// Write a coil, a register or a configured channel
    #[command(subcommand)]
    Write(WriteCommand),

    /// List serial ports on this host
    Ports,

    /// Write a sample configuration file
    #[command(name = "init-config")]
    InitConfig {
        #[arg(default_value = "modbus.toml")]
        path: PathBuf,
    },

    /// Print the line configuration command for each serial transport
    #[command(name = "serial-command")]
    SerialCommand,
}

#[derive(Args, Debug, Clone)]
pub struct PollArgs {
    /// Poll again every N seconds until Ctrl+C
    #[arg(long, value_name = "SECONDS")]
    pub watch: Option<u64>,

    #[arg(long, default_value = "console")]
    pub format: OutputFormat,

    /// Append output to this file instead of printing it
    #[arg(long)]
    pub output_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Use the transport, station and byte order of a configured device
    #[arg(long)]
    pub device: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub station: Station,
}

#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(long, default_value = "holding")]
    pub region: RegisterRegion,

    #[arg(long)]
    pub address: u16,

    /// Number of values (raw registers or bits without --data-type)
    #[arg(long, default_value_t = 1)]
    pub count: u16,

    #[arg(long)]
    pub data_type: Option<DataType>,

    #[arg(long)]
    pub byte_order: Option<ByteOrder>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum WriteCommand {
    Coil {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        address: u16,
        #[arg(long, value_parser = parse_switch)]
        value: bool,
    },
    Register {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        address: u16,
        #[arg(long)]
        value: u16,
    },
    Registers {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        address: u16,
        /// Comma separated words
        #[arg(long, value_delimiter = ',', required = true)]
        values: Vec<u16>,
    },
    /// Write an engineering value to a settable configured channel
    Channel {
        #[arg(long)]
        device: String,
        #[arg(long)]
        channel: String,
        #[arg(long, allow_negative_numbers = true)]
        value: f64,
    },
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" => Ok(true),
        "0" | "off" | "false" => Ok(false),
        other => Err(format!("'{}' is not on/off", other)),
    }
}
