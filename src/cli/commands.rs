use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{Cli, Commands, PollArgs, ReadArgs, TargetArgs, WriteCommand};
use crate::config::Config;
use crate::modbus::client::{ModbusClient, ModbusClientTrait};
use crate::modbus::protocol::{AddressSpan, DataType, ReadRequest, Station, WriteRequest};
use crate::modbus::retry::RetryPolicy;
use crate::modbus::transformer::ByteOrder;
use crate::output::{formatter_for, ConsoleSender, DataFormatter, DataSender, FileSender};
use crate::services::{MessageQueue, PollService, PollSettings};
use crate::transport::configurator::SerialConfigurator;
use crate::transport::{create_transport, TransportConfiguration};

pub async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::InitConfig { path } => init_config(path),
        Commands::Ports => list_serial_ports(),
        command => {
            let config = load_config(&cli.config)?;
            match command {
                Commands::Poll(args) => poll(&config, args).await,
                Commands::Read(args) => read(&config, args).await,
                Commands::Write(write) => write_value(&config, write).await,
                Commands::SerialCommand => {
                    print_serial_commands(&config);
                    Ok(())
                }
                Commands::InitConfig { .. } | Commands::Ports => Ok(()),
            }
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        return Config::from_file(path).with_context(|| format!("loading {}", path.display()));
    }
    warn!("⚠️ {} not found, using the built-in sample configuration", path.display());
    Ok(Config::default())
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{} already exists, refusing to overwrite it", path.display());
    }
    Config::default().save_to_file(path)?;
    println!("✅ Sample configuration written to {}", path.display());
    Ok(())
}

fn list_serial_ports() -> Result<()> {
    println!("📡 Available Serial Ports:");

    let ports = serialport::available_ports().context("enumerating serial ports")?;
    if ports.is_empty() {
        println!("   ⚠️  No serial ports found");
        return Ok(());
    }

    for (index, port) in ports.iter().enumerate() {
        println!("   {}. {}", index + 1, port.port_name);
        if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
            if let Some(manufacturer) = &usb.manufacturer {
                println!("      📱 Manufacturer: {}", manufacturer);
            }
            if let Some(serial_number) = &usb.serial_number {
                println!("      🔢 Serial Number: {}", serial_number);
            }
        }
    }
    Ok(())
}

fn print_serial_commands(config: &Config) {
    let configurator = SerialConfigurator::detect();
    let mut seen = Vec::new();

    let transports = std::iter::once(&config.connector.transport)
        .chain(config.devices.iter().filter_map(|d| d.transport.as_ref()));
    for transport in transports {
        if let TransportConfiguration::Rtu(settings) = transport {
            if seen.contains(&settings.device_path) {
                continue;
            }
            seen.push(settings.device_path.clone());
            println!("{}", configurator.command_line(settings));
        }
    }

    if seen.is_empty() {
        println!("No serial transports configured");
    }
}

async fn poll(config: &Config, args: &PollArgs) -> Result<()> {
    let queue = Arc::new(MessageQueue::new());
    let settings = PollSettings::from(&config.connector);
    let connect_timeout = config.connector.timeout();
    let mut service = PollService::new(config, settings, Arc::clone(&queue), |transport| {
        create_transport(transport, connect_timeout)
    })?;

    if service.device_count() == 0 {
        warn!("⚠️ No enabled device has channels, nothing to poll");
        return Ok(());
    }

    let formatter = formatter_for(args.format);
    let sender: Box<dyn DataSender> = match &args.output_file {
        Some(path) => {
            info!("📝 Writing {} output to {}", args.format, path.display());
            Box::new(FileSender::new(path, true))
        }
        None => Box::new(ConsoleSender),
    };

    let Some(seconds) = args.watch else {
        let summary = service.poll_once().await;
        emit(&queue, formatter.as_ref(), sender.as_ref(), true).await?;
        service.shutdown().await;
        if summary.values_read == 0 && !summary.errors.is_empty() {
            bail!("no values could be read ({} errors)", summary.errors.len());
        }
        return Ok(());
    };

    info!("🔄 Polling every {}s, press Ctrl+C to stop", seconds);
    let mut interval = tokio::time::interval(Duration::from_secs(seconds.max(1)));
    let mut first = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Stopping");
                break;
            }
            _ = interval.tick() => {
                let summary = service.poll_once().await;
                info!(
                    "📊 Cycle done: {} devices polled, {} skipped, {} values, {} errors",
                    summary.devices_polled,
                    summary.devices_skipped,
                    summary.values_read,
                    summary.errors.len()
                );
                emit(&queue, formatter.as_ref(), sender.as_ref(), first).await?;
                first = false;
            }
        }
    }

    service.shutdown().await;
    Ok(())
}

async fn emit(
    queue: &MessageQueue,
    formatter: &dyn DataFormatter,
    sender: &dyn DataSender,
    with_header: bool,
) -> Result<()> {
    let messages = queue.drain();
    if messages.is_empty() {
        return Ok(());
    }

    let mut output = if with_header { formatter.format_header() } else { String::new() };
    for message in &messages {
        output.push_str(&formatter.format_message(message));
        output.push('\n');
    }
    sender.send(&output).await?;
    Ok(())
}

/// Client, station and byte order for an ad-hoc command.
struct Target {
    client: ModbusClient,
    station: Station,
    byte_order: ByteOrder,
}

fn resolve_target(config: &Config, args: &TargetArgs) -> Result<Target> {
    let (transport, station, byte_order) = match &args.device {
        Some(identifier) => {
            let device = config
                .device(identifier)
                .ok_or_else(|| anyhow!("device '{}' is not configured", identifier))?;
            (config.transport_for(device).clone(), device.station, device.byte_order)
        }
        None => (config.connector.transport.clone(), args.station, ByteOrder::default()),
    };

    info!("🔌 Using {}", transport);
    let client = ModbusClient::new(
        create_transport(&transport, config.connector.timeout()),
        Arc::new(MessageQueue::new()),
        config.connector.timeout(),
    );
    Ok(Target { client, station, byte_order })
}

fn read_request(args: &ReadArgs, station: Station, byte_order: ByteOrder) -> Result<ReadRequest> {
    let Some(data_type) = args.data_type else {
        return Ok(ReadRequest::new(station, args.region, args.address, args.count));
    };
    if args.region.is_bit() && data_type != DataType::Boolean {
        bail!("{} can only be read as boolean", args.region);
    }

    let width = data_type.register_count();
    let quantity = u32::from(args.count) * u32::from(width);
    if u32::from(args.address) + quantity > 65536 {
        bail!("{} {} values from {} run past address 65535", args.count, data_type, args.address);
    }

    let spans: Vec<AddressSpan> = (0..args.count)
        .map(|index| {
            let address = args.address + index * width;
            AddressSpan::new(
                format!("{}_{}", args.region.short_name(), address),
                args.region,
                address,
                data_type,
            )
        })
        .collect();

    Ok(ReadRequest::new(station, args.region, args.address, quantity as u16)
        .with_spans(spans)
        .with_byte_order(byte_order))
}

async fn read(config: &Config, args: &ReadArgs) -> Result<()> {
    let target = resolve_target(config, &args.target)?;
    let byte_order = args.byte_order.unwrap_or(target.byte_order);
    let request = read_request(args, target.station, byte_order)?;
    let retry = config.connector.retry_policy();

    let client = &target.client;
    client.connect().await?;
    let request_ref = &request;
    let values = retry.run(move || client.read_request(request_ref)).await;
    close_client(client).await;

    for value in values? {
        println!("🔹 {} = {}", value.span.identifier, value.value);
    }
    Ok(())
}

async fn write_value(config: &Config, command: &WriteCommand) -> Result<()> {
    let (target, request) = match command {
        WriteCommand::Coil { target, address, value } => {
            let target = resolve_target(config, target)?;
            let request = WriteRequest::SingleCoil { station: target.station, address: *address, value: *value };
            (target, request)
        }
        WriteCommand::Register { target, address, value } => {
            let target = resolve_target(config, target)?;
            let request = WriteRequest::SingleRegister { station: target.station, address: *address, value: *value };
            (target, request)
        }
        WriteCommand::Registers { target, address, values } => {
            let target = resolve_target(config, target)?;
            let request = WriteRequest::MultipleRegisters {
                station: target.station,
                start_address: *address,
                values: values.clone(),
            };
            (target, request)
        }
        WriteCommand::Channel { device, channel, value } => {
            let request = channel_request(config, device, channel, *value)?;
            let target = resolve_target(
                config,
                &TargetArgs { device: Some(device.clone()), station: request.station() },
            )?;
            (target, request)
        }
    };

    let retry: RetryPolicy = config.connector.retry_policy();
    let client = &target.client;
    client.connect().await?;
    let request_ref = &request;
    let outcome = retry.run(move || client.write_request(request_ref)).await;
    close_client(client).await;
    outcome?;

    println!("✅ {} done on station {}", request.function(), request.station());
    Ok(())
}

/// Write for an engineering value on a settable configured channel.
fn channel_request(config: &Config, device: &str, channel: &str, value: f64) -> Result<WriteRequest> {
    let device_config = config
        .device(device)
        .ok_or_else(|| anyhow!("device '{}' is not configured", device))?;
    let channel_config = device_config
        .channel(channel)
        .ok_or_else(|| anyhow!("channel '{}' is not configured on '{}'", channel, device))?;
    if !channel_config.settable {
        bail!("channel '{}' is not settable", channel);
    }

    Ok(WriteRequest::for_number(
        device_config.station,
        &channel_config.span(),
        value,
        device_config.byte_order,
    )?)
}

async fn close_client(client: &ModbusClient) {
    if let Err(e) = client.close().await {
        warn!("⚠️ Closing {} failed: {}", client.target(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::protocol::RegisterRegion;

    fn read_args(data_type: Option<DataType>, count: u16) -> ReadArgs {
        ReadArgs {
            target: TargetArgs { device: None, station: 1 },
            region: RegisterRegion::HoldingRegister,
            address: 10,
            count,
            data_type,
            byte_order: None,
        }
    }

    #[test]
    fn typed_read_covers_every_register() {
        let request = read_request(&read_args(Some(DataType::Float), 3), 7, ByteOrder::LittleEndian).unwrap();
        assert_eq!(request.station, 7);
        assert_eq!(request.quantity, 6);
        assert_eq!(request.byte_order, ByteOrder::LittleEndian);
        let addresses: Vec<u16> = request.spans.iter().map(|s| s.address).collect();
        assert_eq!(addresses, vec![10, 12, 14]);
        assert_eq!(request.spans[1].identifier, "holding_12");
    }

    #[test]
    fn raw_read_has_no_spans() {
        let request = read_request(&read_args(None, 4), 1, ByteOrder::default()).unwrap();
        assert_eq!(request.quantity, 4);
        assert!(request.spans.is_empty());
    }

    #[test]
    fn typed_read_rejects_bits_as_numbers() {
        let mut args = read_args(Some(DataType::UShort), 1);
        args.region = RegisterRegion::Coil;
        assert!(read_request(&args, 1, ByteOrder::default()).is_err());
    }

    #[test]
    fn channel_write_keeps_integer_precision() {
        let mut config = Config::default();
        let mut counter = config.devices[0].channels[3].clone();
        counter.identifier = "counter".to_string();
        counter.address = 200;
        counter.data_type = DataType::UInt;
        config.devices[0].channels.push(counter);

        let request = channel_request(&config, "energy-meter", "counter", 16_777_217.0).unwrap();
        assert_eq!(
            request,
            WriteRequest::MultipleRegisters {
                station: 1,
                start_address: 200,
                values: vec![0x0100, 0x0001],
            }
        );
    }

    #[test]
    fn channel_write_requires_settable_channel() {
        let config = Config::default();
        assert!(channel_request(&config, "energy-meter", "voltage", 1.0).is_err());
        assert!(channel_request(&config, "energy-meter", "missing", 1.0).is_err());
        assert!(channel_request(&config, "nobody", "relay", 1.0).is_err());

        let relay = channel_request(&config, "energy-meter", "relay", 1.0).unwrap();
        assert_eq!(relay, WriteRequest::SingleCoil { station: 1, address: 0, value: true });
    }

    #[test]
    fn init_config_refuses_to_overwrite() {
        let path = std::env::temp_dir().join(format!("modbus-master-init-{}.toml", std::process::id()));
        let _ = std::fs::remove_file(&path);

        init_config(&path).unwrap();
        assert!(Config::from_file(&path).is_ok());
        assert!(init_config(&path).is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_config_falls_back_to_sample() {
        let config = load_config(Path::new("/nonexistent/modbus.toml")).unwrap();
        assert_eq!(config.devices[0].identifier, "energy-meter");
    }
}
