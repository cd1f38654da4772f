use log::{debug, error, info};
use tokio::process::Command;

use super::{Parity, SerialLineSettings, StopBits};
use crate::utils::error::TransportError;

/// Shape of the host's serial line configuration command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialConfigurator {
    /// `stty -F <path> ...` (GNU coreutils)
    PosixPathFirst,
    /// `stty -f <path> ...` (BSD, macOS)
    PosixFlagFirst,
    /// `mode <port> baud=.. data=.. stop=.. parity=.. xon=..`
    WindowsNamedArgs,
}

impl SerialConfigurator {
    pub fn detect() -> Self {
        Self::for_os(std::env::consts::OS)
    }

    pub fn for_os(os: &str) -> Self {
        match os {
            "windows" => Self::WindowsNamedArgs,
            "macos" | "ios" | "freebsd" | "openbsd" | "netbsd" | "dragonfly" => Self::PosixFlagFirst,
            _ => Self::PosixPathFirst,
        }
    }

    /// Program and arguments that apply `settings` to the line.
    pub fn command(&self, settings: &SerialLineSettings) -> (String, Vec<String>) {
        match self {
            Self::PosixPathFirst => ("stty".to_string(), stty_args("-F", settings)),
            Self::PosixFlagFirst => ("stty".to_string(), stty_args("-f", settings)),
            Self::WindowsNamedArgs => {
                let parity = match settings.parity {
                    Parity::None => "n",
                    Parity::Odd => "o",
                    Parity::Even => "e",
                };
                let args = vec![
                    settings.device_path.clone(),
                    format!("baud={}", settings.baud_rate),
                    format!("data={}", settings.data_bits),
                    format!("stop={}", settings.stop_bits),
                    format!("parity={}", parity),
                    format!("xon={}", if settings.flow_control { "on" } else { "off" }),
                ];
                ("mode".to_string(), args)
            }
        }
    }

    pub fn command_line(&self, settings: &SerialLineSettings) -> String {
        let (program, args) = self.command(settings);
        std::iter::once(program).chain(args).collect::<Vec<_>>().join(" ")
    }

    pub async fn configure(&self, settings: &SerialLineSettings) -> Result<(), TransportError> {
        let (program, args) = self.command(settings);
        debug!("🔧 Configuring serial line: {}", self.command_line(settings));

        let output = Command::new(&program).args(&args).output().await.map_err(|e| {
            error!("❌ Unable to run {}: {}", program, e);
            TransportError::Configure(format!("unable to run {}: {}", program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", program, output.status)
            } else {
                stderr
            };
            error!("❌ Serial line configuration of {} failed: {}", settings.device_path, message);
            return Err(TransportError::Configure(message));
        }

        info!(
            "⚙️  Line {} configured: {} baud, {} data bits, {} stop bits",
            settings.device_path, settings.baud_rate, settings.data_bits, settings.stop_bits
        );
        Ok(())
    }
}

fn stty_args(path_flag: &str, settings: &SerialLineSettings) -> Vec<String> {
    let stop_bits = match settings.stop_bits {
        StopBits::One => "-cstopb",
        // stty only distinguishes one from more than one
        StopBits::OnePointFive | StopBits::Two => "cstopb",
    };
    let parity = match settings.parity {
        Parity::None => "-parenb",
        Parity::Odd => "parenb parodd",
        Parity::Even => "parenb -parodd",
    };
    let flow_control = if settings.flow_control {
        "-clocal -crtscts ixon ixoff"
    } else {
        "clocal -crtscts -ixon -ixoff"
    };

    let mut args = vec![
        path_flag.to_string(),
        settings.device_path.clone(),
        settings.baud_rate.to_string(),
        format!("cs{}", settings.data_bits),
        stop_bits.to_string(),
    ];
    args.extend(parity.split_whitespace().map(str::to_string));
    args.extend(flow_control.split_whitespace().map(str::to_string));
    args
}
