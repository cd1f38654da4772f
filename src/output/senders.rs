use async_trait::async_trait;
use log::{debug, error};
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::utils::error::ModbusError;

#[async_trait]
pub trait DataSender: Send + Sync {
    async fn send(&self, data: &str) -> Result<(), ModbusError>;
    fn sender_type(&self) -> &str;
    fn destination(&self) -> &str;
}

pub struct ConsoleSender;

#[async_trait]
impl DataSender for ConsoleSender {
    async fn send(&self, data: &str) -> Result<(), ModbusError> {
        print!("{}", data);
        Ok(())
    }

    fn sender_type(&self) -> &str {
        "console"
    }

    fn destination(&self) -> &str {
        "stdout"
    }
}

/// Appends (or truncates and writes) formatted output to a file.
pub struct FileSender {
    file_path: String,
    append: bool,
}

impl FileSender {
    pub fn new<P: AsRef<Path>>(file_path: P, append: bool) -> Self {
        Self {
            file_path: file_path.as_ref().to_string_lossy().to_string(),
            append,
        }
    }
}

#[async_trait]
impl DataSender for FileSender {
    async fn send(&self, data: &str) -> Result<(), ModbusError> {
        let mut options = OpenOptions::new();
        options.create(true);
        if self.append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }

        let mut file = options.open(&self.file_path).await.map_err(|e| {
            error!("❌ Failed to open file {}: {}", self.file_path, e);
            ModbusError::SerializationError(format!("File open error: {}", e))
        })?;

        file.write_all(data.as_bytes()).await.map_err(|e| {
            error!("❌ Failed to write to file {}: {}", self.file_path, e);
            ModbusError::SerializationError(format!("File write error: {}", e))
        })?;

        debug!("📝 Wrote {} bytes to {}", data.len(), self.file_path);
        Ok(())
    }

    fn sender_type(&self) -> &str {
        "file"
    }

    fn destination(&self) -> &str {
        &self.file_path
    }
}
