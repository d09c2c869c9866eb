//! One-shot command client

use anyhow::Result;
use chrono::{DateTime, Local};
use quickreserve_api::{Command, ReserveRequest, ResponsePayload};
use quickreserve_ipc::{EventStream, IpcClient};
use quickreserve_util::ResourceId;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Opens a fresh connection per command
pub struct CommandClient {
    socket_path: PathBuf,
}

impl CommandClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    async fn call(&self, command: Command) -> Result<ResponsePayload> {
        let mut client = IpcClient::connect(&self.socket_path).await?;
        client.call(command).await.map_err(Into::into)
    }

    pub async fn reserve(
        &self,
        device_type: &str,
        holder_name: &str,
        duration: Option<Duration>,
        until: Option<DateTime<Local>>,
    ) -> Result<ResponsePayload> {
        let duration_seconds = duration
            .map(|d| i64::try_from(d.as_secs()))
            .transpose()?;

        self.call(Command::Reserve(ReserveRequest {
            device_type: device_type.to_owned(),
            holder_name: holder_name.to_owned(),
            duration_seconds,
            reserved_until: until,
        }))
        .await
    }

    pub async fn release(&self, resource_id: ResourceId) -> Result<ResponsePayload> {
        self.call(Command::Release { resource_id }).await
    }

    pub async fn list_device_types(&self) -> Result<ResponsePayload> {
        self.call(Command::ListDeviceTypes).await
    }

    pub async fn list_resources(&self) -> Result<ResponsePayload> {
        self.call(Command::ListResources).await
    }

    pub async fn groups(&self) -> Result<ResponsePayload> {
        self.call(Command::GroupByDeviceType).await
    }

    pub async fn set_device_type(
        &self,
        resource_id: ResourceId,
        device_type: Option<String>,
    ) -> Result<ResponsePayload> {
        self.call(Command::SetDeviceType {
            resource_id,
            device_type,
        })
        .await
    }

    pub async fn health(&self) -> Result<ResponsePayload> {
        self.call(Command::GetHealth).await
    }

    pub async fn watch(&self) -> Result<EventStream> {
        let client = IpcClient::connect(&self.socket_path).await?;
        client.subscribe().await.map_err(Into::into)
    }
}
