//! Outbound IED client session with connect and request timeouts and
//! FC-scoped typed reads/writes.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::error::IedError;
use super::model::Fc;
use super::value::MmsValue;
use super::wire::{self, SessionRequest, SessionResponse};

const DEFAULT_TIMEOUT_MS: u64 = 5000;

pub struct IedConnection {
    stream: Option<TcpStream>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Default for IedConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl IedConnection {
    pub fn new() -> Self {
        IedConnection {
            stream: None,
            connect_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn set_connect_timeout(&mut self, timeout_ms: u64) {
        self.connect_timeout = Duration::from_millis(timeout_ms);
    }

    pub fn set_request_timeout(&mut self, timeout_ms: u64) {
        self.request_timeout = Duration::from_millis(timeout_ms);
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), IedError> {
        self.close();
        let attempt = timeout(self.connect_timeout, TcpStream::connect((host, port))).await;
        match attempt {
            Ok(Ok(stream)) => {
                debug!("connected to {}:{}", host, port);
                self.stream = Some(stream);
                Ok(())
            }
            Ok(Err(e)) => Err(IedError::ConnectionFailed(e.to_string())),
            Err(_) => Err(IedError::Timeout),
        }
    }

    pub fn close(&mut self) {
        self.stream = None;
    }

    async fn request(&mut self, request: SessionRequest) -> Result<SessionResponse, IedError> {
        let stream = self.stream.as_mut().ok_or(IedError::NotConnected)?;
        wire::write_frame(&mut *stream, &request)
            .await
            .map_err(|e| IedError::ServiceError(e.to_string()))?;
        match timeout(
            self.request_timeout,
            wire::read_frame::<_, SessionResponse>(&mut *stream),
        )
        .await
        {
            Ok(Ok(SessionResponse::Error(e))) => Err(e),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                // Stream is unusable after a broken frame.
                self.close();
                Err(IedError::ServiceError(e.to_string()))
            }
            Err(_) => {
                self.close();
                Err(IedError::Timeout)
            }
        }
    }

    async fn request_names(&mut self, request: SessionRequest) -> Result<Vec<String>, IedError> {
        match self.request(request).await? {
            SessionResponse::Names(names) => Ok(names),
            _ => Err(IedError::ServiceError("unexpected response".to_string())),
        }
    }

    pub async fn get_logical_device_list(&mut self) -> Result<Vec<String>, IedError> {
        self.request_names(SessionRequest::LogicalDevices).await
    }

    pub async fn get_logical_device_directory(
        &mut self,
        device: &str,
    ) -> Result<Vec<String>, IedError> {
        self.request_names(SessionRequest::DeviceDirectory {
            device: device.to_string(),
        })
        .await
    }

    pub async fn get_logical_node_variables(
        &mut self,
        node_ref: &str,
    ) -> Result<Vec<String>, IedError> {
        self.request_names(SessionRequest::NodeVariables {
            node_ref: node_ref.to_string(),
        })
        .await
    }

    pub async fn get_data_directory(&mut self, object_ref: &str) -> Result<Vec<String>, IedError> {
        self.request_names(SessionRequest::DataDirectory {
            object_ref: object_ref.to_string(),
        })
        .await
    }

    pub async fn read_object(&mut self, reference: &str, fc: Fc) -> Result<MmsValue, IedError> {
        match self
            .request(SessionRequest::Read {
                reference: reference.to_string(),
                fc,
            })
            .await?
        {
            SessionResponse::Value(value) => Ok(value),
            _ => Err(IedError::ServiceError("unexpected response".to_string())),
        }
    }

    async fn write_object(
        &mut self,
        reference: &str,
        fc: Fc,
        value: MmsValue,
    ) -> Result<(), IedError> {
        match self
            .request(SessionRequest::Write {
                reference: reference.to_string(),
                fc,
                value,
            })
            .await?
        {
            SessionResponse::Written => Ok(()),
            _ => Err(IedError::ServiceError("unexpected response".to_string())),
        }
    }

    pub async fn write_boolean_value(
        &mut self,
        reference: &str,
        fc: Fc,
        value: bool,
    ) -> Result<(), IedError> {
        self.write_object(reference, fc, MmsValue::Boolean(value))
            .await
    }

    pub async fn write_int32_value(
        &mut self,
        reference: &str,
        fc: Fc,
        value: i32,
    ) -> Result<(), IedError> {
        self.write_object(reference, fc, MmsValue::Integer(i64::from(value)))
            .await
    }

    pub async fn write_float_value(
        &mut self,
        reference: &str,
        fc: Fc,
        value: f32,
    ) -> Result<(), IedError> {
        self.write_object(reference, fc, MmsValue::Float(f64::from(value)))
            .await
    }

    pub async fn write_visible_string_value(
        &mut self,
        reference: &str,
        fc: Fc,
        value: &str,
    ) -> Result<(), IedError> {
        self.write_object(reference, fc, MmsValue::VisibleString(value.to_string()))
            .await
    }
}
