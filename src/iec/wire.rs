//! Session protocol spoken between [`IedServer`](super::server::IedServer)
//! and [`IedConnection`](super::client::IedConnection): length-prefixed
//! MessagePack frames over TCP.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::IedError;
use super::model::Fc;
use super::value::MmsValue;

/// Upper bound for one session frame; directory listings stay far below this.
const MAX_SESSION_FRAME: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionRequest {
    LogicalDevices,
    /// Logical nodes of one device.
    DeviceDirectory { device: String },
    /// Data objects of one `LD/LN` reference.
    NodeVariables { node_ref: String },
    /// Children of one `LD/LN.DO` reference.
    DataDirectory { object_ref: String },
    Read { reference: String, fc: Fc },
    Write {
        reference: String,
        fc: Fc,
        value: MmsValue,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionResponse {
    Names(Vec<String>),
    Value(MmsValue),
    Written,
    Error(IedError),
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = rmp_serde::to_vec(message)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

pub async fn read_frame<R, T>(reader: &mut R) -> std::io::Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;
    let length = u32::from_be_bytes(prefix) as usize;
    if length > MAX_SESSION_FRAME {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("session frame of {length} bytes exceeds limit"),
        ));
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    rmp_serde::from_slice(&body)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
