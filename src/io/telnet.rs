//! Gateway reboot over the EW11 telnet console
//!
//! The EW11 exposes a line-based management console on the standard telnet
//! port. Rebooting is a fixed dialogue: wait for `login:`, send the id, wait
//! for `password:`, send the password, then send the literal `Restart`
//! command. No option negotiation is performed; the device tolerates a bare
//! TCP client.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const TELNET_PORT: u16 = 23;
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const PROMPT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_PROMPT_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum TelnetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out waiting for `{0}`")]
    Timeout(&'static str),
    #[error("connection closed before `{0}`")]
    Closed(&'static str),
}

/// Log in to the gateway console and issue the restart command
pub async fn reboot(host: &str, id: &str, password: &str) -> Result<(), TelnetError> {
    let mut stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect((host, TELNET_PORT)))
        .await
        .map_err(|_| TelnetError::Timeout("connect"))??;

    read_until(&mut stream, b"login:", "login:").await?;
    send_line(&mut stream, id).await?;
    read_until(&mut stream, b"password:", "password:").await?;
    send_line(&mut stream, password).await?;
    send_line(&mut stream, "Restart").await?;

    Ok(())
}

async fn send_line(stream: &mut TcpStream, line: &str) -> Result<(), TelnetError> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    Ok(())
}

async fn read_until(
    stream: &mut TcpStream,
    needle: &[u8],
    label: &'static str,
) -> Result<(), TelnetError> {
    let mut seen = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = tokio::time::timeout(PROMPT_TIMEOUT, stream.read(&mut chunk))
            .await
            .map_err(|_| TelnetError::Timeout(label))??;
        if n == 0 {
            return Err(TelnetError::Closed(label));
        }
        seen.extend_from_slice(&chunk[..n]);
        if seen.windows(needle.len()).any(|w| w == needle) {
            return Ok(());
        }
        if seen.len() > MAX_PROMPT_BYTES {
            return Err(TelnetError::Closed(label));
        }
    }
}
