//! HTTP/1.1 upgrade handshake, client side.
//!
//! Sends the upgrade request over an already-opened byte stream and
//! verifies the `101 Switching Protocols` response, including the
//! `Sec-WebSocket-Accept` digest. Any other outcome is a permanent failure
//! for this connection attempt.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// RFC 6455 §1.3 accept-key GUID.
const MAGIC_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Advertised in the `User-Agent` header.
const USER_AGENT: &str = concat!("mudvault-mesh-rust/", env!("CARGO_PKG_VERSION"));

/// Response headers larger than this abort the attempt.
const MAX_RESPONSE_LEN: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("server answered: {0}")]
    BadStatus(String),
    #[error("response missing Sec-WebSocket-Accept")]
    MissingAccept,
    #[error("Sec-WebSocket-Accept mismatch")]
    AcceptMismatch,
    #[error("oversized handshake response")]
    ResponseTooLong,
}

/// Fresh random handshake key: base64 of 16 random bytes.
pub fn generate_key() -> String {
    let raw: [u8; 16] = rand::random();
    BASE64.encode(raw)
}

/// The accept digest the server must echo: base64(SHA-1(key ∥ GUID)).
pub fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(MAGIC_GUID.as_bytes());
    BASE64.encode(sha.finalize())
}

/// Perform the client handshake on `stream`.
///
/// `host` and `port` echo the configured gateway endpoint into the `Host`
/// header; `path` is the request target (the gateway serves `/`).
pub async fn client_handshake<S>(
    stream: &mut S,
    host: &str,
    port: u16,
    path: &str,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key();
    let expected_accept = accept_key(&key);

    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         User-Agent: {USER_AGENT}\r\n\
         \r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    // Byte-at-a-time read so no frame bytes are consumed past the header.
    let mut response = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        if response.len() >= MAX_RESPONSE_LEN {
            return Err(HandshakeError::ResponseTooLong);
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(HandshakeError::BadStatus("connection closed".to_owned()));
        }
        response.push(byte[0]);
    }

    let response = String::from_utf8_lossy(&response);
    verify_response(&response, &expected_accept)
}

fn verify_response(response: &str, expected_accept: &str) -> Result<(), HandshakeError> {
    let mut lines = response.split("\r\n");
    let status = lines.next().unwrap_or_default();
    if !status.starts_with("HTTP/1.1 101") {
        return Err(HandshakeError::BadStatus(status.to_owned()));
    }

    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("sec-websocket-accept") {
                return if value.trim() == expected_accept {
                    Ok(())
                } else {
                    Err(HandshakeError::AcceptMismatch)
                };
            }
        }
    }
    Err(HandshakeError::MissingAccept)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
