use crate::eip::cip::{self, CipReply, GeneralStatus};
use crate::eip::encap::{self, EncapCommand, EncapFrame, HEADER_SIZE};
use crate::error::LoggerError;
use crate::reader::TagReader;
use crate::tag::{TagResponse, TagValue};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Timeout announced to the controller inside `SendRRData`, in seconds.
const RR_DATA_TIMEOUT_SECS: u16 = 10;

/// Where and how to reach the controller.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub slot: u8,
    /// Deadline for connecting and for every request/reply round trip.
    pub timeout: Duration,
}

impl ConnectOptions {
    pub fn from_config(config: &crate::config::LoggerConfig) -> Self {
        Self {
            host: config.ip.clone(),
            port: config.port,
            slot: config.slot,
            timeout: config.read_timeout(),
        }
    }
}

/// Tag reader speaking EtherNet/IP unconnected messaging to a Logix
/// processor.
pub struct CipTagReader {
    stream: TcpStream,
    session_handle: u32,
    slot: u8,
    timeout: Duration,
    context: u64,
    open: bool,
}

fn connection_error(what: &str, e: std::io::Error) -> LoggerError {
    LoggerError::Connection(format!("{}: {}", what, e))
}

impl CipTagReader {
    /// Opens the TCP connection and registers an encapsulation session.
    pub async fn connect(options: &ConnectOptions) -> Result<Self, LoggerError> {
        info!(host = %options.host, port = options.port, slot = options.slot, "Connecting to controller...");
        let stream = timeout(options.timeout, TcpStream::connect((options.host.as_str(), options.port)))
            .await?
            .map_err(|e| connection_error(&format!("cannot reach {}:{}", options.host, options.port), e))?;
        let _ = stream.set_nodelay(true);

        let mut reader = Self {
            stream,
            session_handle: 0,
            slot: options.slot,
            timeout: options.timeout,
            context: 0,
            open: false,
        };

        let reply = reader
            .transact(EncapCommand::RegisterSession, encap::register_session_data())
            .await?;
        reader.session_handle = reply.session_handle;
        reader.open = true;
        info!("Session registered (handle 0x{:08x})", reader.session_handle);
        Ok(reader)
    }

    fn next_context(&mut self) -> [u8; 8] {
        self.context = self.context.wrapping_add(1);
        self.context.to_le_bytes()
    }

    async fn send_frame(&mut self, frame: &EncapFrame) -> Result<(), LoggerError> {
        let bytes = frame.encode()?;
        debug!(bytes = hex::encode(&bytes), "EIP write");
        self.stream
            .write_all(&bytes)
            .await
            .map_err(|e| connection_error("write failed", e))
    }

    async fn receive_frame(&mut self) -> Result<EncapFrame, LoggerError> {
        let mut header = [0u8; HEADER_SIZE];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(|e| connection_error("read failed", e))?;
        let (raw, length) = EncapFrame::decode_header(&header)?;
        let mut data = vec![0u8; length];
        self.stream
            .read_exact(&mut data)
            .await
            .map_err(|e| connection_error("read failed", e))?;
        debug!(header = hex::encode(header), data = hex::encode(&data), "EIP read");
        Ok(EncapFrame::from_parts(raw, Bytes::from(data)))
    }

    /// Sends one encapsulation request and waits for its reply.
    async fn transact(&mut self, command: EncapCommand, data: Bytes) -> Result<EncapFrame, LoggerError> {
        let context = self.next_context();
        let request = EncapFrame::new(command, self.session_handle, context, data);
        let deadline = self.timeout;

        let reply = timeout(deadline, async {
            self.send_frame(&request).await?;
            self.receive_frame().await
        })
        .await??;

        if reply.command != command {
            return Err(LoggerError::Protocol(format!(
                "expected {:?} reply, got {:?}",
                command, reply.command
            )));
        }
        if reply.sender_context != context {
            return Err(LoggerError::Protocol("reply sender context does not match request".to_string()));
        }
        if reply.status != 0 {
            return Err(LoggerError::Connection(format!(
                "{:?} rejected with encapsulation status 0x{:08x}",
                command, reply.status
            )));
        }
        Ok(reply)
    }

    /// Routes a CIP request to the processor and returns its reply.
    async fn request(&mut self, embedded: &[u8]) -> Result<CipReply, LoggerError> {
        let message = cip::unconnected_send(embedded, self.slot)?;
        let data = encap::rr_data(&message, RR_DATA_TIMEOUT_SECS)?;
        let reply = self.transact(EncapCommand::SendRRData, data).await?;
        CipReply::parse(encap::parse_rr_data(reply.data)?)
    }

    /// Sends one batch of encoded Read Tag requests. A batch of one goes out
    /// as a plain Read Tag.
    async fn read_batch(
        &mut self,
        tags: &[&String],
        requests: &[Bytes],
    ) -> Result<Vec<TagResponse<TagValue>>, LoggerError> {
        if let ([tag], [request]) = (tags, requests) {
            let reply = self.request(request).await?;
            return Ok(vec![to_value_response(tag, &reply)]);
        }

        let packet = cip::multiple_service_request(requests)?;
        debug!(tags = tags.len(), bytes = packet.len(), "Multiple service read");
        let reply = self.request(&packet).await?;
        match reply.status {
            GeneralStatus::Success | GeneralStatus::EmbeddedServiceError => {
                let replies = cip::parse_multiple_reply(&reply.data)?;
                if replies.len() != tags.len() {
                    return Err(LoggerError::Protocol(format!(
                        "sent {} reads, got {} replies",
                        tags.len(),
                        replies.len()
                    )));
                }
                Ok(tags
                    .iter()
                    .zip(replies)
                    .map(|(tag, embedded)| to_value_response(tag, &embedded))
                    .collect())
            }
            _ => {
                let text = reply.status_text();
                Ok(tags.iter().map(|tag| TagResponse::failed(*tag, text.clone())).collect())
            }
        }
    }
}

fn failure_reason(e: LoggerError) -> String {
    match e {
        LoggerError::TagRead { status, .. } => status,
        other => other.to_string(),
    }
}

fn to_value_response(tag: &str, reply: &CipReply) -> TagResponse<TagValue> {
    if !reply.is_success() {
        return TagResponse::failed(tag, reply.status_text());
    }
    match cip::decode_value(&reply.data) {
        Ok(value) => TagResponse::success(tag, value),
        Err(reason) => TagResponse::failed(tag, reason),
    }
}

#[async_trait]
impl TagReader for CipTagReader {
    async fn read(&mut self, tag: &str) -> Result<TagResponse<TagValue>, LoggerError> {
        let request = match cip::read_tag_request(tag, 1) {
            Ok(request) => request,
            Err(e) => return Ok(TagResponse::failed(tag, failure_reason(e))),
        };
        let reply = self.request(&request).await?;
        Ok(to_value_response(tag, &reply))
    }

    async fn read_many(&mut self, tags: &[String]) -> Result<Vec<TagResponse<TagValue>>, LoggerError> {
        let mut responses: Vec<Option<TagResponse<TagValue>>> = vec![None; tags.len()];
        let mut encoded = Vec::new();
        let mut requests = Vec::new();
        for (i, tag) in tags.iter().enumerate() {
            match cip::read_tag_request(tag, 1) {
                Ok(request) => {
                    encoded.push(i);
                    requests.push(request);
                }
                Err(e) => responses[i] = Some(TagResponse::failed(tag, failure_reason(e))),
            }
        }

        for run in cip::pack_requests(&requests, cip::MAX_UNCONNECTED_SIZE) {
            let positions = &encoded[run.clone()];
            let batch: Vec<&String> = positions.iter().map(|&i| &tags[i]).collect();
            let replies = self.read_batch(&batch, &requests[run]).await?;
            for (&pos, response) in positions.iter().zip(replies) {
                responses[pos] = Some(response);
            }
        }

        Ok(responses
            .into_iter()
            .zip(tags)
            .map(|(r, tag)| r.unwrap_or_else(|| TagResponse::failed(tag, "no reply")))
            .collect())
    }

    async fn read_bytes(&mut self, tag: &str, count: usize) -> Result<TagResponse<Vec<u8>>, LoggerError> {
        let Ok(elements) = u16::try_from(count) else {
            return Ok(TagResponse::failed(tag, format!("cannot read {} elements at once", count)));
        };
        let request = match cip::read_tag_request(tag, elements) {
            Ok(request) => request,
            Err(e) => return Ok(TagResponse::failed(tag, failure_reason(e))),
        };
        let reply = self.request(&request).await?;
        if !reply.is_success() {
            return Ok(TagResponse::failed(tag, reply.status_text()));
        }
        Ok(match cip::decode_bytes(&reply.data, count) {
            Ok(bytes) => TagResponse::success(tag, bytes),
            Err(reason) => TagResponse::failed(tag, reason),
        })
    }

    async fn close(&mut self) -> Result<(), LoggerError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let context = self.next_context();
        let frame = EncapFrame::new(EncapCommand::UnRegisterSession, self.session_handle, context, Bytes::new());
        // The controller closes the socket without replying.
        let sent = self.send_frame(&frame).await;
        if let Err(e) = self.stream.shutdown().await {
            warn!("Socket shutdown failed: {}", e);
        }
        sent?;
        info!("Controller session released");
        Ok(())
    }
}
