//! Packet types and their payload encodings.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use super::wire::{self, Reader};
use crate::{AppError, Result};

/// One-byte packet type tags.
///
/// Client-to-worker tags occupy `0x0_`, worker-to-client `0x1_`, and
/// node resolution traffic `0x2_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Full build invocation sent by the client.
    BuildCommand = 0x01,
    /// Cooperative cancellation of the in-flight build.
    BuildCancel = 0x02,
    /// Client is about to disconnect cleanly (or asks the worker to stop).
    ShutdownNotice = 0x03,
    /// One chunk of console output from the worker.
    ConsoleWrite = 0x10,
    /// Terminal outcome of a build.
    BuildResult = 0x11,
    /// Dependency-resolution request from a build participant node.
    ResolveRequest = 0x20,
    /// Resolution answer routed back to the origin node.
    ResolveResponse = 0x21,
}

impl PacketType {
    /// Map a wire tag back to a packet type.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::BuildCommand),
            0x02 => Some(Self::BuildCancel),
            0x03 => Some(Self::ShutdownNotice),
            0x10 => Some(Self::ConsoleWrite),
            0x11 => Some(Self::BuildResult),
            0x20 => Some(Self::ResolveRequest),
            0x21 => Some(Self::ResolveResponse),
            _ => None,
        }
    }

    /// The one-byte wire tag.
    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Output stream selector for console traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Immutable snapshot of the client console's capabilities.
///
/// Captured once per session before any mode mutation and carried inside
/// [`BuildCommandPayload`] so the worker can shape its output accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleDescriptor {
    /// Visible buffer width in columns (0 when unknown).
    pub buffer_width: u16,
    /// Whether the console accepts color escape sequences.
    pub accepts_color: bool,
    /// Whether output is attached to an interactive terminal.
    pub is_terminal: bool,
}

/// Fully-formed build invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommandPayload {
    /// Argument list for the build, excluding the program name.
    pub args: Vec<String>,
    /// Environment for the build.
    pub env: BTreeMap<String, String>,
    /// Working directory the build runs in.
    pub working_dir: String,
    /// Culture (locale) name, e.g. `en-US`.
    pub culture: String,
    /// Capabilities of the console the client is attached to.
    pub console: ConsoleDescriptor,
    /// Optional partial-telemetry snapshot forwarded from the client.
    pub telemetry: Option<BTreeMap<String, String>>,
}

/// One chunk of console output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleWritePayload {
    /// Which local stream the text belongs on.
    pub stream: ConsoleStream,
    /// Text to write verbatim.
    pub text: String,
}

/// Terminal outcome of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResultPayload {
    /// Process-style exit code (0 = success).
    pub exit_code: i32,
    /// Exit category name, e.g. `Success`, `BuildFailure`, `Terminated`.
    pub exit_type: String,
}

/// Dependency-resolution request from a build participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequestPayload {
    /// Build submission the request belongs to.
    pub submission_id: i32,
    /// Origin node the response must be routed back to.
    pub node_id: i32,
    /// Reference name being resolved.
    pub name: String,
    /// Exact requested version, when pinned.
    pub version: Option<String>,
    /// Minimum acceptable version, when ranged.
    pub min_version: Option<String>,
    /// Project file the reference appears in.
    pub source_file: String,
    /// Line of the reference in `source_file`.
    pub source_line: u32,
}

/// Resolution answer routed back to the origin node.
///
/// `path: None` means the reference could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveResponsePayload {
    /// Reference name the answer is for.
    pub name: String,
    /// Resolved path, absent when resolution failed.
    pub path: Option<String>,
    /// Version the path satisfies.
    pub version: Option<String>,
    /// Source location copied from the requesting reference.
    pub source_file: String,
    /// Source line copied from the requesting reference.
    pub source_line: u32,
}

/// One typed unit of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Full build invocation.
    BuildCommand(BuildCommandPayload),
    /// Cooperative cancellation.
    BuildCancel,
    /// Clean-disconnect / stop notice.
    ShutdownNotice,
    /// Console output chunk.
    ConsoleWrite(ConsoleWritePayload),
    /// Terminal build outcome.
    BuildResult(BuildResultPayload),
    /// Resolution request.
    ResolveRequest(ResolveRequestPayload),
    /// Resolution answer.
    ResolveResponse(ResolveResponsePayload),
}

impl Packet {
    /// The packet's wire type.
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::BuildCommand(_) => PacketType::BuildCommand,
            Self::BuildCancel => PacketType::BuildCancel,
            Self::ShutdownNotice => PacketType::ShutdownNotice,
            Self::ConsoleWrite(_) => PacketType::ConsoleWrite,
            Self::BuildResult(_) => PacketType::BuildResult,
            Self::ResolveRequest(_) => PacketType::ResolveRequest,
            Self::ResolveResponse(_) => PacketType::ResolveResponse,
        }
    }

    /// Encode the payload (without the frame header) into `buf`.
    pub fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Self::BuildCommand(cmd) => {
                wire::put_str(buf, &cmd.working_dir);
                wire::put_str(buf, &cmd.culture);
                buf.put_u16_le(cmd.console.buffer_width);
                buf.put_u8(u8::from(cmd.console.accepts_color));
                buf.put_u8(u8::from(cmd.console.is_terminal));
                buf.put_u32_le(u32::try_from(cmd.args.len()).unwrap_or(u32::MAX));
                for arg in &cmd.args {
                    wire::put_str(buf, arg);
                }
                wire::put_map(buf, &cmd.env);
                wire::put_opt_map(buf, cmd.telemetry.as_ref());
            }
            Self::BuildCancel | Self::ShutdownNotice => {}
            Self::ConsoleWrite(write) => {
                buf.put_u8(match write.stream {
                    ConsoleStream::Stdout => 0,
                    ConsoleStream::Stderr => 1,
                });
                wire::put_str(buf, &write.text);
            }
            Self::BuildResult(result) => {
                buf.put_i32_le(result.exit_code);
                wire::put_str(buf, &result.exit_type);
            }
            Self::ResolveRequest(req) => {
                buf.put_i32_le(req.submission_id);
                buf.put_i32_le(req.node_id);
                wire::put_str(buf, &req.name);
                wire::put_opt_str(buf, req.version.as_deref());
                wire::put_opt_str(buf, req.min_version.as_deref());
                wire::put_str(buf, &req.source_file);
                buf.put_u32_le(req.source_line);
            }
            Self::ResolveResponse(resp) => {
                wire::put_str(buf, &resp.name);
                wire::put_opt_str(buf, resp.path.as_deref());
                wire::put_opt_str(buf, resp.version.as_deref());
                wire::put_str(buf, &resp.source_file);
                buf.put_u32_le(resp.source_line);
            }
        }
    }

    /// Per-type payload factory: decode a frame payload into a typed packet.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] when the payload is truncated, carries
    /// trailing bytes, or contains malformed fields.
    pub fn decode(packet_type: PacketType, payload: Bytes) -> Result<Self> {
        let mut r = Reader::new(payload);
        let packet = match packet_type {
            PacketType::BuildCommand => {
                let working_dir = r.str()?;
                let culture = r.str()?;
                let buffer_width = r.u16()?;
                let accepts_color = r.bool()?;
                let is_terminal = r.bool()?;
                let arg_count = usize::try_from(r.u32()?)
                    .map_err(|_| AppError::Protocol("argument count overflow".into()))?;
                let mut args = Vec::with_capacity(arg_count.min(1024));
                for _ in 0..arg_count {
                    args.push(r.str()?);
                }
                let env = r.map()?;
                let telemetry = r.opt_map()?;
                Self::BuildCommand(BuildCommandPayload {
                    args,
                    env,
                    working_dir,
                    culture,
                    console: ConsoleDescriptor {
                        buffer_width,
                        accepts_color,
                        is_terminal,
                    },
                    telemetry,
                })
            }
            PacketType::BuildCancel => Self::BuildCancel,
            PacketType::ShutdownNotice => Self::ShutdownNotice,
            PacketType::ConsoleWrite => {
                let stream = match r.u8()? {
                    0 => ConsoleStream::Stdout,
                    1 => ConsoleStream::Stderr,
                    other => {
                        return Err(AppError::Protocol(format!(
                            "invalid console stream selector {other}"
                        )))
                    }
                };
                let text = r.str()?;
                Self::ConsoleWrite(ConsoleWritePayload { stream, text })
            }
            PacketType::BuildResult => {
                let exit_code = r.i32()?;
                let exit_type = r.str()?;
                Self::BuildResult(BuildResultPayload {
                    exit_code,
                    exit_type,
                })
            }
            PacketType::ResolveRequest => {
                let submission_id = r.i32()?;
                let node_id = r.i32()?;
                let name = r.str()?;
                let version = r.opt_str()?;
                let min_version = r.opt_str()?;
                let source_file = r.str()?;
                let source_line = r.u32()?;
                Self::ResolveRequest(ResolveRequestPayload {
                    submission_id,
                    node_id,
                    name,
                    version,
                    min_version,
                    source_file,
                    source_line,
                })
            }
            PacketType::ResolveResponse => {
                let name = r.str()?;
                let path = r.opt_str()?;
                let version = r.opt_str()?;
                let source_file = r.str()?;
                let source_line = r.u32()?;
                Self::ResolveResponse(ResolveResponsePayload {
                    name,
                    path,
                    version,
                    source_file,
                    source_line,
                })
            }
        };
        r.finish()?;
        Ok(packet)
    }
}
