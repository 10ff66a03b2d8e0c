use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use rosc::{encoder, OscBundle, OscMessage, OscPacket, OscTime, OscType};

use crate::config::TuioOutput;
use crate::errors::PipelineError;
use crate::tracker::Touch;

pub const TUIO_ADDR: &str = "/tuio/2Dcur";

/// TUIO payload must fit an unfragmented UDP datagram on ethernet.
pub const MAX_DATAGRAM: usize = 1472;

const SOURCE_APP: &str = "lidar-touch";
const SEND_TIMEOUT: Duration = Duration::from_millis(10);

// OSC bundle framing: "#bundle\0" plus the 8-byte timetag; every
// element adds a 4-byte size prefix.
const BUNDLE_HEADER: usize = 16;

struct Endpoint {
    name: String,
    host: String,
    port: u16,
    addr: Option<SocketAddr>,
    fseq: i32,
    last_alive: Vec<u32>,
    source_sent: bool,
    last_send: Option<Instant>,
    send_failures: u64,
}

impl Endpoint {
    fn resolve(&mut self) -> Option<SocketAddr> {
        if self.addr.is_none() {
            match (self.host.as_str(), self.port).to_socket_addrs() {
                Ok(mut addrs) => self.addr = addrs.next(),
                Err(e) => debug!("endpoint {} not resolvable: {}", self.name, e),
            }
        }
        self.addr
    }
}

/// Emits `/tuio/2Dcur` bundles for one screen to every endpoint
/// subscribed to it. Owns per-endpoint frame sequencing and alive-set
/// bookkeeping; send failures are logged and the endpoint keeps
/// receiving subsequent frames.
pub struct TuioEmitter {
    socket: UdpSocket,
    source_name: String,
    endpoints: Vec<Endpoint>,
    heartbeat: Duration,
}

impl TuioEmitter {
    /// Binds the outbound socket and retains the outputs subscribed to
    /// `screen_id`.
    pub fn new(outputs: &[TuioOutput], screen_id: u32, heartbeat: Duration) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| anyhow!("failed to bind TUIO socket: {}", e))?;
        socket
            .set_write_timeout(Some(SEND_TIMEOUT))
            .map_err(|e| anyhow!("failed to set send timeout: {}", e))?;

        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
        let endpoints = outputs
            .iter()
            .filter(|o| o.enabled && o.screen_id == screen_id)
            .map(|o| {
                info!(
                    "TUIO endpoint \"{}\" -> {}:{} (screen {})",
                    o.name, o.host, o.port, screen_id
                );
                Endpoint {
                    name: o.name.clone(),
                    host: o.host.clone(),
                    port: o.port,
                    addr: None,
                    fseq: 0,
                    last_alive: Vec::new(),
                    source_sent: false,
                    last_send: None,
                    send_failures: 0,
                }
            })
            .collect();

        Ok(TuioEmitter {
            socket,
            source_name: format!("{}@{}", SOURCE_APP, host),
            endpoints,
            heartbeat,
        })
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Emits one frame. A full bundle (alive + set per touch + fseq)
    /// goes out when the frame changed anything; otherwise only the
    /// heartbeat cadence produces an alive+fseq bundle.
    pub fn emit_frame(&mut self, touches: &[&Touch], changed: bool) {
        let alive: Vec<u32> = touches.iter().map(|t| t.session_id).collect();
        for i in 0..self.endpoints.len() {
            let due = match self.endpoints[i].last_send {
                None => true,
                Some(at) => at.elapsed() >= self.heartbeat,
            };
            if changed {
                self.send_bundles(i, &alive, touches);
            } else if due {
                self.send_bundles(i, &alive, &[]);
            }
        }
    }

    /// The shutdown bundle: empty alive, one final fseq.
    pub fn emit_final(&mut self) {
        for i in 0..self.endpoints.len() {
            self.send_bundles(i, &[], &[]);
        }
    }

    fn send_bundles(&mut self, idx: usize, alive: &[u32], touches: &[&Touch]) {
        let source_msg;
        let fseq;
        {
            let ep = &mut self.endpoints[idx];
            ep.fseq = ep.fseq.wrapping_add(1);
            fseq = ep.fseq;
            let alive_changed = ep.last_alive.as_slice() != alive;
            source_msg = if !ep.source_sent || alive_changed {
                Some(source_message(&self.source_name))
            } else {
                None
            };
        }

        // Lay the messages out in protocol order, then cut into bundles
        // that respect the datagram limit: alive only in the first,
        // fseq only in the last, sets in between share the fseq value.
        let alive_msg = alive_message(alive);
        let fseq_msg = fseq_message(fseq);
        let fseq_len = packet_len(&fseq_msg);

        let mut bundles: Vec<Vec<OscPacket>> = Vec::new();
        let mut current: Vec<OscPacket> = Vec::new();
        let mut current_len = BUNDLE_HEADER;
        if let Some(msg) = source_msg {
            current_len += 4 + packet_len(&msg);
            current.push(OscPacket::Message(msg));
        }
        current_len += 4 + packet_len(&alive_msg);
        current.push(OscPacket::Message(alive_msg));

        for touch in touches {
            let msg = set_message(touch);
            let len = 4 + packet_len(&msg);
            if current_len + len + 4 + fseq_len > MAX_DATAGRAM {
                bundles.push(std::mem::take(&mut current));
                current_len = BUNDLE_HEADER;
            }
            current_len += len;
            current.push(OscPacket::Message(msg));
        }
        current.push(OscPacket::Message(fseq_msg));
        bundles.push(current);

        let ok = self.send_to_endpoint(idx, &bundles);
        let ep = &mut self.endpoints[idx];
        if ok {
            ep.source_sent = true;
            ep.last_alive = alive.to_vec();
            ep.last_send = Some(Instant::now());
        }
    }

    fn send_to_endpoint(&mut self, idx: usize, bundles: &[Vec<OscPacket>]) -> bool {
        let Some(addr) = self.endpoints[idx].resolve() else {
            return false;
        };
        for content in bundles {
            let packet = OscPacket::Bundle(OscBundle {
                timetag: OscTime::from((0, 1)),
                content: content.clone(),
            });
            let bytes = match encoder::encode(&packet) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("failed to encode TUIO bundle: {:?}", e);
                    return false;
                }
            };
            if let Err(e) = self.socket.send_to(&bytes, addr) {
                let ep = &mut self.endpoints[idx];
                ep.send_failures += 1;
                let err = PipelineError::UdpSendFailure {
                    endpoint: format!("{}:{}", ep.host, ep.port),
                    source: e,
                };
                if ep.send_failures == 1 {
                    warn!("{}", err);
                } else {
                    debug!("{} (failure #{})", err, ep.send_failures);
                }
                return false;
            }
        }
        true
    }
}

fn packet_len(msg: &OscMessage) -> usize {
    encoder::encode(&OscPacket::Message(msg.clone()))
        .map(|b| b.len())
        .unwrap_or(0)
}

fn source_message(source_name: &str) -> OscMessage {
    OscMessage {
        addr: TUIO_ADDR.to_string(),
        args: vec![
            OscType::String("source".into()),
            OscType::String(source_name.to_string()),
        ],
    }
}

fn alive_message(alive: &[u32]) -> OscMessage {
    let mut args = vec![OscType::String("alive".into())];
    args.extend(alive.iter().map(|&sid| OscType::Int(sid as i32)));
    OscMessage {
        addr: TUIO_ADDR.to_string(),
        args,
    }
}

fn set_message(touch: &Touch) -> OscMessage {
    OscMessage {
        addr: TUIO_ADDR.to_string(),
        args: vec![
            OscType::String("set".into()),
            OscType::Int(touch.session_id as i32),
            OscType::Float(touch.u),
            OscType::Float(touch.v),
            OscType::Float(touch.du),
            OscType::Float(touch.dv),
            OscType::Float(0.0), // motion acceleration, unreported
        ],
    }
}

fn fseq_message(fseq: i32) -> OscMessage {
    OscMessage {
        addr: TUIO_ADDR.to_string(),
        args: vec![OscType::String("fseq".into()), OscType::Int(fseq)],
    }
}
