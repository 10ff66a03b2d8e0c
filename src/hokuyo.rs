use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::errors::PipelineError;
use crate::scan::{Scan, ScanMeta, Scanner};

// UST-10LX / UST-20LX geometry: 1081 steps over 270 degrees.
const SAMPLES: usize = 1081;
const STEP_RAD: f32 = 0.25 * std::f32::consts::PI / 180.0;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(1);

// Range returns below this are error codes, not distances.
const MIN_VALID_MM: u32 = 21;

/// Hardware scanner speaking SCIP 2.0 over TCP (Hokuyo UST family).
/// Ranges arrive in millimeters and are converted to meters here, at the
/// boundary. Timestamps come from the host monotonic clock; the
/// device's own 24-bit millisecond counter wraps too quickly to be
/// useful as a session-long timebase.
pub struct HokuyoScanner {
    reader: BufReader<TcpStream>,
    endpoint: String,
    started: Instant,
    last_t_ns: u64,
}

impl HokuyoScanner {
    pub fn connect(host: &str, port: u16) -> Result<Self, PipelineError> {
        let endpoint = format!("{}:{}", host, port);
        let addr = endpoint
            .to_socket_addrs()
            .map_err(|e| PipelineError::Scanner(format!("resolve {}: {}", endpoint, e)))?
            .next()
            .ok_or_else(|| {
                PipelineError::Scanner(format!("no address found for {}", endpoint))
            })?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| PipelineError::Scanner(format!("connect {}: {}", endpoint, e)))?;
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|e| PipelineError::Scanner(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| PipelineError::Scanner(e.to_string()))?;

        let mut scanner = HokuyoScanner {
            reader: BufReader::new(stream),
            endpoint,
            started: Instant::now(),
            last_t_ns: 0,
        };

        // Switch the laser on. "00" = done, "02" = already on.
        let status = scanner.command("BM")?;
        if status != "00" && status != "02" {
            return Err(PipelineError::Scanner(format!(
                "BM rejected with status {}",
                status
            )));
        }
        info!("Connected to Hokuyo scanner at {}", scanner.endpoint);
        Ok(scanner)
    }

    /// Sends a command and returns its status code, discarding any data
    /// lines that follow.
    fn command(&mut self, cmd: &str) -> Result<String, PipelineError> {
        self.send_line(cmd)?;
        let block = self.read_block()?;
        if block.len() < 2 {
            return Err(PipelineError::Scanner(format!(
                "short response to {}",
                cmd
            )));
        }
        Ok(strip_checksum(&block[1]).to_string())
    }

    fn send_line(&mut self, line: &str) -> Result<(), PipelineError> {
        let stream = self.reader.get_mut();
        stream
            .write_all(line.as_bytes())
            .and_then(|_| stream.write_all(b"\n"))
            .map_err(|e| PipelineError::Scanner(format!("write {}: {}", self.endpoint, e)))
    }

    /// Reads lines up to the blank line that terminates every SCIP
    /// response block.
    fn read_block(&mut self) -> Result<Vec<String>, PipelineError> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).map_err(|e| {
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) {
                    PipelineError::ScanTimeout
                } else {
                    PipelineError::Scanner(format!("read {}: {}", self.endpoint, e))
                }
            })?;
            if n == 0 {
                return Err(PipelineError::Scanner(format!(
                    "connection to {} closed",
                    self.endpoint
                )));
            }
            let trimmed = line.trim_end_matches('\n');
            if trimmed.is_empty() {
                return Ok(lines);
            }
            lines.push(trimmed.to_string());
        }
    }
}

impl Scanner for HokuyoScanner {
    fn meta(&self) -> ScanMeta {
        ScanMeta {
            samples: SAMPLES,
            step_rad: STEP_RAD,
        }
    }

    fn next_scan(&mut self) -> Result<Scan, PipelineError> {
        // Single-shot measurement over the full step range, no clustering.
        self.send_line("GD0000108001")?;
        let block = self.read_block()?;
        if block.len() < 4 {
            return Err(PipelineError::Scanner("short GD response".into()));
        }
        let status = strip_checksum(&block[1]);
        if status != "00" {
            warn!("GD returned status {}", status);
            return Err(PipelineError::Scanner(format!("GD status {}", status)));
        }

        // block[2] is the device timestamp; data lines follow it.
        let mut payload = String::new();
        for line in &block[3..] {
            payload.push_str(strip_checksum(line));
        }
        let ranges = decode_ranges(payload.as_bytes());
        if ranges.len() != SAMPLES {
            debug!("decoded {} of {} expected samples", ranges.len(), SAMPLES);
            return Err(PipelineError::Scanner(format!(
                "unexpected sample count {}",
                ranges.len()
            )));
        }

        let t_ns = (self.started.elapsed().as_nanos() as u64).max(self.last_t_ns);
        self.last_t_ns = t_ns;
        Ok(Scan { t_ns, ranges })
    }
}

/// Every SCIP line carries a single trailing checksum character.
fn strip_checksum(line: &str) -> &str {
    if line.is_empty() {
        line
    } else {
        &line[..line.len() - 1]
    }
}

/// SCIP 3-character encoding: each char carries 6 bits, offset by 0x30.
/// Returns would be millimeters; error codes and non-returns become 0.0,
/// valid distances become meters.
fn decode_ranges(payload: &[u8]) -> Vec<f32> {
    payload
        .chunks_exact(3)
        .map(|c| {
            let mm = c
                .iter()
                .fold(0u32, |acc, &b| (acc << 6) | (b.wrapping_sub(0x30) as u32));
            if mm < MIN_VALID_MM {
                0.0
            } else {
                mm as f32 / 1000.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(mm: u32) -> [u8; 3] {
        [
            ((mm >> 12) & 0x3f) as u8 + 0x30,
            ((mm >> 6) & 0x3f) as u8 + 0x30,
            (mm & 0x3f) as u8 + 0x30,
        ]
    }

    #[test]
    fn three_char_decoding_round_trips() {
        let mut payload = Vec::new();
        for mm in [1000u32, 2345, 60000, 21] {
            payload.extend_from_slice(&encode(mm));
        }
        let ranges = decode_ranges(&payload);
        assert_eq!(ranges, vec![1.0, 2.345, 60.0, 0.021]);
    }

    #[test]
    fn error_codes_decode_as_invalid() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&encode(0));
        payload.extend_from_slice(&encode(20));
        payload.extend_from_slice(&encode(21));
        let ranges = decode_ranges(&payload);
        assert_eq!(ranges[0], 0.0);
        assert_eq!(ranges[1], 0.0);
        assert!(ranges[2] > 0.0);
    }

    #[test]
    fn checksum_stripping_drops_one_trailing_char() {
        assert_eq!(strip_checksum("00P"), "00");
        assert_eq!(strip_checksum(""), "");
    }
}
