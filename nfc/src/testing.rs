//! In-memory serial port scripted with chip responses, for tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

pub(crate) struct MockPort {
    pub incoming: VecDeque<u8>,
    pub outgoing: Vec<u8>,
}

impl MockPort {
    pub fn new() -> Self {
        Self {
            incoming: VecDeque::new(),
            outgoing: Vec::new(),
        }
    }

    pub fn queue(&mut self, bytes: &[u8]) {
        self.incoming.extend(bytes);
    }

    pub fn queue_ack(&mut self) {
        self.queue(&[0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00]);
    }

    /// Queue a chip-to-host information frame carrying `payload`.
    pub fn queue_response(&mut self, payload: &[u8]) {
        let len = payload.len() as u8 + 1;
        let mut dcs = 0xD5u8;
        for byte in payload {
            dcs = dcs.wrapping_add(*byte);
        }
        self.queue(&[0x00, 0x00, 0xFF, len, len.wrapping_neg(), 0xD5]);
        self.queue(payload);
        self.queue(&[dcs.wrapping_neg(), 0x00]);
    }

    /// Host frames written so far, as command payloads (TFI and checksums
    /// stripped, wake-up bytes and ACKs skipped).
    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();
        let bytes = &self.outgoing;
        let mut i = 0;
        while i + 1 < bytes.len() {
            if !(bytes[i] == 0x00 && bytes[i + 1] == 0xFF) {
                i += 1;
                continue;
            }
            let Some(&len) = bytes.get(i + 2) else { break };
            if len == 0x00 || len == 0xFF {
                // ack/nack, no payload
                i += 3;
                continue;
            }
            let start = i + 5; // skip lcs and TFI
            let end = start + len as usize - 1;
            if end > bytes.len() {
                break;
            }
            payloads.push(bytes[start..end].to_vec());
            i = end + 2;
        }
        payloads
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.incoming.pop_front() {
            Some(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            None => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "no more scripted bytes",
            )),
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
