//! In-process FINS/TCP PLC for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use fins_driver::envelope::wrap_frame;
use parking_lot::Mutex;

/// Node number the mock assigns when the client asks for one.
pub const ASSIGNED_NODE: u8 = 0xEF;
/// Node number of the mock PLC.
pub const PLC_NODE: u8 = 0x01;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[derive(Default)]
struct State {
    words: HashMap<(u8, u16), u16>,
    fail_at: HashMap<u16, (u8, u8)>,
    close_next: bool,
    silent: bool,
    connections: usize,
    frames: usize,
}

/// A PLC answering memory read, write and multiple read commands.
pub struct MockPlc {
    endpoint: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl MockPlc {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock plc");
        let endpoint = listener.local_addr().expect("mock plc address");
        let state = Arc::new(Mutex::new(State::default()));

        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                shared.lock().connections += 1;
                let state = Arc::clone(&shared);
                thread::spawn(move || serve(stream, &state));
            }
        });

        Self { endpoint, state }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn set_word(&self, code: u8, offset: u16, value: u16) {
        self.state.lock().words.insert((code, offset), value);
    }

    pub fn word(&self, code: u8, offset: u16) -> u16 {
        self.state.lock().words.get(&(code, offset)).copied().unwrap_or(0)
    }

    /// Reads starting at `offset` answer with this end code.
    pub fn fail_reads_at(&self, offset: u16, main: u8, sub: u8) {
        self.state.lock().fail_at.insert(offset, (main, sub));
    }

    /// The next frame closes its connection instead of being answered.
    pub fn close_next(&self) {
        self.state.lock().close_next = true;
    }

    /// Frames are read but never answered.
    pub fn go_silent(&self) {
        self.state.lock().silent = true;
    }

    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    pub fn frames(&self) -> usize {
        self.state.lock().frames
    }
}

fn serve(mut stream: TcpStream, state: &Mutex<State>) {
    loop {
        let mut header = [0u8; 16];
        if stream.read_exact(&mut header).is_err() {
            return;
        }
        let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let command = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
        let mut body = vec![0u8; length.saturating_sub(8)];
        if stream.read_exact(&mut body).is_err() {
            return;
        }

        let reply = if command == 0 {
            let requested = body.last().copied().unwrap_or(0);
            let client = if requested == 0 { ASSIGNED_NODE } else { requested };
            let mut reply = b"FINS".to_vec();
            reply.extend_from_slice(&16u32.to_be_bytes());
            reply.extend_from_slice(&1u32.to_be_bytes());
            reply.extend_from_slice(&0u32.to_be_bytes());
            reply.extend_from_slice(&u32::from(client).to_be_bytes());
            reply.extend_from_slice(&u32::from(PLC_NODE).to_be_bytes());
            reply
        } else {
            let mut plc = state.lock();
            plc.frames += 1;
            if plc.silent {
                continue;
            }
            if std::mem::take(&mut plc.close_next) {
                return;
            }
            wrap_frame(&answer(&mut plc, &body))
        };

        if stream.write_all(&reply).is_err() {
            return;
        }
    }
}

fn word_code(code: u8) -> u8 {
    match code {
        0x30 => 0xB0,
        0x31 => 0xB1,
        0x32 => 0xB2,
        0x33 => 0xB3,
        0x02 => 0x82,
        0x0A => 0x98,
        other => other,
    }
}

fn is_bit_code(code: u8) -> bool {
    matches!(code, 0x30 | 0x31 | 0x32 | 0x33 | 0x02 | 0x0A)
}

fn element(plc: &State, code: u8, offset: u16, bit: u8) -> Vec<u8> {
    let word = plc.words.get(&(word_code(code), offset)).copied().unwrap_or(0);
    if is_bit_code(code) {
        vec![u8::from(word & (1 << bit) != 0)]
    } else {
        word.to_be_bytes().to_vec()
    }
}

fn answer(plc: &mut State, request: &[u8]) -> Vec<u8> {
    let mut reply = vec![
        0xC0, 0x00, 0x02, request[6], request[7], request[8], request[3], request[4], request[5],
        request[9],
    ];
    let body = &request[12..];
    match (request[10], request[11]) {
        (0x01, 0x01) => {
            let (code, offset, bit) = (body[0], u16::from_be_bytes([body[1], body[2]]), body[3]);
            let count = u16::from_be_bytes([body[4], body[5]]);
            if let Some(&(main, sub)) = plc.fail_at.get(&offset) {
                reply.extend_from_slice(&[main, sub]);
                return reply;
            }
            reply.extend_from_slice(&[0x00, 0x00]);
            for i in 0..count {
                reply.extend(element(plc, code, offset + i, bit));
            }
        }
        (0x01, 0x02) => {
            let (code, offset, bit) = (body[0], u16::from_be_bytes([body[1], body[2]]), body[3]);
            let data = &body[6..];
            if is_bit_code(code) {
                let word = plc.words.entry((word_code(code), offset)).or_insert(0);
                if data[0] != 0 {
                    *word |= 1 << bit;
                } else {
                    *word &= !(1 << bit);
                }
            } else {
                for (i, pair) in data.chunks_exact(2).enumerate() {
                    plc.words
                        .insert((code, offset + i as u16), u16::from_be_bytes([pair[0], pair[1]]));
                }
            }
            reply.extend_from_slice(&[0x00, 0x00]);
        }
        (0x01, 0x04) => {
            reply.extend_from_slice(&[0x00, 0x00]);
            for item in body[1..].chunks_exact(6) {
                let (code, offset, bit) = (item[0], u16::from_be_bytes([item[1], item[2]]), item[3]);
                let count = u16::from_be_bytes([item[4], item[5]]);
                reply.push(code);
                for i in 0..count {
                    reply.extend(element(plc, code, offset + i, bit));
                }
            }
        }
        _ => reply.extend_from_slice(&[0x04, 0x01]),
    }
    reply
}
