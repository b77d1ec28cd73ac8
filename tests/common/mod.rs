#![allow(dead_code)]

use std::{
    io::{BufRead, BufReader, Read, Write},
    net::{TcpListener, TcpStream},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use avs4000::{
    vita49::{VrlHeader, VrtHeader, WIRE_FRAME_LEN},
    ControllerConfig, DeviceController, SampleBlock,
};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

pub const SAMPLE_RATE: f64 = 2_000_000.0;
pub const SECONDS: u32 = 1_700_000_000;
pub const SAMPLES_PER_FRAME: usize = 4080;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("AVS4000_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// A big-endian 8192 byte wire frame whose payload counts up from `fill`.
pub fn wire_frame(count: u16, seconds: u32, lsw: u32, fill: i16) -> Vec<u8> {
    let mut dat = Vec::with_capacity(WIRE_FRAME_LEN);
    dat.extend_from_slice(&VrlHeader::FAW.to_be_bytes());
    dat.extend_from_slice(&((u32::from(count) << 20) | VrlHeader::FRAME_SIZE).to_be_bytes());
    // type 1, tsi 1, tsf 1
    dat.extend_from_slice(
        &(0x1050_0000 | u32::from(VrtHeader::EXPECTED_PACKET_SIZE)).to_be_bytes(),
    );
    dat.extend_from_slice(&1u32.to_be_bytes());
    dat.extend_from_slice(&seconds.to_be_bytes());
    dat.extend_from_slice(&0u32.to_be_bytes());
    dat.extend_from_slice(&lsw.to_be_bytes());
    for idx in 0..SAMPLES_PER_FRAME {
        dat.extend_from_slice(&fill.wrapping_add(idx as i16).to_be_bytes());
    }
    dat.extend_from_slice(b"VEND");
    assert_eq!(dat.len(), WIRE_FRAME_LEN);
    dat
}

/// Wire frames with the given frame counts, all stamped with `seconds`.
pub fn wire_frames(counts: impl IntoIterator<Item = u16>, seconds: u32) -> Vec<u8> {
    counts
        .into_iter()
        .flat_map(|count| wire_frame(count % 4096, seconds, 500_000, 0))
        .collect()
}

type Rejector = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// In-process stand-in for the daemon: answers control requests and serves `data` to every
/// data connection.
pub struct MockDaemon {
    pub control_port: u16,
    pub data_port: u16,
    requests: Arc<Mutex<Vec<Value>>>,
    data_connections: Arc<Mutex<usize>>,
}

pub struct MockDaemonBuilder {
    data: Vec<u8>,
    chunk_len: usize,
    master: Value,
    devices: Value,
    reject: Option<Rejector>,
}

impl MockDaemonBuilder {
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn chunk_len(mut self, len: usize) -> Self {
        self.chunk_len = len;
        self
    }

    pub fn devices(mut self, devices: Value) -> Self {
        self.devices = devices;
        self
    }

    /// Answer `false` to any request matching `reject`.
    pub fn reject<F>(mut self, reject: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.reject = Some(Box::new(reject));
        self
    }

    pub fn start(self) -> MockDaemon {
        let control = TcpListener::bind("127.0.0.1:0").unwrap();
        let data = TcpListener::bind("127.0.0.1:0").unwrap();
        let daemon = MockDaemon {
            control_port: control.local_addr().unwrap().port(),
            data_port: data.local_addr().unwrap().port(),
            requests: Arc::default(),
            data_connections: Arc::default(),
        };

        let requests = Arc::clone(&daemon.requests);
        let master = self.master;
        let devices = self.devices;
        let reject = Arc::new(self.reject);
        thread::spawn(move || {
            for stream in control.incoming() {
                let Ok(stream) = stream else { return };
                let requests = Arc::clone(&requests);
                let master = master.clone();
                let devices = devices.clone();
                let reject = Arc::clone(&reject);
                thread::spawn(move || {
                    serve_control(stream, &requests, &master, &devices, (*reject).as_ref())
                });
            }
        });

        let connections = Arc::clone(&daemon.data_connections);
        let payload = Arc::new(self.data);
        let chunk_len = self.chunk_len;
        thread::spawn(move || {
            for stream in data.incoming() {
                let Ok(stream) = stream else { return };
                *connections.lock().unwrap() += 1;
                let payload = Arc::clone(&payload);
                thread::spawn(move || serve_data(stream, &payload, chunk_len));
            }
        });

        daemon
    }
}

fn serve_control(
    stream: TcpStream,
    requests: &Mutex<Vec<Value>>,
    master: &Value,
    devices: &Value,
    reject: Option<&Rejector>,
) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let request: Value = serde_json::from_str(line.trim_end()).unwrap();
        requests.lock().unwrap().push(request.clone());

        let response = if reject.is_some_and(|reject| reject(&request)) {
            json!([false])
        } else {
            match (request[0].as_str(), request.get(1)) {
                (Some("get"), None) => json!([true, devices]),
                (Some("get"), Some(groups)) => {
                    let group = groups[0].as_str().unwrap_or_default();
                    let payload = match group {
                        "master" => master.clone(),
                        "rxstat" => json!({"Gain": 12.5, "Overflow": 0, "Rate": 2e6, "Sample": 42}),
                        "rx" => json!({"sampleRate": 2e6, "freq": 915e6, "gainMode": "SlowAGC"}),
                        "gps" => json!({"lat": 43.07, "lon": -89.4, "fix": true}),
                        _ => json!({}),
                    };
                    json!([true, {group: payload}])
                }
                _ => json!([true]),
            }
        };
        let mut buf = serde_json::to_vec(&response).unwrap();
        buf.push(b'\n');
        if writer.write_all(&buf).is_err() {
            return;
        }
    }
}

fn serve_data(mut stream: TcpStream, payload: &[u8], chunk_len: usize) {
    for chunk in payload.chunks(chunk_len.max(1)) {
        if stream.write_all(chunk).is_err() {
            return;
        }
    }
    let _ = stream.flush();
    // hold the connection open until the client hangs up
    let mut buf = [0u8; 64];
    while matches!(stream.read(&mut buf), Ok(n) if n > 0) {}
}

impl MockDaemon {
    pub fn builder() -> MockDaemonBuilder {
        MockDaemonBuilder {
            data: Vec::new(),
            chunk_len: 4096,
            master: json!({"sampleRate": SAMPLE_RATE, "sampleRateMode": "Auto"}),
            devices: json!({}),
            reject: None,
        }
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub fn data_connections(&self) -> usize {
        *self.data_connections.lock().unwrap()
    }

    pub fn config(&self) -> ControllerConfig {
        ControllerConfig::builder()
            .device_number(1)
            .host("127.0.0.1")
            .control_port(self.control_port)
            .data_port(self.data_port)
            .build()
    }
}

/// Call `pull_block` until it produces a block, failing after a few seconds.
pub fn pull_until_block(ctl: &DeviceController) -> SampleBlock {
    for _ in 0..100 {
        if let Some(block) = ctl.pull_block().unwrap() {
            return block;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("no block received");
}
