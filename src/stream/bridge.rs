//! top level wiring for one bridge endpoint
//!
//! Builds the socket, the jitter buffer and the per direction coordinators,
//! then runs four loops:
//!   - capture: mic chunks -> packetizer -> socket (realtime thread)
//!   - receive: socket -> decode -> jitter buffer, plus control handling
//!   - playback: timer paced jitter ticks -> speaker (realtime thread)
//!   - console: stdin commands on the calling thread
//!
//! The server side binds the configured port and waits to learn its peer;
//! the client side binds an ephemeral port and starts sending right away.
use json::JsonValue;
use log::{debug, error, info, warn};
use simple_error::bail;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thread_priority::{ThreadBuilder, ThreadPriority};

use crate::common::box_error::BoxError;
use crate::common::config::Config;
use crate::common::timing::MicroTimer;
use crate::utils::get_micro_time;

use super::alsa_backend::AlsaBackend;
use super::control::ControlMessage;
use super::device::{DeviceRole, DeviceSession};
use super::error::StreamError;
use super::frame::{AudioFrame, StreamFormat};
use super::frame_sink::FrameSink;
use super::jitter_buffer::JitterBuffer;
use super::packet::{PacketKind, WireMessage, WIRE_BUF_SIZE, WIRE_HEADER_SIZE};
use super::packetizer::{FrameSource, Packetizer};
use super::session::{Direction, Phase, SessionCoordinator};
use super::socket::BridgeSocket;

/// consecutive socket failures on either path before a direction goes
/// recovering
const SOCKET_ERROR_LIMIT: usize = 10;
/// sleep while a direction waits out its retry backoff
const RECOVERY_POLL_MS: u64 = 10;

/// command line overrides; anything None comes from the config file
pub struct BridgeOpts {
    pub serve: bool,
    pub peer_host: Option<String>,
    pub port: Option<u16>,
    pub config_file: String,
    pub in_device: Option<String>,
    pub out_device: Option<String>,
}

fn default_settings() -> JsonValue {
    json::object! {
        peer_host: "192.168.0.120",
        port: 2025,
        in_device: "default",
        out_device: "default",
        mic_rate: 24000,
        mic_channels: 1,
        speaker_rate: 48000,
        speaker_channels: 2,
        frames_per_chunk: 32,
        frames_per_packet: 2,
        jitter_depth: 5,
        loss_tolerance: 3,
        resync_limit: 512,
        max_retries: 5,
        retry_backoff_ms: 250,
        stats_secs: 10,
    }
}

#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    ToggleMute,
    Resync,
    Quit,
    Unknown,
}

/// one letter commands, blank line quits
pub fn parse_console_command(line: &str) -> ConsoleCommand {
    match line.trim() {
        "" => ConsoleCommand::Quit,
        "m" | "M" => ConsoleCommand::ToggleMute,
        "r" | "R" => ConsoleCommand::Resync,
        _ => ConsoleCommand::Unknown,
    }
}

pub fn run(opts: BridgeOpts) -> Result<(), BoxError> {
    let config = Config::build(opts.config_file.clone(), default_settings())?;

    // command line beats the settings file beats the built in defaults
    let peer_host = match opts.peer_host {
        Some(host) => host,
        None => config.get_str_value("peer_host", None)?,
    };
    let port = match opts.port {
        Some(port) => port,
        None => port_from(config.get_u32_value("port", None)?)?,
    };
    let in_device = match opts.in_device {
        Some(dev) => dev,
        None => config.get_str_value("in_device", None)?,
    };
    let out_device = match opts.out_device {
        Some(dev) => dev,
        None => config.get_str_value("out_device", None)?,
    };

    let mic_format = StreamFormat::new(
        config.get_u32_value("mic_rate", None)?,
        config.get_u32_value("mic_channels", None)? as u16,
    );
    let speaker_format = StreamFormat::new(
        config.get_u32_value("speaker_rate", None)?,
        config.get_u32_value("speaker_channels", None)? as u16,
    );
    let frames_per_chunk = config.get_u32_value("frames_per_chunk", None)? as usize;
    let frames_per_packet = config.get_u32_value("frames_per_packet", None)? as usize;
    let jitter_depth = config.get_u32_value("jitter_depth", None)? as usize;
    let loss_tolerance = config.get_u32_value("loss_tolerance", None)?;
    let resync_limit = config.get_u32_value("resync_limit", None)?;
    let max_retries = config.get_u32_value("max_retries", None)?;
    let backoff_us = config.get_u32_value("retry_backoff_ms", None)? as u128 * 1_000;
    let stats_secs = config.get_u32_value("stats_secs", None)? as u128;

    check_packet_sizing(frames_per_chunk, frames_per_packet, mic_format)?;

    let sock = if opts.serve {
        info!("serving on port {}", port);
        BridgeSocket::build(port, true)?
    } else {
        let sock = BridgeSocket::build(0, false)?;
        sock.connect(&peer_host, port)?;
        info!("bridging to {}:{}", peer_host, port);
        sock
    };

    let now = get_micro_time();
    let running = Arc::new(AtomicBool::new(true));
    let jitter = Arc::new(Mutex::new(JitterBuffer::build(
        jitter_depth,
        loss_tolerance,
        resync_limit,
    )));
    let outbound = Arc::new(Mutex::new(SessionCoordinator::build(
        Direction::Outbound,
        max_retries,
        backoff_us,
        now,
    )));
    let inbound = Arc::new(Mutex::new(SessionCoordinator::build(
        Direction::Inbound,
        max_retries,
        backoff_us,
        now,
    )));

    // capture -> packetize -> send
    let capture_handle = {
        let sock = sock.try_clone()?;
        let coord = outbound.clone();
        let running = running.clone();
        let builder = ThreadBuilder::default()
            .name("capture".to_string())
            .priority(ThreadPriority::Max);
        builder.spawn(move |_result| {
            match capture_loop(
                sock,
                coord,
                running,
                in_device,
                mic_format,
                frames_per_chunk,
                frames_per_packet,
            ) {
                Ok(()) => debug!("capture loop ended"),
                Err(e) => error!("capture loop exited: {}", e),
            }
        })?
    };

    // receive -> decode -> jitter buffer
    let receive_handle = {
        let sock = sock.try_clone()?;
        let jitter = jitter.clone();
        let inbound = inbound.clone();
        let outbound = outbound.clone();
        let running = running.clone();
        thread::spawn(move || {
            receive_loop(sock, jitter, inbound, outbound, running, mic_format);
            debug!("receive loop ended");
        })
    };

    // jitter buffer -> playback
    let playback_handle = {
        let jitter = jitter.clone();
        let coord = inbound.clone();
        let running = running.clone();
        let builder = ThreadBuilder::default()
            .name("playback".to_string())
            .priority(ThreadPriority::Max);
        builder.spawn(move |_result| {
            match playback_loop(
                jitter,
                coord,
                running,
                out_device,
                speaker_format,
                mic_format,
                frames_per_chunk,
                frames_per_packet,
                stats_secs,
            ) {
                Ok(()) => debug!("playback loop ended"),
                Err(e) => error!("playback loop exited: {}", e),
            }
        })?
    };

    console_loop(&sock, &jitter, &running)?;

    let _ = capture_handle.join();
    let _ = receive_handle.join();
    let _ = playback_handle.join();
    info!("bridge shut down");
    Ok(())
}

fn capture_loop(
    sock: BridgeSocket,
    coord: Arc<Mutex<SessionCoordinator>>,
    running: Arc<AtomicBool>,
    device_name: String,
    format: StreamFormat,
    frames_per_chunk: usize,
    frames_per_packet: usize,
) -> Result<(), BoxError> {
    let backend = AlsaBackend::build(&device_name, format, frames_per_chunk);
    let session = match DeviceSession::open(backend, DeviceRole::Capture) {
        Ok(s) => s,
        Err(e) => {
            coord.lock().unwrap().failed(&format!("capture open: {}", e));
            return Err(e.into());
        }
    };
    let mut source = FrameSource::new(session, frames_per_chunk);
    let mut packetizer = Packetizer::build(frames_per_packet);
    let mut send_errors = 0;
    coord.lock().unwrap().started();

    while running.load(Ordering::Relaxed) {
        let phase = coord.lock().unwrap().phase();
        match phase {
            Phase::Stopped => break,
            Phase::Recovering => {
                recover_device(&coord, || source.reopen());
                continue;
            }
            _ => {}
        }
        match source.poll_device_changed() {
            Ok(Some(format)) => {
                info!("capture device moved, now {}", format);
                note_device_swap(&coord, get_micro_time());
            }
            Ok(None) => {}
            Err(e) => {
                warn!("capture device poll: {}", e);
                coord.lock().unwrap().device_changed(get_micro_time());
                continue;
            }
        }
        packetizer.set_muted(coord.lock().unwrap().is_muted());
        let frame = match source.read_chunk() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("capture read: {}", e);
                coord.lock().unwrap().device_changed(get_micro_time());
                continue;
            }
        };
        let msg = match packetizer.push(frame, get_micro_time() as u64) {
            Ok(Some(msg)) => msg,
            Ok(None) => continue,
            Err(e) => {
                coord.lock().unwrap().failed(&format!("packetize: {}", e));
                return Err(e);
            }
        };
        if !sock.has_peer() {
            // server side before the first datagram arrives
            continue;
        }
        match sock.send(&msg) {
            Ok(_) => {
                send_errors = 0;
            }
            Err(e) => {
                warn!("send: {}", e);
                note_socket_error(&mut send_errors, &coord, get_micro_time());
            }
        }
    }
    source.close();
    Ok(())
}

fn receive_loop(
    sock: BridgeSocket,
    jitter: Arc<Mutex<JitterBuffer>>,
    inbound: Arc<Mutex<SessionCoordinator>>,
    outbound: Arc<Mutex<SessionCoordinator>>,
    running: Arc<AtomicBool>,
    stream_format: StreamFormat,
) -> () {
    let mut msg = WireMessage::new();
    let mut recv_errors = 0;
    while running.load(Ordering::Relaxed) {
        match sock.recv(&mut msg) {
            Ok(true) => {
                recv_errors = 0;
            }
            Ok(false) => continue,
            Err(e) => {
                warn!("recv: {}", e);
                note_socket_error(&mut recv_errors, &inbound, get_micro_time());
                // keep a dead peer from turning this loop hot
                thread::sleep(Duration::from_millis(RECOVERY_POLL_MS));
                continue;
            }
        }
        match msg.get_kind() {
            Some(PacketKind::Audio) => {
                let sequence = msg.get_sequence();
                let frames = msg.decode_frames(stream_format);
                accept_audio(&jitter, &inbound, sequence, frames, get_micro_time());
            }
            Some(kind) => match ControlMessage::from_kind(kind) {
                Some(ControlMessage::Mute) => outbound.lock().unwrap().set_muted(true),
                Some(ControlMessage::Unmute) => outbound.lock().unwrap().set_muted(false),
                Some(ControlMessage::ResyncRequest) => {
                    info!("peer requested resync");
                    jitter.lock().unwrap().reset();
                }
                Some(ControlMessage::Teardown) => {
                    info!("peer tore the bridge down");
                    inbound.lock().unwrap().teardown();
                    outbound.lock().unwrap().teardown();
                    running.store(false, Ordering::Relaxed);
                }
                None => {}
            },
            None => debug!("dropping packet with unknown kind"),
        }
    }
}

fn playback_loop(
    jitter: Arc<Mutex<JitterBuffer>>,
    coord: Arc<Mutex<SessionCoordinator>>,
    running: Arc<AtomicBool>,
    device_name: String,
    format: StreamFormat,
    stream_format: StreamFormat,
    frames_per_chunk: usize,
    frames_per_packet: usize,
    stats_secs: u128,
) -> Result<(), BoxError> {
    let backend = AlsaBackend::build(&device_name, format, frames_per_chunk);
    let session = match DeviceSession::open(backend, DeviceRole::Render) {
        Ok(s) => s,
        Err(e) => {
            coord
                .lock()
                .unwrap()
                .failed(&format!("playback open: {}", e));
            return Err(e.into());
        }
    };
    let mut sink = FrameSink::new(session);

    // pace ticks at the cadence one packet worth of audio plays out
    let tick_us = frames_per_chunk as u128 * frames_per_packet as u128 * 1_000_000
        / stream_format.sample_rate as u128;
    let now = get_micro_time();
    let mut tick_timer = MicroTimer::build(now, tick_us);
    let mut stats_timer = MicroTimer::build(now, stats_secs * 1_000_000);
    coord.lock().unwrap().started();

    while running.load(Ordering::Relaxed) {
        let phase = coord.lock().unwrap().phase();
        match phase {
            Phase::Stopped => break,
            Phase::Recovering => {
                if recover_device(&coord, || sink.reopen()) {
                    // re-anchor on the next packet after the outage, and
                    // drop the tick backlog the stint accumulated
                    jitter.lock().unwrap().reset();
                    tick_timer.reset(get_micro_time());
                }
                continue;
            }
            _ => {}
        }
        let now = get_micro_time();
        if !tick_timer.expired(now) {
            thread::sleep(Duration::from_micros(500));
            continue;
        }
        tick_timer.advance();

        match sink.poll_device_changed() {
            Ok(Some(format)) => {
                // clean swap: already reopened, frames stay buffered and the
                // sink resamples to the new format from the next write on
                info!("playback device moved, now {}", format);
                note_device_swap(&coord, now);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("playback device poll: {}", e);
                coord.lock().unwrap().device_changed(now);
                continue;
            }
        }

        let frames = jitter.lock().unwrap().tick();
        if frames.is_empty() {
            // priming or waiting out a short gap; keep the device fed
            let silence = AudioFrame::silence(sink.device_format(), frames_per_chunk);
            for _ in 0..frames_per_packet {
                if let Err(e) = sink.write(&silence) {
                    warn!("playback write: {}", e);
                    coord.lock().unwrap().device_changed(get_micro_time());
                    break;
                }
            }
        } else {
            for frame in &frames {
                match sink.write(frame) {
                    Ok(()) => {}
                    Err(StreamError::FormatMismatch { stream, device }) => {
                        coord.lock().unwrap().failed(&format!(
                            "cannot play {} on a {} device",
                            stream, device
                        ));
                        break;
                    }
                    Err(e) => {
                        warn!("playback write: {}", e);
                        coord.lock().unwrap().device_changed(get_micro_time());
                        break;
                    }
                }
            }
        }

        if stats_timer.expired(now) {
            stats_timer.reset(now);
            info!("inbound jitter: {}", jitter.lock().unwrap());
        }
    }
    sink.close();
    Ok(())
}

/// settings file ports are u32s; reject anything a real port cannot be
fn port_from(val: u32) -> Result<u16, BoxError> {
    if val == 0 || val > u16::MAX as u32 {
        bail!("port {} is out of range", val);
    }
    Ok(val as u16)
}

/// one packet's worth of audio has to fit a single datagram
fn check_packet_sizing(
    frames_per_chunk: usize,
    frames_per_packet: usize,
    format: StreamFormat,
) -> Result<(), BoxError> {
    let payload = frames_per_chunk * frames_per_packet * format.channels as usize * 2;
    if WIRE_HEADER_SIZE + payload > WIRE_BUF_SIZE {
        bail!(
            "{} chunks of {} frames at {} channels will not fit one datagram",
            frames_per_packet,
            frames_per_chunk,
            format.channels
        );
    }
    Ok(())
}

/// slot an audio packet and keep the inbound coordinator in step: a buffer
/// resync while streaming is a stream restart, so the direction passes
/// through recovering
fn accept_audio(
    jitter: &Arc<Mutex<JitterBuffer>>,
    inbound: &Arc<Mutex<SessionCoordinator>>,
    sequence: u32,
    frames: Vec<AudioFrame>,
    now: u128,
) -> () {
    let resynced = {
        let mut buf = jitter.lock().unwrap();
        let before = buf.get_resyncs();
        buf.insert(sequence, frames);
        buf.get_resyncs() > before
    };
    let mut coord = inbound.lock().unwrap();
    if resynced {
        coord.resync(now);
    }
    coord.observe_sequence(sequence, now);
}

/// a default-device swap the session already survived: the handle is fresh,
/// so the direction passes straight through recovering instead of starting
/// a retry stint
fn note_device_swap(coord: &Arc<Mutex<SessionCoordinator>>, now: u128) -> () {
    let mut coord = coord.lock().unwrap();
    coord.device_changed(now);
    coord.recovered();
}

/// count a consecutive socket failure; past the threshold the direction
/// goes recovering
fn note_socket_error(errors: &mut usize, coord: &Arc<Mutex<SessionCoordinator>>, now: u128) -> () {
    *errors += 1;
    if *errors >= SOCKET_ERROR_LIMIT {
        coord.lock().unwrap().socket_trouble(now);
        *errors = 0;
    }
}

/// shared recovery step for the two device owning loops.  True once a
/// reopen attempt succeeded.
fn recover_device<F>(coord: &Arc<Mutex<SessionCoordinator>>, mut reopen: F) -> bool
where
    F: FnMut() -> Result<StreamFormat, StreamError>,
{
    let now = get_micro_time();
    if coord.lock().unwrap().retry_ready(now) {
        match reopen() {
            Ok(format) => {
                info!("device reopened at {}", format);
                coord.lock().unwrap().recovered();
                return true;
            }
            Err(e) => {
                warn!("reopen failed: {}", e);
                coord.lock().unwrap().retry_failed(get_micro_time());
            }
        }
    } else {
        thread::sleep(Duration::from_millis(RECOVERY_POLL_MS));
    }
    false
}

/// stdin command loop.  Returns once the operator quits or the peer tears
/// the bridge down and the operator presses enter.
fn console_loop(
    sock: &BridgeSocket,
    jitter: &Arc<Mutex<JitterBuffer>>,
    running: &Arc<AtomicBool>,
) -> Result<(), BoxError> {
    println!("m toggles the remote mic, r resyncs, blank line quits");
    let mut remote_muted = false;
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if !running.load(Ordering::Relaxed) {
            break;
        }
        match parse_console_command(&line) {
            ConsoleCommand::Quit => {
                if sock.has_peer() {
                    let _ = sock.send(&ControlMessage::Teardown.to_wire(get_micro_time() as u64));
                }
                running.store(false, Ordering::Relaxed);
                break;
            }
            ConsoleCommand::ToggleMute => {
                if !sock.has_peer() {
                    println!("no peer yet");
                    continue;
                }
                remote_muted = !remote_muted;
                let msg = if remote_muted {
                    ControlMessage::Mute
                } else {
                    ControlMessage::Unmute
                };
                sock.send(&msg.to_wire(get_micro_time() as u64))?;
                println!("remote mic {}", if remote_muted { "muted" } else { "live" });
            }
            ConsoleCommand::Resync => {
                jitter.lock().unwrap().reset();
                if sock.has_peer() {
                    sock.send(
                        &ControlMessage::ResyncRequest.to_wire(get_micro_time() as u64),
                    )?;
                }
                println!("resynced");
            }
            ConsoleCommand::Unknown => {
                println!("m toggles the remote mic, r resyncs, blank line quits");
            }
        }
    }
    running.store(false, Ordering::Relaxed);
    Ok(())
}
