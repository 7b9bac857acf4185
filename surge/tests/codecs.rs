//! Framed echo over TCP for every built-in codec.

mod common;

use bytes::Bytes;
use common::{connect, read_n, start};
use flume::Sender;
use std::io::Write;
use std::thread;
use std::time::Duration;
use surge::{
    Action, Addr, ByteOrder, Codec, Conn, DelimiterCodec, Error, EventHandler, FixedLengthCodec,
    LengthFieldCodec, LengthFieldConfig, LineCodec, Options, Server,
};

/// Echoes every decoded frame and reports it.
struct FrameEcho {
    ready: Sender<Addr>,
    frames: Sender<Vec<u8>>,
}

impl EventHandler for FrameEcho {
    fn on_init_complete(&self, server: &Server) -> Action {
        let _ = self.ready.send(server.addr().clone());
        Action::None
    }

    fn react(&self, frame: &[u8], _conn: &mut Conn) -> (Option<Bytes>, Action) {
        let _ = self.frames.send(frame.to_vec());
        (Some(Bytes::copy_from_slice(frame)), Action::None)
    }

    fn on_closed(&self, _conn: &mut Conn, err: Option<&Error>) -> Action {
        assert!(err.is_none(), "unexpected close error: {err:?}");
        Action::Shutdown
    }
}

/// Dribble `input` in small pieces and check frames and echoed bytes.
fn run_codec<C: Codec + 'static>(codec: C, input: &[u8], frames: &[&[u8]], output: &[u8]) {
    let (frames_tx, frames_rx) = flume::unbounded();
    let server = start(
        |ready| FrameEcho {
            ready,
            frames: frames_tx,
        },
        "tcp://127.0.0.1:0",
        Options::default().with_codec(codec),
    );

    let mut stream = connect(server.inet());
    for piece in input.chunks(3) {
        stream.write_all(piece).unwrap();
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(read_n(&mut stream, output.len()), output);
    drop(stream);

    server.join().unwrap();
    let got: Vec<Vec<u8>> = frames_rx.try_iter().collect();
    let want: Vec<Vec<u8>> = frames.iter().map(|f| f.to_vec()).collect();
    assert_eq!(got, want);
}

#[test]
fn test_line_codec_echo() {
    run_codec(
        LineCodec::new(),
        b"alpha\r\nbeta\ngamma\r\n",
        &[b"alpha", b"beta", b"gamma"],
        b"alpha\r\nbeta\r\ngamma\r\n",
    );
}

#[test]
fn test_delimiter_codec_echo() {
    run_codec(
        DelimiterCodec::new(b'|'),
        b"a|bb|ccc|",
        &[b"a", b"bb", b"ccc"],
        b"a|bb|ccc|",
    );
}

#[test]
fn test_fixed_length_codec_echo() {
    run_codec(
        FixedLengthCodec::new(4),
        b"abcdefghij",
        &[b"abcd", b"efgh"],
        b"abcdefgh",
    );
}

#[test]
fn test_length_field_codec_echo() {
    run_codec(
        LengthFieldCodec::new(LengthFieldConfig::new(4)),
        b"\x00\x00\x00\x03abc\x00\x00\x00\x05hello",
        &[b"abc", b"hello"],
        b"\x00\x00\x00\x03abc\x00\x00\x00\x05hello",
    );
}

#[test]
fn test_length_field_codec_little_endian_including_header() {
    let config = LengthFieldConfig::new(3)
        .with_byte_order(ByteOrder::LittleEndian)
        .with_length_includes_header(true);
    run_codec(
        LengthFieldCodec::new(config),
        b"\x08\x00\x00hello\x03\x00\x00",
        &[b"hello", b""],
        b"\x08\x00\x00hello\x03\x00\x00",
    );
}
