//! Tests for stream framing and the pump threads.

use std::io::{Cursor, ErrorKind};
use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};

use bytes::{BufMut, Bytes, BytesMut};
use fusebridge_config::SessionLimits;
use rstest::rstest;

use super::*;
use crate::opcode::Opcode;
use crate::shape::ATTR_OUT_LEN;
use crate::tests::support::{PulledRequest, context, test_protocol};
use crate::wire::{ErrorConvention, REQUEST_HEADER_LEN, encode_reply, init_reply};

fn frame_with_len(len: u32, rest: &[u8]) -> Vec<u8> {
    let mut frame = BytesMut::new();
    frame.put_u32_le(len);
    frame.put_slice(rest);
    frame.to_vec()
}

/// Serves `requests` requests on the daemon end, then closes it.
fn daemon<F>(stream: UnixStream, requests: usize, mut reply: F) -> JoinHandle<Vec<Opcode>>
where
    F: FnMut(&PulledRequest) -> Vec<Bytes> + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = FrameReader::new(
            stream.try_clone().expect("clone daemon stream"),
            REQUEST_HEADER_LEN,
            MAX_FRAME_LEN,
        );
        let mut writer = FrameWriter::new(stream);
        let mut seen = Vec::new();
        for _ in 0..requests {
            let frame = reader
                .read_frame()
                .expect("request frame")
                .expect("bridge keeps the stream open");
            let request = PulledRequest::from_frame(&frame);
            seen.push(request.opcode());
            for answer in reply(&request) {
                writer.write_frame(&answer).expect("reply written");
            }
        }
        seen
    })
}

fn standard_reply(request: &PulledRequest) -> Vec<Bytes> {
    let body = match request.opcode() {
        Opcode::Init => init_reply(test_protocol()).to_vec(),
        _ => vec![0; ATTR_OUT_LEN],
    };
    vec![encode_reply(request.unique(), 0, &body, ErrorConvention::default()).expect("encodes")]
}

fn pumped_session(stream: UnixStream) -> ChannelPump {
    let session = Session::open(SessionLimits::default());
    let reader = stream.try_clone().expect("clone bridge stream");
    ChannelPump::spawn(session, reader, stream).expect("pump starts")
}

#[rstest]
fn reader_reports_a_clean_end_between_frames() {
    let mut reader = FrameReader::new(Cursor::new(Vec::new()), REPLY_HEADER_LEN, MAX_FRAME_LEN);

    assert!(reader.read_frame().expect("clean end").is_none());
}

#[rstest]
fn reader_rejects_an_end_inside_a_frame() {
    let mut reader = FrameReader::new(
        Cursor::new(frame_with_len(32, &[0; 8])),
        REPLY_HEADER_LEN,
        MAX_FRAME_LEN,
    );

    let error = reader.read_frame().expect_err("truncated frame");

    assert!(matches!(error, ChannelError::Io(ref io) if io.kind() == ErrorKind::UnexpectedEof));
}

#[rstest]
#[case(8, 16, 1024, true)]
#[case(2048, 16, 1024, false)]
fn reader_enforces_frame_bounds(
    #[case] len: u32,
    #[case] min: usize,
    #[case] max: usize,
    #[case] too_short: bool,
) {
    let mut reader = FrameReader::new(Cursor::new(frame_with_len(len, &[0; 32])), min, max);

    let error = reader.read_frame().expect_err("out-of-range length");

    if too_short {
        assert!(matches!(error, ChannelError::FrameTooShort { len: 8, min: 16 }));
    } else {
        assert!(matches!(error, ChannelError::FrameTooLarge { len: 2048, max: 1024 }));
    }
}

#[rstest]
fn reader_returns_whole_frames_back_to_back() {
    let first = encode_reply(1, 0, &[7; 4], ErrorConvention::default()).expect("encodes");
    let second = encode_reply(2, 0, &[], ErrorConvention::default()).expect("encodes");
    let mut stream = first.to_vec();
    stream.extend_from_slice(&second);
    let mut reader = FrameReader::new(Cursor::new(stream), REPLY_HEADER_LEN, MAX_FRAME_LEN);

    assert_eq!(reader.read_frame().expect("first"), Some(first));
    assert_eq!(reader.read_frame().expect("second"), Some(second));
    assert_eq!(reader.read_frame().expect("end"), None);
}

#[rstest]
fn writer_emits_frames_verbatim() {
    let mut sink = Vec::new();
    {
        let mut writer = FrameWriter::new(&mut sink);
        writer.write_frame(b"abcd").expect("written");
        writer.write_frame(b"efgh").expect("written");
    }

    assert_eq!(sink, b"abcdefgh");
}

#[rstest]
fn pump_carries_requests_and_replies_over_a_stream() {
    let (bridge, daemon_end) = UnixStream::pair().expect("socket pair");
    let daemon = daemon(daemon_end, 2, standard_reply);
    let pump = pumped_session(bridge);
    let session = Arc::clone(pump.session());

    let protocol = session.handshake(&context()).expect("handshake");
    let reply = session
        .dispatch_sync(Opcode::Getattr, 1, &[], &context())
        .expect("getattr answered");

    assert_eq!(protocol, test_protocol());
    assert_eq!(reply.body().len(), ATTR_OUT_LEN);
    assert_eq!(
        daemon.join().expect("daemon thread"),
        vec![Opcode::Init, Opcode::Getattr]
    );
    pump.join().expect("pump stops cleanly when the daemon hangs up");
    assert!(session.is_killed());
}

#[rstest]
fn malformed_replies_are_skipped() {
    let (bridge, daemon_end) = UnixStream::pair().expect("socket pair");
    let daemon = daemon(daemon_end, 2, |request| {
        let mut answers = Vec::new();
        if request.opcode() == Opcode::Getattr {
            let header = encode_reply(request.unique(), 5, &[], ErrorConvention::default())
                .expect("encodes");
            let mut bogus = BytesMut::new();
            bogus.put_u32_le(20);
            bogus.put_slice(header.get(4..).expect("header"));
            bogus.put_slice(&[1, 2, 3, 4]);
            answers.push(bogus.freeze());
        }
        answers.extend(standard_reply(request));
        answers
    });
    let pump = pumped_session(bridge);
    let session = Arc::clone(pump.session());

    session.handshake(&context()).expect("handshake");
    let reply = session
        .dispatch_sync(Opcode::Getattr, 1, &[], &context())
        .expect("well-formed reply still delivered");

    assert_eq!(reply.body().len(), ATTR_OUT_LEN);
    daemon.join().expect("daemon thread");
    pump.join().expect("pump stops");
}

#[rstest]
fn unframeable_input_kills_the_session() {
    let (bridge, daemon_end) = UnixStream::pair().expect("socket pair");
    let daemon = daemon(daemon_end, 1, |_| vec![Bytes::from(frame_with_len(8, &[0; 4]))]);
    let pump = pumped_session(bridge);
    let session = Arc::clone(pump.session());

    let error = session.handshake(&context()).expect_err("handshake fails");

    assert_eq!(error, crate::DispatchError::Disconnected);
    daemon.join().expect("daemon thread");
    assert!(matches!(
        pump.join(),
        Err(ChannelError::FrameTooShort { len: 8, .. })
    ));
}
